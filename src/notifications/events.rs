use chrono::{DateTime, Utc};

use crate::models::{Comment, Notification, NotificationKind, Post, User};

/// A committed state change that may notify other users.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    PostCreated {
        author: String,
        friends: Vec<String>,
        post_id: String,
        content: String,
    },
    CommentCreated {
        post_owner: String,
        commenter: String,
        post_id: String,
        comment_id: String,
        content: String,
    },
    PostLiked {
        post_owner: String,
        liker: String,
        post_id: String,
        content: String,
    },
    CommentLiked {
        comment_owner: String,
        liker: String,
        post_id: String,
        comment_id: String,
        content: String,
    },
}

impl DomainEvent {
    pub fn post_created(author: &User, post: &Post) -> Self {
        DomainEvent::PostCreated {
            author: author.username.clone(),
            friends: author.friends.clone(),
            post_id: post.id.clone(),
            content: post.content.clone(),
        }
    }

    pub fn comment_created(post: &Post, comment: &Comment) -> Self {
        DomainEvent::CommentCreated {
            post_owner: post.username.clone(),
            commenter: comment.username.clone(),
            post_id: post.id.clone(),
            comment_id: comment.id.clone(),
            content: comment.content.clone(),
        }
    }

    pub fn post_liked(post: &Post, liker: &str) -> Self {
        DomainEvent::PostLiked {
            post_owner: post.username.clone(),
            liker: liker.to_string(),
            post_id: post.id.clone(),
            content: post.content.clone(),
        }
    }

    pub fn comment_liked(comment: &Comment, liker: &str) -> Self {
        DomainEvent::CommentLiked {
            comment_owner: comment.username.clone(),
            liker: liker.to_string(),
            post_id: comment.post_id.clone(),
            comment_id: comment.id.clone(),
            content: comment.content.clone(),
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            DomainEvent::PostCreated { .. } => NotificationKind::PostCreated,
            DomainEvent::CommentCreated { .. } => NotificationKind::CommentCreated,
            DomainEvent::PostLiked { .. } => NotificationKind::PostLiked,
            DomainEvent::CommentLiked { .. } => NotificationKind::CommentLiked,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            DomainEvent::PostCreated { author, .. } => author,
            DomainEvent::CommentCreated { commenter, .. } => commenter,
            DomainEvent::PostLiked { liker, .. } | DomainEvent::CommentLiked { liker, .. } => liker,
        }
    }

    /// Friends of the author for a new post, otherwise the owner of the
    /// target. Duplicates and the actor are dropped.
    pub fn recipients(&self) -> Vec<String> {
        let candidates: Vec<&String> = match self {
            DomainEvent::PostCreated { friends, .. } => friends.iter().collect(),
            DomainEvent::CommentCreated { post_owner, .. } => vec![post_owner],
            DomainEvent::PostLiked { post_owner, .. } => vec![post_owner],
            DomainEvent::CommentLiked { comment_owner, .. } => vec![comment_owner],
        };

        let mut recipients: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate != self.actor() && !recipients.contains(candidate) {
                recipients.push(candidate.clone());
            }
        }
        recipients
    }

    /// One notification per recipient.
    pub fn notifications(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let (post_id, comment_id, content) = match self {
            DomainEvent::PostCreated {
                post_id, content, ..
            }
            | DomainEvent::PostLiked {
                post_id, content, ..
            } => (post_id, None, content),
            DomainEvent::CommentCreated {
                post_id,
                comment_id,
                content,
                ..
            }
            | DomainEvent::CommentLiked {
                post_id,
                comment_id,
                content,
                ..
            } => (post_id, Some(comment_id.clone()), content),
        };

        self.recipients()
            .iter()
            .map(|recipient| {
                Notification::new(
                    recipient,
                    self.kind(),
                    self.actor(),
                    Some(post_id.clone()),
                    comment_id.clone(),
                    content,
                    now,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_created_targets_each_friend() {
        let event = DomainEvent::PostCreated {
            author: "alice".to_string(),
            friends: vec!["a".into(), "b".into(), "c".into(), "b".into(), "alice".into()],
            post_id: "p1".to_string(),
            content: "hi".to_string(),
        };

        let notifications = event.notifications(Utc::now());
        let recipients: Vec<&str> = notifications.iter().map(|n| n.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["a", "b", "c"]);
        assert!(notifications
            .iter()
            .all(|n| n.post_id.as_deref() == Some("p1") && n.kind == NotificationKind::PostCreated));
    }

    #[test]
    fn test_like_targets_owner_only() {
        let event = DomainEvent::CommentLiked {
            comment_owner: "bob".to_string(),
            liker: "carol".to_string(),
            post_id: "p1".to_string(),
            comment_id: "c1".to_string(),
            content: "nice".to_string(),
        };
        let notifications = event.notifications(Utc::now());
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].recipient, "bob");
        assert_eq!(notifications[0].actor, "carol");
        assert_eq!(notifications[0].comment_id.as_deref(), Some("c1"));
        assert!(!notifications[0].read_status);
    }

    #[test]
    fn test_self_action_notifies_nobody() {
        let event = DomainEvent::PostLiked {
            post_owner: "dave".to_string(),
            liker: "dave".to_string(),
            post_id: "p1".to_string(),
            content: "me".to_string(),
        };
        assert!(event.notifications(Utc::now()).is_empty());
    }
}
