use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SNIPPET_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PostCreated,
    CommentCreated,
    PostLiked,
    CommentLiked,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PostCreated => "post_created",
            NotificationKind::CommentCreated => "comment_created",
            NotificationKind::PostLiked => "post_liked",
            NotificationKind::CommentLiked => "comment_liked",
        }
    }
}

/// Lifecycle: created -> published -> persisted -> (unread | read).
/// `read_status` only ever moves from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub recipient: String,
    pub kind: NotificationKind,
    /// Username whose action triggered the notification.
    pub actor: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub comment_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub read_status: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient: &str,
        kind: NotificationKind,
        actor: &str,
        post_id: Option<String>,
        comment_id: Option<String>,
        content: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            recipient: recipient.to_string(),
            kind,
            actor: actor.to_string(),
            post_id,
            comment_id,
            content: snippet(content),
            read_status: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Client-submitted notification. The server assigns id, timestamps and
/// `read_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNotification {
    pub recipient: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub comment_id: Option<String>,
    pub content: String,
}

impl NewNotification {
    pub fn into_notification(self, now: DateTime<Utc>) -> Notification {
        Notification::new(
            &self.recipient,
            self.kind,
            &self.actor,
            self.post_id,
            self.comment_id,
            &self.content,
            now,
        )
    }
}

/// First `SNIPPET_CHARS` characters of `content`.
pub fn snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("short"), "short");

        let long = "é".repeat(200);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let value = serde_json::to_value(NotificationKind::CommentLiked).unwrap();
        assert_eq!(value, "comment_liked");
        assert_eq!(NotificationKind::PostCreated.as_str(), "post_created");
    }
}
