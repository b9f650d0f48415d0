use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{from_document, to_document, Filter, Update};
use crate::infrastructure::traits::DocumentStore;
use crate::infrastructure::COMMENTS;
use crate::models::{Comment, NewComment, Post, PostKey};
use crate::notifications::DomainEvent;
use crate::services::{timestamp, validate_username, SocialService};

impl SocialService {
    /// Stores the comment in the comments collection, rebuilds the post's
    /// embedded projection and notifies the post author.
    #[instrument(skip(self, new_comment), fields(commenter = %new_comment.username))]
    pub async fn create_comment(
        &self,
        username: &str,
        post_number: i64,
        new_comment: NewComment,
    ) -> AppResult<Comment> {
        validate_username(&new_comment.username)?;
        let key = PostKey::new(username, post_number);
        let (posts, users) = (self.posts.clone(), self.users.clone());
        let (post_key, commenter) = (key.clone(), new_comment.username.clone());
        let (post, _) = self
            .orchestrator
            .fetch_pair(
                async move { posts.read(&post_key).await },
                async move { users.read(&commenter).await },
            )
            .await?;

        let mut comment = Comment::new(&post, &new_comment.username, &new_comment.content, Utc::now());
        comment.id = self
            .store
            .insert_one(COMMENTS, to_document(&comment)?)
            .await?;

        self.sync_comment_projection(&key, &post.id).await;
        self.publisher
            .publish(&DomainEvent::comment_created(&post, &comment))
            .await;
        Ok(comment)
    }

    /// Fetches the post and the comment concurrently. A comment that belongs
    /// to a different post is reported as not found.
    pub async fn get_comment(
        &self,
        username: &str,
        post_number: i64,
        comment_id: &str,
    ) -> AppResult<Comment> {
        let key = PostKey::new(username, post_number);
        let posts = self.posts.clone();
        let store = self.store.clone();
        let id = comment_id.to_string();
        let (post, comment) = self
            .orchestrator
            .fetch_pair(
                async move { posts.read(&key).await },
                async move { find_comment(store, &id).await },
            )
            .await?;
        ensure_parent(&post, comment)
    }

    pub async fn update_comment(
        &self,
        username: &str,
        post_number: i64,
        comment_id: &str,
        content: &str,
    ) -> AppResult<Comment> {
        let current = self.get_comment(username, post_number, comment_id).await?;
        let update = Update::new()
            .set("content", content)
            .set("updated_at", timestamp(Utc::now()));
        let doc = self
            .store
            .find_one_and_update(COMMENTS, &Filter::by_id(&current.id), &update)
            .await?
            .ok_or_else(|| comment_not_found(comment_id))?;
        let comment: Comment = from_document(doc)?;

        self.sync_comment_projection(&comment.post_key(), &comment.post_id)
            .await;
        Ok(comment)
    }

    pub async fn delete_comment(
        &self,
        username: &str,
        post_number: i64,
        comment_id: &str,
    ) -> AppResult<Comment> {
        let comment = self.get_comment(username, post_number, comment_id).await?;
        if !self
            .store
            .delete_one(COMMENTS, &Filter::by_id(&comment.id))
            .await?
        {
            return Err(comment_not_found(comment_id));
        }

        self.sync_comment_projection(&comment.post_key(), &comment.post_id)
            .await;
        Ok(comment)
    }

    /// Same conditional like as posts; only a new like notifies the comment
    /// author.
    #[instrument(skip(self))]
    pub async fn like_comment(
        &self,
        username: &str,
        post_number: i64,
        comment_id: &str,
        liker: &str,
    ) -> AppResult<Comment> {
        validate_username(liker)?;
        let service = self.clone();
        let users = self.users.clone();
        let (owner, id, liker_key) = (username.to_string(), comment_id.to_string(), liker.to_string());
        let (comment, _) = self
            .orchestrator
            .fetch_pair(
                async move { service.get_comment(&owner, post_number, &id).await },
                async move { users.read(&liker_key).await },
            )
            .await?;

        let now = Utc::now();
        let like_path = format!("likes.{}", liker);
        let update = Update::new()
            .set(&like_path, timestamp(now))
            .inc("number_of_likes", 1)
            .set("updated_at", timestamp(now));
        let filter = Filter::by_id(&comment.id).missing(&like_path);

        match self
            .store
            .find_one_and_update(COMMENTS, &filter, &update)
            .await?
        {
            Some(doc) => {
                let comment: Comment = from_document(doc)?;
                self.sync_comment_projection(&comment.post_key(), &comment.post_id)
                    .await;
                self.publisher
                    .publish(&DomainEvent::comment_liked(&comment, liker))
                    .await;
                Ok(comment)
            }
            None => {
                debug!("{} already liked comment {}", liker, comment.id);
                find_comment(self.store.clone(), &comment.id).await
            }
        }
    }

    /// Comments of a post from the authoritative collection, oldest first.
    pub async fn list_comments(&self, username: &str, post_number: i64) -> AppResult<Vec<Comment>> {
        let post = self.get_post(username, post_number).await?;
        self.comments_of(&post.id).await
    }

    /// Rebuild the post's embedded `comments` from the comments collection.
    pub async fn rebuild_comment_projection(&self, key: &PostKey, post_id: &str) -> AppResult<Post> {
        let comments = self.comments_of(post_id).await?;
        let update = Update::new().set("comments", to_document(&comments)?);
        self.posts.apply_update(key, &update).await
    }

    /// The comment write has already committed, so a failed rebuild only
    /// drops the cached post; the next rebuild repairs the projection.
    async fn sync_comment_projection(&self, key: &PostKey, post_id: &str) {
        if let Err(e) = self.rebuild_comment_projection(key, post_id).await {
            warn!("Comment projection for {} not rebuilt: {}", key, e);
            self.posts.invalidate(key).await;
        }
    }

    async fn comments_of(&self, post_id: &str) -> AppResult<Vec<Comment>> {
        let mut comments = self
            .store
            .find_many(COMMENTS, &Filter::new().eq("post_id", post_id))
            .await?
            .into_iter()
            .map(from_document::<Comment>)
            .collect::<AppResult<Vec<_>>>()?;
        comments.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(comments)
    }
}

async fn find_comment(store: Arc<dyn DocumentStore>, comment_id: &str) -> AppResult<Comment> {
    let doc = store
        .find_one(COMMENTS, &Filter::by_id(comment_id))
        .await?
        .ok_or_else(|| comment_not_found(comment_id))?;
    from_document(doc)
}

fn ensure_parent(post: &Post, comment: Comment) -> AppResult<Comment> {
    if comment.post_id != post.id {
        return Err(AppError::NotFound(format!(
            "comment {} not found on post {}",
            comment.id,
            post.key()
        )));
    }
    Ok(comment)
}

fn comment_not_found(comment_id: &str) -> AppError {
    AppError::NotFound(format!("comments {} not found", comment_id))
}
