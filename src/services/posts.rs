use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{id_of, Filter, Update};
use crate::infrastructure::COMMENTS;
use crate::models::{NewPost, Post, PostKey, PostUpdate};
use crate::notifications::DomainEvent;
use crate::services::{timestamp, validate_username, SocialService};

impl SocialService {
    /// Increments the author's counters atomically, takes the new
    /// `last_post_number` as the post number, then notifies every friend.
    #[instrument(skip(self, new_post))]
    pub async fn create_post(&self, username: &str, new_post: NewPost) -> AppResult<Post> {
        let now = Utc::now();
        let author_key = username.to_string();
        let counters = Update::new()
            .inc("post_count", 1)
            .inc("last_post_number", 1)
            .set("updated_at", timestamp(now));
        let author = self.users.apply_update(&author_key, &counters).await?;

        let post = Post::new(username, author.last_post_number, &new_post.content, now);
        let post = match self.posts.insert(post).await {
            Ok(post) => post,
            Err(e) => {
                let rollback = Update::new().inc("post_count", -1);
                if let Err(rollback_err) = self.users.apply_update(&author_key, &rollback).await {
                    warn!("Could not roll back post_count for {}: {}", username, rollback_err);
                }
                return Err(e);
            }
        };
        info!("Created post {}", post.key());

        self.publisher
            .publish(&DomainEvent::post_created(&author, &post))
            .await;
        Ok(post)
    }

    pub async fn get_post(&self, username: &str, post_number: i64) -> AppResult<Post> {
        self.posts.read(&PostKey::new(username, post_number)).await
    }

    pub async fn update_post(
        &self,
        username: &str,
        post_number: i64,
        changes: PostUpdate,
    ) -> AppResult<Post> {
        let update = Update::new()
            .set("content", changes.content)
            .set("updated_at", timestamp(Utc::now()));
        self.posts
            .apply_update(&PostKey::new(username, post_number), &update)
            .await
    }

    /// Fetches author and post concurrently, deletes the post and its
    /// comments, and decrements the author's `post_count`.
    #[instrument(skip(self))]
    pub async fn delete_post(&self, username: &str, post_number: i64) -> AppResult<Post> {
        let key = PostKey::new(username, post_number);
        let (users, posts) = (self.users.clone(), self.posts.clone());
        let (author_key, post_key) = (username.to_string(), key.clone());
        let (_, post) = self
            .orchestrator
            .fetch_pair(
                async move { users.read(&author_key).await },
                async move { posts.read(&post_key).await },
            )
            .await?;

        // A racing delete may have removed it since the fetch.
        if !self.posts.delete(&key).await? {
            return Err(AppError::NotFound(format!("posts {} not found", key)));
        }
        let counters = Update::new()
            .inc("post_count", -1)
            .set("updated_at", timestamp(Utc::now()));
        self.users.apply_update(&username.to_string(), &counters).await?;

        if let Err(e) = self.delete_comments_of(&post.id).await {
            warn!("Comments of deleted post {} not fully removed: {}", key, e);
        }
        info!("Deleted post {}", key);
        Ok(post)
    }

    /// Records a like unless `liker` already liked the post. Only a new like
    /// notifies the author.
    #[instrument(skip(self))]
    pub async fn like_post(&self, username: &str, post_number: i64, liker: &str) -> AppResult<Post> {
        validate_username(liker)?;
        let key = PostKey::new(username, post_number);
        let (users, posts) = (self.users.clone(), self.posts.clone());
        let (liker_key, post_key) = (liker.to_string(), key.clone());
        self.orchestrator
            .fetch_pair(
                async move { users.read(&liker_key).await },
                async move { posts.read(&post_key).await },
            )
            .await?;

        let now = Utc::now();
        let like_path = format!("likes.{}", liker);
        let update = Update::new()
            .set(&like_path, timestamp(now))
            .inc("number_of_likes", 1)
            .set("updated_at", timestamp(now));

        match self
            .posts
            .apply_update_if(&key, Filter::new().missing(&like_path), &update)
            .await?
        {
            Some(post) => {
                self.publisher
                    .publish(&DomainEvent::post_liked(&post, liker))
                    .await;
                Ok(post)
            }
            None => {
                debug!("{} already liked {}", liker, key);
                self.posts.read(&key).await
            }
        }
    }

    /// Posts by `username`, in post-number order.
    pub async fn list_posts(&self, username: &str) -> AppResult<Vec<Post>> {
        self.get_user(username).await?;
        let mut posts = self
            .posts
            .find_many(&Filter::new().eq("username", username))
            .await?;
        posts.sort_by_key(|post| post.post_number);
        Ok(posts)
    }

    pub async fn list_all_posts(&self) -> AppResult<Vec<Post>> {
        self.posts.find_many(&Filter::new()).await
    }

    async fn delete_comments_of(&self, post_id: &str) -> AppResult<usize> {
        let comments = self
            .store
            .find_many(COMMENTS, &Filter::new().eq("post_id", post_id))
            .await?;
        let mut deleted = 0;
        for comment in &comments {
            if let Some(id) = id_of(comment) {
                if self.store.delete_one(COMMENTS, &Filter::by_id(id)).await? {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}
