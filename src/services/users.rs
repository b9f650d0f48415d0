use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{Filter, Update};
use crate::infrastructure::USERS;
use crate::models::{NewUser, User, UserUpdate};
use crate::orchestrator::FetchOrchestrator;
use crate::services::{timestamp, validate_username, SocialService};

impl SocialService {
    /// Every listed friend must already exist; they are read concurrently.
    /// The duplicate check and the insert are separate store calls, so two
    /// concurrent signups with one username can both succeed.
    #[instrument(skip(self, new_user), fields(username = %new_user.username))]
    pub async fn create_user(&self, new_user: NewUser) -> AppResult<User> {
        validate_username(&new_user.username)?;
        for friend in &new_user.friends {
            validate_username(friend)?;
        }

        let existing = self
            .store
            .find_one(USERS, &Filter::new().eq("username", new_user.username.as_str()))
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!(
                "username {} is taken",
                new_user.username
            )));
        }

        if !new_user.friends.is_empty() {
            let tasks = new_user
                .friends
                .iter()
                .map(|friend| {
                    let (users, key) = (self.users.clone(), friend.clone());
                    FetchOrchestrator::task(async move { users.read(&key).await })
                })
                .collect();
            self.orchestrator.fetch_all(tasks).await?;
        }

        let user = self.users.insert(new_user.into_user(Utc::now())).await?;
        info!("Created user {}", user.username);
        Ok(user)
    }

    pub async fn get_user(&self, username: &str) -> AppResult<User> {
        self.users.read(&username.to_string()).await
    }

    pub async fn update_user(&self, username: &str, changes: UserUpdate) -> AppResult<User> {
        self.users
            .apply_update(&username.to_string(), &changes.to_update(Utc::now()))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, username: &str) -> AppResult<()> {
        if !self.users.delete(&username.to_string()).await? {
            return Err(AppError::NotFound(format!("users {} not found", username)));
        }
        info!("Deleted user {}", username);
        Ok(())
    }

    /// Adds `friend` to `username`'s own list only.
    pub async fn add_friend(&self, username: &str, friend: &str) -> AppResult<User> {
        if username == friend {
            return Err(AppError::Validation("cannot befriend yourself".to_string()));
        }

        let (owner_repo, friend_repo) = (self.users.clone(), self.users.clone());
        let (owner_key, friend_key) = (username.to_string(), friend.to_string());
        self.orchestrator
            .fetch_pair(
                async move { owner_repo.read(&owner_key).await },
                async move { friend_repo.read(&friend_key).await },
            )
            .await?;

        let update = Update::new()
            .add_to_set("friends", friend)
            .set("updated_at", timestamp(Utc::now()));
        self.users.apply_update(&username.to_string(), &update).await
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        self.users.find_many(&Filter::new()).await
    }
}
