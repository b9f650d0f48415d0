use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{from_document, Filter, Update};
use crate::infrastructure::NOTIFICATIONS;
use crate::models::{NewNotification, Notification, User};
use crate::notifications::store_and_link;
use crate::services::{timestamp, SocialService};

impl SocialService {
    /// Stores a client-submitted notification and links it to the recipient,
    /// the same path the fan-out consumer takes. The recipient must exist.
    #[instrument(skip(self, new_notification), fields(recipient = %new_notification.recipient))]
    pub async fn create_notification(
        &self,
        new_notification: NewNotification,
    ) -> AppResult<Notification> {
        self.get_user(&new_notification.recipient).await?;
        let delivery = store_and_link(
            self.store.as_ref(),
            &self.users,
            new_notification.into_notification(Utc::now()),
        )
        .await?;
        info!(
            "Created notification {} for {}",
            delivery.notification.id, delivery.notification.recipient
        );
        Ok(delivery.notification)
    }

    /// Notifications for `username`, oldest first, read from the
    /// notifications collection. The user's reference list is reconciled
    /// against the full set on the way.
    pub async fn list_notifications(
        &self,
        username: &str,
        read_status: Option<bool>,
    ) -> AppResult<Vec<Notification>> {
        let user = self.get_user(username).await?;
        let all = self.notifications_of(username).await?;
        if let Err(e) = self.link_missing(&user, &all).await {
            warn!("Notification references for {} not reconciled: {}", username, e);
        }

        Ok(match read_status {
            Some(status) => all.into_iter().filter(|n| n.read_status == status).collect(),
            None => all,
        })
    }

    pub async fn get_notification(&self, notification_id: &str) -> AppResult<Notification> {
        let doc = self
            .store
            .find_one(NOTIFICATIONS, &Filter::by_id(notification_id))
            .await?
            .ok_or_else(|| notification_not_found(notification_id))?;
        from_document(doc)
    }

    /// Flips `read_status` to true. Already-read notifications are returned
    /// unchanged.
    pub async fn mark_as_read(&self, notification_id: &str) -> AppResult<Notification> {
        let unread = Filter::by_id(notification_id).eq("read_status", false);
        let update = Update::new()
            .set("read_status", true)
            .set("updated_at", timestamp(Utc::now()));

        match self
            .store
            .find_one_and_update(NOTIFICATIONS, &unread, &update)
            .await?
        {
            Some(doc) => from_document(doc),
            None => self.get_notification(notification_id).await,
        }
    }

    /// Append every stored notification id missing from the user's
    /// reference list.
    pub async fn reconcile_notifications(&self, username: &str) -> AppResult<User> {
        let user = self.get_user(username).await?;
        let all = self.notifications_of(username).await?;
        self.link_missing(&user, &all).await
    }

    async fn link_missing(&self, user: &User, all: &[Notification]) -> AppResult<User> {
        let missing: Vec<&str> = all
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !user.notifications.iter().any(|known| known.as_str() == *id))
            .collect();
        if missing.is_empty() {
            return Ok(user.clone());
        }

        let update = missing
            .iter()
            .fold(Update::new(), |update, id| update.add_to_set("notifications", *id));
        let user = self.users.apply_update(&user.username, &update).await?;
        info!(
            "Linked {} missing notifications to {}",
            missing.len(),
            user.username
        );
        Ok(user)
    }

    async fn notifications_of(&self, username: &str) -> AppResult<Vec<Notification>> {
        let mut notifications = self
            .store
            .find_many(NOTIFICATIONS, &Filter::new().eq("recipient", username))
            .await?
            .into_iter()
            .map(from_document::<Notification>)
            .collect::<AppResult<Vec<_>>>()?;
        notifications.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(notifications)
    }
}

fn notification_not_found(notification_id: &str) -> AppError {
    AppError::NotFound(format!("notifications {} not found", notification_id))
}
