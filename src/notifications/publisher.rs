use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{BrokerPool, PublishHandle};
use crate::models::Notification;
use crate::notifications::events::DomainEvent;

#[derive(Debug, Default)]
struct PublisherCounters {
    published: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

/// Producer half of the fan-out pipeline. Publishing is best-effort: every
/// failure is logged and counted, never returned to the triggering write.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    pool: Arc<BrokerPool>,
    topic: String,
    counters: Arc<PublisherCounters>,
}

impl NotificationPublisher {
    pub fn new(pool: Arc<BrokerPool>, topic: &str) -> Self {
        Self {
            pool,
            topic: topic.to_string(),
            counters: Arc::new(PublisherCounters::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one message per recipient of `event`. Returns how many were
    /// accepted by the broker.
    #[instrument(skip(self, event), fields(kind = event.kind().as_str()))]
    pub async fn publish(&self, event: &DomainEvent) -> usize {
        let notifications = event.notifications(Utc::now());
        if notifications.is_empty() {
            debug!("No recipients for {} by {}", event.kind().as_str(), event.actor());
            return 0;
        }

        let handle = match self.pool.acquire_publisher().await {
            Ok(handle) => handle,
            Err(e) => {
                self.counters
                    .failed
                    .fetch_add(notifications.len() as u64, Ordering::Relaxed);
                warn!(
                    "Dropping {} notifications, no publish handle: {}",
                    notifications.len(),
                    e
                );
                return 0;
            }
        };

        let mut published = 0;
        for notification in &notifications {
            match self.send(&handle, notification).await {
                Ok(()) => {
                    published += 1;
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Failed to publish {} notification for {}: {}",
                        notification.kind.as_str(),
                        notification.recipient,
                        e
                    );
                }
            }
        }
        published
    }

    async fn send(&self, handle: &PublishHandle, notification: &Notification) -> AppResult<()> {
        let payload = serde_json::to_vec(notification).map_err(|e| {
            AppError::SerializationError(format!("Failed to encode notification: {}", e))
        })?;
        handle
            .publish(&self.topic, Some(notification.kind.as_str()), payload)
            .await
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
