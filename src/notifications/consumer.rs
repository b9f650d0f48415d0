use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{to_document, Update};
use crate::infrastructure::traits::{DocumentStore, Subscription};
use crate::infrastructure::{BrokerMessage, BrokerPool, NOTIFICATIONS};
use crate::models::Notification;
use crate::repository::UserRepository;

#[derive(Debug, Default)]
struct ConsumerCounters {
    received: AtomicU64,
    persisted: AtomicU64,
    unlinked: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    /// Stored in the notifications collection.
    pub persisted: u64,
    /// Stored, but the recipient's reference list could not be updated.
    pub unlinked: u64,
    /// Lost: undecodable or not stored.
    pub dropped: u64,
}

/// Long-lived consumer half of the fan-out pipeline.
///
/// Each message is stored in the notifications collection, which is the
/// source of truth, and then linked into the recipient's `notifications`
/// list. A failed link is repaired on read; a failed store write is logged
/// and the message is gone.
#[derive(Clone)]
pub struct NotificationConsumer {
    store: Arc<dyn DocumentStore>,
    users: UserRepository,
    pool: Arc<BrokerPool>,
    topic: String,
    poll_timeout: Duration,
    counters: Arc<ConsumerCounters>,
}

impl std::fmt::Debug for NotificationConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConsumer")
            .field("topic", &self.topic)
            .field("poll_timeout", &self.poll_timeout)
            .field("counters", &self.counters)
            .finish()
    }
}

/// Owner of a running consumer task.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    counters: Arc<ConsumerCounters>,
}

impl ConsumerHandle {
    pub fn stats(&self) -> ConsumerStats {
        snapshot(&self.counters)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Notification consumer task failed: {}", e);
        }
    }
}

impl NotificationConsumer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        users: UserRepository,
        pool: Arc<BrokerPool>,
        topic: &str,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            store,
            users,
            pool,
            topic: topic.to_string(),
            poll_timeout,
            counters: Arc::new(ConsumerCounters::default()),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        snapshot(&self.counters)
    }

    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let counters = self.counters.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        ConsumerHandle {
            shutdown,
            task,
            counters,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut subscription) = self.subscribe(&mut shutdown).await else {
            return;
        };
        info!("Notification consumer listening on {}", self.topic);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = subscription.read_message(self.poll_timeout) => {
                    match message {
                        Ok(Some(message)) => self.handle(message).await,
                        Ok(None) => {}
                        Err(e) => warn!("Broker read on {} failed: {}", self.topic, e),
                    }
                }
            }
        }
        info!("Notification consumer on {} stopped", self.topic);
    }

    /// Retry the subscription until it succeeds or shutdown is requested.
    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn Subscription>> {
        loop {
            match self.pool.subscribe(&self.topic).await {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    error!("Cannot subscribe to {}: {}", self.topic, e);
                    tokio::select! {
                        _ = shutdown.changed() => return None,
                        _ = tokio::time::sleep(self.poll_timeout) => {}
                    }
                }
            }
        }
    }

    async fn handle(&self, message: BrokerMessage) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match self.persist(&message.payload).await {
            Ok(id) => debug!("Persisted notification {} from message {}", id, message.id),
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Dropping notification message {}: {}", message.id, e);
            }
        }
    }

    /// Store one notification payload and link it to its recipient.
    /// Returns the stored notification id.
    pub async fn persist(&self, payload: &[u8]) -> AppResult<String> {
        let notification: Notification = serde_json::from_slice(payload).map_err(|e| {
            AppError::DeserializationError(format!("Undecodable notification: {}", e))
        })?;

        let delivery = store_and_link(self.store.as_ref(), &self.users, notification).await?;
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);
        if !delivery.linked {
            self.counters.unlinked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(delivery.notification.id)
    }
}

/// Outcome of [`store_and_link`].
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The stored notification, `id` assigned.
    pub notification: Notification,
    /// Whether the recipient's `notifications` list now references it.
    pub linked: bool,
}

/// Insert `notification` into the notifications collection, then add its id
/// to the recipient's reference list. Only the insert can fail the call; a
/// failed link is logged and reported through [`Delivery::linked`].
pub async fn store_and_link(
    store: &dyn DocumentStore,
    users: &UserRepository,
    mut notification: Notification,
) -> AppResult<Delivery> {
    let id = store
        .insert_one(NOTIFICATIONS, to_document(&notification)?)
        .await?;
    notification.id = id;

    let link = Update::new().add_to_set("notifications", notification.id.as_str());
    let linked = match users.apply_update(&notification.recipient, &link).await {
        Ok(_) => true,
        Err(e) => {
            warn!(
                "Notification {} stored but not linked to {}: {}",
                notification.id, notification.recipient, e
            );
            false
        }
    };
    Ok(Delivery {
        notification,
        linked,
    })
}

fn snapshot(counters: &ConsumerCounters) -> ConsumerStats {
    ConsumerStats {
        received: counters.received.load(Ordering::Relaxed),
        persisted: counters.persisted.load(Ordering::Relaxed),
        unlinked: counters.unlinked.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document::Filter;
    use crate::infrastructure::{InMemoryBroker, InMemoryCache, InMemoryDocumentStore};
    use crate::models::{NewUser, NotificationKind};
    use crate::notifications::NotificationPublisher;
    use crate::notifications::DomainEvent;
    use chrono::Utc;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        users: UserRepository,
        pool: Arc<BrokerPool>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cache = Arc::new(InMemoryCache::unbounded());
        let users = UserRepository::new(store.clone(), cache);
        let pool = Arc::new(BrokerPool::from_broker(
            Arc::new(InMemoryBroker::new(3)),
            8,
            Duration::from_secs(1),
        ));
        Fixture { store, users, pool }
    }

    fn consumer(f: &Fixture) -> NotificationConsumer {
        NotificationConsumer::new(
            f.store.clone(),
            f.users.clone(),
            f.pool.clone(),
            "notifications",
            Duration::from_millis(50),
        )
    }

    async fn wait_for_count(store: &InMemoryDocumentStore, expected: usize) {
        for _ in 0..100 {
            if store.count(NOTIFICATIONS).await >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} notifications", expected);
    }

    #[tokio::test]
    async fn test_persist_links_recipient() {
        let f = fixture();
        f.users
            .insert(NewUser::named("bob").into_user(Utc::now()))
            .await
            .unwrap();

        let notification = Notification::new(
            "bob",
            NotificationKind::PostLiked,
            "alice",
            Some("p1".to_string()),
            None,
            "hi",
            Utc::now(),
        );
        let id = consumer(&f)
            .persist(&serde_json::to_vec(&notification).unwrap())
            .await
            .unwrap();

        let bob = f.users.read(&"bob".to_string()).await.unwrap();
        assert_eq!(bob.notifications, vec![id.clone()]);
        let stored = f
            .store
            .find_one(NOTIFICATIONS, &Filter::by_id(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["recipient"], "bob");
    }

    #[tokio::test]
    async fn test_missing_recipient_still_persists() {
        let f = fixture();
        let c = consumer(&f);
        let notification = Notification::new(
            "ghost",
            NotificationKind::CommentCreated,
            "alice",
            Some("p1".to_string()),
            Some("c1".to_string()),
            "boo",
            Utc::now(),
        );

        c.persist(&serde_json::to_vec(&notification).unwrap())
            .await
            .unwrap();
        assert_eq!(f.store.count(NOTIFICATIONS).await, 1);
        assert_eq!(c.stats().unlinked, 1);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_rejected() {
        let f = fixture();
        let err = consumer(&f).persist(b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::DeserializationError(_)));
    }

    #[tokio::test]
    async fn test_background_loop_delivers_fan_out() {
        let f = fixture();
        for name in ["a", "b", "c"] {
            f.users
                .insert(NewUser::named(name).into_user(Utc::now()))
                .await
                .unwrap();
        }
        let handle = consumer(&f).spawn();
        let publisher = NotificationPublisher::new(f.pool.clone(), "notifications");

        let event = DomainEvent::PostCreated {
            author: "alice".to_string(),
            friends: vec!["a".into(), "b".into(), "c".into()],
            post_id: "p1".to_string(),
            content: "hello".to_string(),
        };
        assert_eq!(publisher.publish(&event).await, 3);

        wait_for_count(&f.store, 3).await;
        for name in ["a", "b", "c"] {
            let stored = f
                .store
                .find_many(NOTIFICATIONS, &Filter::new().eq("recipient", name))
                .await
                .unwrap();
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0]["post_id"], "p1");
        }

        assert!(handle.is_running());
        handle.shutdown().await;
    }
}
