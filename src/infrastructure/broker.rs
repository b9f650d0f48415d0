// Asynchronous message broker - topic-partitioned in-memory implementation
// plus the process-wide connection pool that hands out scoped publish handles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::{MessageBroker, Subscription};

#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: Option<String>,
    pub partition: usize,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Mutex<VecDeque<BrokerMessage>>>,
    arrivals: Notify,
    round_robin: AtomicUsize,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions.max(1))
                .map(|_| Mutex::new(VecDeque::new()))
                .collect(),
            arrivals: Notify::new(),
            round_robin: AtomicUsize::new(0),
        }
    }

    fn partition_for(&self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() as usize) % count
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
        }
    }

    fn append(&self, message: BrokerMessage) {
        let mut partition = match self.partitions[message.partition].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        partition.push_back(message);
        drop(partition);
        self.arrivals.notify_waiters();
    }

    /// Pop from the first non-empty partition at or after `start`.
    fn take(&self, start: usize) -> Option<BrokerMessage> {
        let count = self.partitions.len();
        (0..count).find_map(|offset| {
            let mut partition = match self.partitions[(start + offset) % count].lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            partition.pop_front()
        })
    }

    fn depth(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| match p.lock() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            })
            .sum()
    }
}

/// In-process broker. Subscribers to the same topic compete for messages;
/// a message is removed from its partition when read.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    partitions: usize,
    topics: Arc<RwLock<HashMap<String, Arc<TopicLog>>>>,
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn topic(&self, name: &str) -> Arc<TopicLog> {
        if let Some(log) = self.topics.read().await.get(name) {
            return log.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(self.partitions)))
            .clone()
    }

    /// Messages published but not yet read.
    pub async fn pending(&self, topic: &str) -> usize {
        match self.topics.read().await.get(topic) {
            Some(log) => log.depth(),
            None => 0,
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> AppResult<()> {
        let log = self.topic(topic).await;
        let message = BrokerMessage {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            key: key.map(str::to_string),
            partition: log.partition_for(key),
            payload,
            published_at: Utc::now(),
        };
        debug!(
            "Publishing message {} to {}[{}]",
            message.id, topic, message.partition
        );
        log.append(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            log: self.topic(topic).await,
            cursor: 0,
        }))
    }
}

struct InMemorySubscription {
    log: Arc<TopicLog>,
    cursor: usize,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn read_message(&mut self, timeout: Duration) -> AppResult<Option<BrokerMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a publish in between is not missed.
            let arrival = self.log.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(message) = self.log.take(self.cursor) {
                self.cursor = (message.partition + 1) % self.log.partitions.len();
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }
}

pub type BrokerConnector = Arc<dyn Fn() -> AppResult<Arc<dyn MessageBroker>> + Send + Sync>;

/// Process-wide broker connection, created on first use and shared by every
/// publisher. Publish handles are acquired per operation and bounded by a
/// permit count; the subscription for the background consumer comes from the
/// same connection.
pub struct BrokerPool {
    connector: BrokerConnector,
    connection: OnceCell<Arc<dyn MessageBroker>>,
    permits: Arc<Semaphore>,
    io_timeout: Duration,
}

impl std::fmt::Debug for BrokerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPool")
            .field("connected", &self.connection.get().is_some())
            .field("available_permits", &self.permits.available_permits())
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl BrokerPool {
    pub fn new(connector: BrokerConnector, publish_permits: usize, io_timeout: Duration) -> Self {
        Self {
            connector,
            connection: OnceCell::new(),
            permits: Arc::new(Semaphore::new(publish_permits.max(1))),
            io_timeout,
        }
    }

    /// Pool over an already-constructed broker.
    pub fn from_broker(
        broker: Arc<dyn MessageBroker>,
        publish_permits: usize,
        io_timeout: Duration,
    ) -> Self {
        let connector: BrokerConnector = Arc::new(move || Ok(broker.clone()));
        Self::new(connector, publish_permits, io_timeout)
    }

    fn connection(&self) -> AppResult<Arc<dyn MessageBroker>> {
        self.connection
            .get_or_try_init(|| {
                info!("Opening broker connection");
                (self.connector)()
            })
            .cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    /// Scoped publish handle; the permit is released when the handle drops.
    pub async fn acquire_publisher(&self) -> AppResult<PublishHandle> {
        let permit = tokio::time::timeout(self.io_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                AppError::TimeoutError("Timed out waiting for a publish handle".to_string())
            })?
            .map_err(|_| AppError::BrokerError("Broker pool is closed".to_string()))?;

        Ok(PublishHandle {
            broker: self.connection()?,
            io_timeout: self.io_timeout,
            _permit: permit,
        })
    }

    pub async fn subscribe(&self, topic: &str) -> AppResult<Box<dyn Subscription>> {
        let broker = self.connection()?;
        tokio::time::timeout(self.io_timeout, broker.subscribe(topic))
            .await
            .map_err(|_| AppError::TimeoutError(format!("Timed out subscribing to {}", topic)))?
    }
}

pub struct PublishHandle {
    broker: Arc<dyn MessageBroker>,
    io_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl PublishHandle {
    pub async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> AppResult<()> {
        tokio::time::timeout(self.io_timeout, self.broker.publish(topic, key, payload))
            .await
            .map_err(|_| AppError::TimeoutError(format!("Timed out publishing to {}", topic)))?
    }
}
