// Social operations - composes the repositories, the fetch orchestrator and
// the notification publisher into the functions the HTTP layer calls

pub mod comments;
pub mod notifications;
pub mod posts;
pub mod users;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::infrastructure::traits::DocumentStore;
use crate::notifications::{NotificationPublisher, PublisherStats};
use crate::orchestrator::FetchOrchestrator;
use crate::repository::{CacheStats, PostRepository, UserRepository};

#[derive(Clone)]
pub struct SocialService {
    users: UserRepository,
    posts: PostRepository,
    store: Arc<dyn DocumentStore>,
    orchestrator: FetchOrchestrator,
    publisher: NotificationPublisher,
}

/// Cache and pipeline counters plus the live cache keys.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub users: CacheStats,
    pub posts: CacheStats,
    pub user_keys: Vec<String>,
    pub post_keys: Vec<String>,
    pub publisher: PublisherStats,
    pub short_circuited_fetches: u64,
}

impl SocialService {
    pub fn new(
        users: UserRepository,
        posts: PostRepository,
        store: Arc<dyn DocumentStore>,
        orchestrator: FetchOrchestrator,
        publisher: NotificationPublisher,
    ) -> Self {
        Self {
            users,
            posts,
            store,
            orchestrator,
            publisher,
        }
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    pub fn posts(&self) -> &PostRepository {
        &self.posts
    }

    pub async fn cache_report(&self) -> AppResult<CacheReport> {
        Ok(CacheReport {
            users: self.users.stats(),
            posts: self.posts.stats(),
            user_keys: self.users.cached_keys().await?,
            post_keys: self.posts.cached_keys().await?,
            publisher: self.publisher.stats(),
            short_circuited_fetches: self.orchestrator.short_circuits(),
        })
    }
}

/// Usernames become dotted field paths in like maps, so '.' is not allowed.
pub(crate) fn validate_username(username: &str) -> AppResult<()> {
    if username.trim().is_empty() {
        return Err(AppError::Validation("username must not be empty".to_string()));
    }
    if username.contains('.') {
        return Err(AppError::Validation(format!(
            "username {} must not contain '.'",
            username
        )));
    }
    Ok(())
}

pub(crate) fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::infrastructure::traits::CacheInterface;
    use crate::infrastructure::{BrokerPool, InMemoryBroker, InMemoryCache, InMemoryDocumentStore};
    use std::time::Duration;

    pub struct TestContext {
        pub service: SocialService,
        pub store: Arc<InMemoryDocumentStore>,
        pub cache: Arc<InMemoryCache>,
        pub broker: InMemoryBroker,
    }

    impl TestContext {
        pub async fn cache_has_no(&self, key: &str) -> bool {
            matches!(self.cache.get(key).await, Ok(None))
        }
    }

    /// Service over in-memory collaborators. Nothing consumes the broker, so
    /// published notifications stay pending.
    pub fn context() -> TestContext {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cache = Arc::new(InMemoryCache::unbounded());
        let broker = InMemoryBroker::new(3);
        let pool = Arc::new(BrokerPool::from_broker(
            Arc::new(broker.clone()),
            8,
            Duration::from_secs(1),
        ));
        let service = SocialService::new(
            UserRepository::new(store.clone(), cache.clone()),
            PostRepository::new(store.clone(), cache.clone()),
            store.clone(),
            FetchOrchestrator::new(),
            NotificationPublisher::new(pool, "notifications"),
        );
        TestContext {
            service,
            store,
            cache,
            broker,
        }
    }
}
