use axum::Router;
use std::sync::Arc;
use tracing::info;

use crate::{
    config::Config,
    http::create_router,
    infrastructure::{
        broker::BrokerConnector, BrokerPool, InMemoryBroker, InMemoryCache,
        InMemoryDocumentStore, MessageBroker, SqliteDocumentStore, TimeoutCacheDecorator,
        TimeoutStoreDecorator,
    },
    infrastructure::traits::{CacheInterface, DocumentStore},
    notifications::{ConsumerHandle, NotificationConsumer, NotificationPublisher},
    orchestrator::FetchOrchestrator,
    repository::{PostRepository, UserRepository},
    services::SocialService,
};

/// Everything a running server needs, built from explicit collaborators.
pub struct AppState {
    pub service: SocialService,
    pub broker_pool: Arc<BrokerPool>,
    pub config: Config,
    consumer: ConsumerHandle,
}

impl AppState {
    /// Build the collaborators named by `config` and wire them up.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = if config.database.url == "memory" {
            info!("Using in-memory document store");
            Arc::new(InMemoryDocumentStore::new())
        } else if config.database.url.starts_with("sqlite:") {
            Arc::new(SqliteDocumentStore::connect(&config.database.url).await?)
        } else {
            anyhow::bail!("Unsupported DATABASE_URL: {}", config.database.url);
        };

        let cache: Arc<dyn CacheInterface> = Arc::new(InMemoryCache::new(config.cache.capacity));

        let partitions = config.broker.partitions;
        let connector: BrokerConnector = Arc::new(move || {
            let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new(partitions));
            Ok(broker)
        });
        let broker_pool = Arc::new(BrokerPool::new(
            connector,
            config.broker.publish_permits,
            config.io_timeout(),
        ));

        Ok(Self::with_collaborators(config, store, cache, broker_pool))
    }

    /// Wire injected collaborators. Store and cache calls get the fixed
    /// per-call deadline; the notification consumer is started here.
    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn CacheInterface>,
        broker_pool: Arc<BrokerPool>,
    ) -> Self {
        let store: Arc<dyn DocumentStore> =
            Arc::new(TimeoutStoreDecorator::new(store, config.io_timeout()));
        let cache: Arc<dyn CacheInterface> =
            Arc::new(TimeoutCacheDecorator::new(cache, config.io_timeout()));

        let users = UserRepository::new(store.clone(), cache.clone());
        let posts = PostRepository::new(store.clone(), cache);
        let publisher = NotificationPublisher::new(broker_pool.clone(), &config.broker.topic);

        let consumer = NotificationConsumer::new(
            store.clone(),
            users.clone(),
            broker_pool.clone(),
            &config.broker.topic,
            config.consumer_poll_timeout(),
        )
        .spawn();

        let service = SocialService::new(users, posts, store, FetchOrchestrator::new(), publisher);

        Self {
            service,
            broker_pool,
            config,
            consumer,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.service.clone())
    }

    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    /// Stop the background consumer.
    pub async fn shutdown(self) {
        self.consumer.shutdown().await;
        info!("Application state shut down");
    }
}
