// Deadline decorators - wrap a store or cache so every call is bounded by the
// same fixed timeout. An expired call surfaces `TimeoutError`; the inner
// future is dropped at that point and its result is never observed.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{Document, Filter, Update};
use crate::infrastructure::traits::{CacheInterface, DocumentStore};

pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} exceeded {:?}", operation, deadline);
            Err(AppError::TimeoutError(format!(
                "{} exceeded {}ms",
                operation,
                deadline.as_millis()
            )))
        }
    }
}

pub struct TimeoutStoreDecorator {
    inner: Arc<dyn DocumentStore>,
    deadline: Duration,
}

impl TimeoutStoreDecorator {
    pub fn new(inner: Arc<dyn DocumentStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl DocumentStore for TimeoutStoreDecorator {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>> {
        with_deadline(self.deadline, "store find_one", self.inner.find_one(collection, filter)).await
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>> {
        with_deadline(self.deadline, "store find_many", self.inner.find_many(collection, filter))
            .await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> AppResult<String> {
        with_deadline(self.deadline, "store insert_one", self.inner.insert_one(collection, doc))
            .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<bool> {
        with_deadline(
            self.deadline,
            "store update_one",
            self.inner.update_one(collection, filter, update),
        )
        .await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<Option<Document>> {
        with_deadline(
            self.deadline,
            "store find_one_and_update",
            self.inner.find_one_and_update(collection, filter, update),
        )
        .await
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> AppResult<bool> {
        with_deadline(self.deadline, "store delete_one", self.inner.delete_one(collection, filter))
            .await
    }
}

pub struct TimeoutCacheDecorator {
    inner: Arc<dyn CacheInterface>,
    deadline: Duration,
}

impl TimeoutCacheDecorator {
    pub fn new(inner: Arc<dyn CacheInterface>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl CacheInterface for TimeoutCacheDecorator {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        with_deadline(self.deadline, "cache get", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        with_deadline(self.deadline, "cache set", self.inner.set(key, value)).await
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        with_deadline(self.deadline, "cache delete", self.inner.delete(key)).await
    }

    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        with_deadline(self.deadline, "cache keys", self.inner.keys(prefix)).await
    }
}
