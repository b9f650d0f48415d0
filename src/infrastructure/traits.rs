use crate::error::AppResult;
use crate::infrastructure::broker::BrokerMessage;
use crate::infrastructure::document::{Document, Filter, Update};
use async_trait::async_trait;
use std::time::Duration;

/// Document store seam. "No matching document" is reported as `Ok(None)` /
/// `Ok(false)` here and turned into `AppError::NotFound` by callers that
/// require the document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>>;
    async fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>>;
    /// Insert a document, assigning `_id` when absent. Returns the id.
    async fn insert_one(&self, collection: &str, doc: Document) -> AppResult<String>;
    /// Apply `update` to the first matching document. Returns whether one matched.
    async fn update_one(&self, collection: &str, filter: &Filter, update: &Update)
        -> AppResult<bool>;
    /// Atomic read-modify-write: apply `update` and return the post-update document.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<Option<Document>>;
    async fn delete_one(&self, collection: &str, filter: &Filter) -> AppResult<bool>;
}

/// Look-aside cache seam keyed by exact string key.
#[async_trait]
pub trait CacheInterface: Send + Sync {
    /// `Ok(None)` is the distinguished, non-fatal "key not found".
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<bool>;
    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>>;
}

/// Asynchronous broker seam. Topic administration is external.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> AppResult<()>;
    async fn subscribe(&self, topic: &str) -> AppResult<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Block until one message arrives or `timeout` elapses (`Ok(None)`).
    async fn read_message(&mut self, timeout: Duration) -> AppResult<Option<BrokerMessage>>;
}
