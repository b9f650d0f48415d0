// Look-aside cache - serialized entity snapshots addressed by string key
// Entries carry no TTL: they live until overwritten, deleted, or (when a
// capacity is configured) evicted as least recently used.

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AppResult;
use crate::infrastructure::traits::CacheInterface;

#[derive(Debug, Clone)]
pub struct InMemoryCache {
    entries: Arc<Mutex<LruCache<String, String>>>,
}

impl InMemoryCache {
    /// `capacity == 0` builds an unbounded cache.
    pub fn new(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl CacheInterface for InMemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some((evicted, _)) = entries.push(key.to_string(), value) {
            if evicted != key {
                debug!("Evicted cache entry {}", evicted);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = InMemoryCache::unbounded();
        assert_eq!(cache.get("user:alice").await.unwrap(), None);

        cache.set("user:alice", "{}".to_string()).await.unwrap();
        assert_eq!(cache.get("user:alice").await.unwrap().as_deref(), Some("{}"));

        cache.set("user:alice", "{\"v\":2}".to_string()).await.unwrap();
        assert_eq!(cache.len().await, 1);

        assert!(cache.delete("user:alice").await.unwrap());
        assert!(!cache.delete("user:alice").await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let cache = InMemoryCache::unbounded();
        for key in ["post:alice:2", "post:alice:1", "user:alice", "post:bob:1"] {
            cache.set(key, String::new()).await.unwrap();
        }

        assert_eq!(
            cache.keys("post:alice:").await.unwrap(),
            vec!["post:alice:1".to_string(), "post:alice:2".to_string()]
        );
        assert_eq!(cache.keys("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bounded_cache_evicts_lru() {
        let cache = InMemoryCache::new(2);
        cache.set("a", "1".into()).await.unwrap();
        cache.set("b", "2".into()).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", "3".into()).await.unwrap();

        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("a").await.unwrap().is_some());
    }
}
