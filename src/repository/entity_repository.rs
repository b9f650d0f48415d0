// Cache-coherent repository: read-through on miss, write-through after the
// store commits, unconditional purge on delete.

use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{from_document, to_document, Filter, Update};
use crate::infrastructure::traits::{CacheInterface, DocumentStore};
use crate::repository::entity::CachedEntity;

#[derive(Debug, Default)]
struct RepositoryMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    backfill_failures: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of a repository's cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub backfills: u64,
    pub backfill_failures: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct EntityRepository<E: CachedEntity> {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn CacheInterface>,
    metrics: Arc<RepositoryMetrics>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: CachedEntity> Clone for EntityRepository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: CachedEntity> std::fmt::Debug for EntityRepository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("collection", &E::COLLECTION)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl<E: CachedEntity> EntityRepository<E> {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<dyn CacheInterface>) -> Self {
        Self {
            store,
            cache,
            metrics: Arc::new(RepositoryMetrics::default()),
            _entity: PhantomData,
        }
    }

    /// Cache first; on a miss, load from the store and backfill the cache.
    /// A cached payload that does not decode is a hard `DeserializationError`.
    #[instrument(skip(self), fields(collection = E::COLLECTION))]
    pub async fn read(&self, key: &E::Key) -> AppResult<E> {
        let cache_key = E::cache_key(key);
        if let Some(payload) = self.cache.get(&cache_key).await? {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", cache_key);
            return decode_cached(&cache_key, &payload);
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss for {}", cache_key);
        self.load(key).await
    }

    /// Store read that bypasses the cache lookup but still backfills it.
    pub async fn load(&self, key: &E::Key) -> AppResult<E> {
        let doc = self
            .store
            .find_one(E::COLLECTION, &E::key_filter(key))
            .await?
            .ok_or_else(|| not_found::<E>(key))?;
        let entity: E = from_document(doc)?;

        let cache_key = E::cache_key(key);
        match encode(&entity) {
            Ok(payload) => match self.cache.set(&cache_key, payload).await {
                Ok(()) => {
                    self.metrics.backfills.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.backfill_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Cache backfill for {} failed: {}", cache_key, e);
                }
            },
            Err(e) => {
                self.metrics.backfill_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Cannot encode {} for backfill: {}", cache_key, e);
            }
        }

        Ok(entity)
    }

    /// Insert into the store, then write the committed entity to the cache.
    #[instrument(skip(self, entity), fields(collection = E::COLLECTION))]
    pub async fn insert(&self, mut entity: E) -> AppResult<E> {
        let doc = to_document(&entity)?;
        let id = self.store.insert_one(E::COLLECTION, doc).await?;
        entity.assign_id(id);
        self.write_cache(&E::cache_key(&entity.key()), &entity).await;
        Ok(entity)
    }

    /// Atomic store update of the keyed document, then cache overwrite with
    /// the post-update state. `NotFound` when no document has this key.
    #[instrument(skip(self, update), fields(collection = E::COLLECTION))]
    pub async fn apply_update(&self, key: &E::Key, update: &Update) -> AppResult<E> {
        self.apply_update_if(key, Filter::new(), update)
            .await?
            .ok_or_else(|| not_found::<E>(key))
    }

    /// Like [`apply_update`](Self::apply_update) but only when the document
    /// also satisfies `condition`. `Ok(None)` when nothing matched; the cache
    /// is left alone in that case.
    pub async fn apply_update_if(
        &self,
        key: &E::Key,
        condition: Filter,
        update: &Update,
    ) -> AppResult<Option<E>> {
        let filter = E::key_filter(key).and(condition);
        let Some(doc) = self
            .store
            .find_one_and_update(E::COLLECTION, &filter, update)
            .await?
        else {
            return Ok(None);
        };

        let entity: E = from_document(doc)?;
        self.write_cache(&E::cache_key(key), &entity).await;
        Ok(Some(entity))
    }

    /// Delete from the store, then purge the cache entry whether or not the
    /// store had the document. Returns whether the store deleted one.
    #[instrument(skip(self), fields(collection = E::COLLECTION))]
    pub async fn delete(&self, key: &E::Key) -> AppResult<bool> {
        let deleted = self
            .store
            .delete_one(E::COLLECTION, &E::key_filter(key))
            .await?;
        self.invalidate(key).await;
        Ok(deleted)
    }

    pub async fn invalidate(&self, key: &E::Key) {
        self.invalidate_cache_key(&E::cache_key(key)).await;
    }

    /// Store query; results are not cached.
    pub async fn find_many(&self, filter: &Filter) -> AppResult<Vec<E>> {
        self.store
            .find_many(E::COLLECTION, filter)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Cache keys currently held for this entity type.
    pub async fn cached_keys(&self) -> AppResult<Vec<String>> {
        self.cache.keys(E::CACHE_PREFIX).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            backfills: self.metrics.backfills.load(Ordering::Relaxed),
            backfill_failures: self.metrics.backfill_failures.load(Ordering::Relaxed),
            invalidations: self.metrics.invalidations.load(Ordering::Relaxed),
        }
    }

    async fn write_cache(&self, cache_key: &str, entity: &E) {
        let result = match encode(entity) {
            Ok(payload) => self.cache.set(cache_key, payload).await,
            Err(e) => Err(e),
        };
        // The store already committed; an entry we could not overwrite must go.
        if let Err(e) = result {
            warn!("Cache write for {} failed, invalidating: {}", cache_key, e);
            self.invalidate_cache_key(cache_key).await;
        }
    }

    async fn invalidate_cache_key(&self, cache_key: &str) {
        match self.cache.delete(cache_key).await {
            Ok(_) => {
                self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!("Failed to purge cache entry {}: {}", cache_key, e),
        }
    }
}

fn not_found<E: CachedEntity>(key: &E::Key) -> AppError {
    AppError::NotFound(format!("{} {} not found", E::COLLECTION, key))
}

fn encode<E: Serialize>(entity: &E) -> AppResult<String> {
    serde_json::to_string(entity)
        .map_err(|e| AppError::SerializationError(format!("Failed to encode cache entry: {}", e)))
}

fn decode_cached<E: CachedEntity>(cache_key: &str, payload: &str) -> AppResult<E> {
    serde_json::from_str(payload).map_err(|e| {
        AppError::DeserializationError(format!("Corrupt cache entry {}: {}", cache_key, e))
    })
}
