// Document Store Adapter - collection/filter/update operations over JSON documents
// The in-memory implementation backs tests and the default `memory` deployment.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::document::{id_of, Document, Filter, Update, ID_FIELD};
use crate::infrastructure::id_generator::DocumentIdGenerator;
use crate::infrastructure::traits::DocumentStore;

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const NOTIFICATIONS: &str = "notifications";

type Collection = BTreeMap<String, Document>;

/// Assign `_id` if the document lacks one and return it.
pub(crate) fn ensure_id(doc: &mut Document, ids: &DocumentIdGenerator) -> AppResult<String> {
    let object = doc
        .as_object_mut()
        .ok_or_else(|| AppError::Validation("documents must be JSON objects".to_string()))?;

    match object.get(ID_FIELD).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => {
            let id = ids.next_id();
            object.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// Apply `update` to a scratch copy so a failing op leaves `doc` untouched.
pub(crate) fn apply_update(doc: &Document, update: &Update) -> AppResult<Document> {
    let mut scratch = doc.clone();
    update.apply(&mut scratch)?;
    Ok(scratch)
}

/// In-memory document store. One lock guards all collections, which gives
/// every operation document-level atomicity.
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    ids: Arc<DocumentIdGenerator>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            ids: Arc::new(DocumentIdGenerator::default()),
        }
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.values().find(|doc| filter.matches(doc)).cloned()))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> AppResult<String> {
        let id = ensure_id(&mut doc, &self.ids)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(AppError::Conflict(format!(
                "document {} already exists in {}",
                id, collection
            )));
        }
        docs.insert(id.clone(), doc);
        debug!("Inserted document {} into {}", id, collection);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<bool> {
        Ok(self
            .find_one_and_update(collection, filter, update)
            .await?
            .is_some())
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<Option<Document>> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.values_mut().find(|doc| filter.matches(doc)) else {
            return Ok(None);
        };

        let updated = apply_update(doc, update)?;
        *doc = updated.clone();
        debug!(
            "Updated document {} in {}",
            id_of(&updated).unwrap_or("?"),
            collection
        );
        Ok(Some(updated))
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> AppResult<bool> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let id = docs
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id.clone());

        Ok(match id {
            Some(id) => docs.remove(&id).is_some(),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_ids_and_finds() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .insert_one(USERS, json!({"username": "alice"}))
            .await
            .unwrap();

        let found = store
            .find_one(USERS, &Filter::new().eq("username", "alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id_of(&found), Some(id.as_str()));
        assert!(store
            .find_one(USERS, &Filter::new().eq("username", "bob"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_applies_once() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one(POSTS, json!({"username": "alice", "post_number": 1, "number_of_likes": 0}))
            .await
            .unwrap();

        let filter = Filter::new()
            .eq("username", "alice")
            .eq("post_number", 1)
            .missing("likes.bob");
        let update = Update::new().set("likes.bob", "now").inc("number_of_likes", 1);

        assert!(store.update_one(POSTS, &filter, &update).await.unwrap());
        assert!(!store.update_one(POSTS, &filter, &update).await.unwrap());

        let post = store
            .find_one(POSTS, &Filter::new().eq("username", "alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post["number_of_likes"], 1);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_document_untouched() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one(POSTS, json!({"content": "hi", "number_of_likes": 0}))
            .await
            .unwrap();

        let update = Update::new().inc("number_of_likes", 1).inc("content", 1);
        assert!(store.update_one(POSTS, &Filter::new(), &update).await.is_err());

        let post = store.find_one(POSTS, &Filter::new()).await.unwrap().unwrap();
        assert_eq!(post["number_of_likes"], 0);
    }

    #[tokio::test]
    async fn test_delete_reports_missing() {
        let store = InMemoryDocumentStore::new();
        let id = store.insert_one(COMMENTS, json!({"content": "x"})).await.unwrap();

        assert!(store.delete_one(COMMENTS, &Filter::by_id(&id)).await.unwrap());
        assert!(!store.delete_one(COMMENTS, &Filter::by_id(&id)).await.unwrap());
        assert_eq!(store.count(COMMENTS).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one(USERS, json!({"username": "alice", "post_count": 0}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_one(
                        USERS,
                        &Filter::new().eq("username", "alice"),
                        &Update::new().inc("post_count", 1),
                    )
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let user = store.find_one(USERS, &Filter::new()).await.unwrap().unwrap();
        assert_eq!(user["post_count"], 50);
    }
}
