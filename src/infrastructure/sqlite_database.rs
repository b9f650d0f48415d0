use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{apply_update, ensure_id};
use crate::infrastructure::document::{Document, Filter, Update, ID_FIELD};
use crate::infrastructure::id_generator::DocumentIdGenerator;
use crate::infrastructure::traits::DocumentStore;

fn db_err(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(format!("{}: {}", context, e))
}

/// Body fields every entity is looked up by. Each gets an expression index
/// scoped to its collection.
const INDEXED_FIELDS: &[&str] = &["username", "post_number", "post_id", "recipient"];

fn decode_body(id: &str, body: &str) -> AppResult<Document> {
    serde_json::from_str(body)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt document {}: {}", id, e)))
}

/// SQLite-backed document store. Documents are JSON text rows keyed by
/// (collection, id). Equality clauses run in SQL through `json_extract`;
/// the rest of a filter is checked in-process on the narrowed rows.
///
/// The pool holds a single connection, so every statement and transaction is
/// serialized. That is what gives `find_one_and_update` its per-document
/// atomicity, and it keeps `sqlite::memory:` pointing at one database.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    ids: Arc<DocumentIdGenerator>,
}

impl SqliteDocumentStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| db_err("Invalid SQLite URL", e))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| db_err("Failed to connect to SQLite", e))?;

        let store = Self {
            pool,
            ids: Arc::new(DocumentIdGenerator::default()),
        };
        store.initialize().await?;
        info!("SQLite document store ready at {}", url);
        Ok(store)
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Create the documents table and its lookup indexes. Idempotent.
    pub async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to create documents table", e))?;

        for field in INDEXED_FIELDS {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_documents_{field} ON documents (collection, {})",
                json_column(field)
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(&format!("Failed to create {} index", field), e))?;
        }

        Ok(())
    }

    /// Rows of `collection` matching `filter`, in id order.
    async fn select_matching(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        filter: &Filter,
    ) -> AppResult<Vec<(String, Document)>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT id, body FROM documents WHERE collection = ");
        query.push_bind(collection.to_string());
        push_equalities(&mut query, filter);
        query.push(" ORDER BY id");

        let rows = query
            .build()
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| db_err("Failed to query collection", e))?;

        let mut matched = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let body: String = row.get("body");
            let doc = decode_body(&id, &body)?;
            if filter.matches(&doc) {
                matched.push((id, doc));
            }
        }
        Ok(matched)
    }

    async fn first_match(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        filter: &Filter,
    ) -> AppResult<Option<(String, Document)>> {
        Ok(Self::select_matching(tx, collection, filter)
            .await?
            .into_iter()
            .next())
    }

    async fn begin(&self) -> AppResult<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))
    }

    async fn commit(tx: Transaction<'_, Sqlite>) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit transaction", e))
    }
}

fn json_column(field: &str) -> String {
    format!("json_extract(body, '$.{}')", field)
}

/// Only plain dotted identifiers are spliced into SQL as JSON paths.
fn is_plain_path(field: &str) -> bool {
    !field.is_empty()
        && field
            .split('.')
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Append ` AND <column> = ?` for every equality SQLite can compare the way
/// `Filter::matches` does. Anything else is left to the in-process check.
fn push_equalities(query: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    for (field, value) in filter.equalities() {
        if field == ID_FIELD {
            if let Value::String(id) = value {
                query.push(" AND id = ");
                query.push_bind(id.clone());
            }
            continue;
        }
        if !is_plain_path(field) {
            continue;
        }
        match value {
            Value::String(text) => {
                query.push(format!(" AND {} = ", json_column(field)));
                query.push_bind(text.clone());
            }
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    query.push(format!(" AND {} = ", json_column(field)));
                    query.push_bind(integer);
                }
            }
            Value::Bool(flag) => {
                query.push(format!(" AND {} = ", json_column(field)));
                query.push_bind(*flag);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>> {
        let mut tx = self.begin().await?;
        let found = Self::first_match(&mut tx, collection, filter).await?;
        Self::commit(tx).await?;
        Ok(found.map(|(_, doc)| doc))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>> {
        let mut tx = self.begin().await?;
        let docs = Self::select_matching(&mut tx, collection, filter).await?;
        Self::commit(tx).await?;
        Ok(docs.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> AppResult<String> {
        let id = ensure_id(&mut doc, &self.ids)?;
        let body = serde_json::to_string(&doc)
            .map_err(|e| AppError::SerializationError(format!("Failed to encode document: {}", e)))?;

        let result = sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(body)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!("Inserted document {} into {}", id, collection);
                Ok(id)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                format!("document {} already exists in {}", id, collection),
            )),
            Err(e) => Err(db_err("Failed to insert document", e)),
        }
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
        let mut tx = self.begin().await?;
        let Some((id, doc)) = Self::first_match(&mut tx, collection, filter).await? else {
            Self::commit(tx).await?;
            return Ok(None);
        };

        let updated = apply_update(&doc, update)?;
        let body = serde_json::to_string(&updated)
            .map_err(|e| AppError::SerializationError(format!("Failed to encode document: {}", e)))?;

        sqlx::query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
            .bind(body)
            .bind(collection)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to update document", e))?;

        Self::commit(tx).await?;
        debug!("Updated document {} in {}", id, collection);
        Ok(Some(updated))
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> AppResult<bool> {
        let mut tx = self.begin().await?;
        let Some((id, _)) = Self::first_match(&mut tx, collection, filter).await? else {
            Self::commit(tx).await?;
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to delete document", e))?;

        Self::commit(tx).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{POSTS, USERS};
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_in_memory() {
        let store = SqliteDocumentStore::new_in_memory().await.unwrap();
        let id = store
            .insert_one(USERS, json!({"username": "alice", "post_count": 0}))
            .await
            .unwrap();

        let updated = store
            .find_one_and_update(
                USERS,
                &Filter::by_id(&id),
                &Update::new().inc("post_count", 1),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["post_count"], 1);

        assert!(store.delete_one(USERS, &Filter::by_id(&id)).await.unwrap());
        assert!(store
            .find_one(USERS, &Filter::by_id(&id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("social.db").display());

        {
            let store = SqliteDocumentStore::connect(&url).await.unwrap();
            store
                .insert_one(POSTS, json!({"username": "alice", "post_number": 1, "content": "hi"}))
                .await
                .unwrap();
        }

        let store = SqliteDocumentStore::connect(&url).await.unwrap();
        let posts = store
            .find_many(POSTS, &Filter::new().eq("username", "alice"))
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_conflict() {
        let store = SqliteDocumentStore::new_in_memory().await.unwrap();
        store
            .insert_one(USERS, json!({"_id": "fixed", "username": "alice"}))
            .await
            .unwrap();

        let err = store
            .insert_one(USERS, json!({"_id": "fixed", "username": "bob"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_filters_narrow_in_sql_and_in_process() {
        let store = SqliteDocumentStore::new_in_memory().await.unwrap();
        for (user, n) in [("alice", 1), ("alice", 2), ("bob", 1)] {
            store
                .insert_one(
                    POSTS,
                    json!({"username": user, "post_number": n, "likes": {"carol": "t"}, "read_status": false}),
                )
                .await
                .unwrap();
        }

        let found = store
            .find_one(POSTS, &Filter::new().eq("username", "alice").eq("post_number", 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["post_number"], 2);

        let unread = store
            .find_many(POSTS, &Filter::new().eq("read_status", false).eq("username", "bob"))
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);

        // `missing` is evaluated after the SQL narrowing.
        let not_liked = Filter::new()
            .eq("username", "alice")
            .eq("post_number", 1)
            .missing("likes.carol");
        assert!(store
            .find_one_and_update(POSTS, &not_liked, &Update::new().set("likes.carol", "t2"))
            .await
            .unwrap()
            .is_none());

        let liked = Filter::new().eq("username", "alice").missing("likes.dave");
        let updated = store
            .find_one_and_update(POSTS, &liked, &Update::new().set("likes.dave", "t3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["likes"]["dave"], "t3");
        assert!(!store
            .delete_one(POSTS, &Filter::new().eq("username", "nobody"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_key_lookup_uses_index() {
        let store = SqliteDocumentStore::new_in_memory().await.unwrap();
        let rows = sqlx::query(
            "EXPLAIN QUERY PLAN SELECT id, body FROM documents \
             WHERE collection = 'users' AND json_extract(body, '$.username') = 'alice'",
        )
        .fetch_all(&store.pool)
        .await
        .unwrap();

        let plan: Vec<String> = rows.iter().map(|row| row.get::<String, _>("detail")).collect();
        assert!(
            plan.iter().any(|step| step.contains("idx_documents_username")),
            "plan was {:?}",
            plan
        );
    }
}
