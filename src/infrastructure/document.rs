// Document model shared by every DocumentStore implementation.
// Filters and updates address fields by dotted path ("likes.alice").
// An Update is applied to one document at a time, so a store that holds its
// per-document lock around `Update::apply` gets per-document atomicity.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

pub type Document = Value;

/// Field carrying the store-assigned identifier.
pub const ID_FIELD: &str = "_id";

/// Conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Eq(String, Value),
    Missing(String),
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    /// Matches when the dotted path does not resolve to a value.
    pub fn missing(mut self, field: &str) -> Self {
        self.clauses.push(Clause::Missing(field.to_string()));
        self
    }

    /// Conjunction of both filters.
    pub fn and(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Equality clauses in insertion order, for stores that can evaluate
    /// them natively before falling back to [`matches`](Self::matches).
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.clauses.iter().filter_map(|clause| match clause {
            Clause::Eq(field, value) => Some((field.as_str(), value)),
            Clause::Missing(_) => None,
        })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, expected) => lookup(doc, field) == Some(expected),
            Clause::Missing(field) => matches!(lookup(doc, field), None | Some(Value::Null)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum UpdateOp {
    Set(String, Value),
    Inc(String, i64),
    AddToSet(String, Value),
}

/// Ordered list of field mutations applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.to_string(), value.into()));
        self
    }

    pub fn inc(mut self, field: &str, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.to_string(), by));
        self
    }

    pub fn add_to_set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops
            .push(UpdateOp::AddToSet(field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every op to `doc`. On error the document may be partially
    /// modified, so callers apply to a scratch copy and swap on success.
    pub fn apply(&self, doc: &mut Document) -> AppResult<()> {
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    if field == ID_FIELD {
                        return Err(AppError::Validation("cannot overwrite _id".to_string()));
                    }
                    *slot(doc, field)? = value.clone();
                }
                UpdateOp::Inc(field, by) => {
                    let target = slot(doc, field)?;
                    let current = match &*target {
                        Value::Null => 0,
                        Value::Number(n) => n.as_i64().ok_or_else(|| {
                            AppError::Validation(format!("field {} is not an integer", field))
                        })?,
                        _ => {
                            return Err(AppError::Validation(format!(
                                "field {} is not numeric",
                                field
                            )))
                        }
                    };
                    *target = Value::from(current + by);
                }
                UpdateOp::AddToSet(field, value) => {
                    let array = array_slot(doc, field)?;
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn slot<'a>(doc: &'a mut Document, path: &str) -> AppResult<&'a mut Value> {
    let mut current = doc;
    for segment in path.split('.') {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let object = current.as_object_mut().ok_or_else(|| {
            AppError::Validation(format!("path {} crosses a non-object value", path))
        })?;
        current = object.entry(segment.to_string()).or_insert(Value::Null);
    }
    Ok(current)
}

fn array_slot<'a>(doc: &'a mut Document, path: &str) -> AppResult<&'a mut Vec<Value>> {
    let target = slot(doc, path)?;
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    target
        .as_array_mut()
        .ok_or_else(|| AppError::Validation(format!("field {} is not an array", path)))
}

pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

pub fn to_document<T: Serialize>(value: &T) -> AppResult<Document> {
    serde_json::to_value(value)
        .map_err(|e| AppError::SerializationError(format!("Failed to encode document: {}", e)))
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> AppResult<T> {
    serde_json::from_value(doc)
        .map_err(|e| AppError::DatabaseError(format!("Failed to decode document: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_and_missing() {
        let doc = json!({"username": "alice", "likes": {"bob": "t1"}});

        assert!(Filter::new().eq("username", "alice").matches(&doc));
        assert!(!Filter::new().eq("username", "bob").matches(&doc));
        assert!(Filter::new().missing("likes.carol").matches(&doc));
        assert!(!Filter::new().missing("likes.bob").matches(&doc));

        let combined = Filter::new()
            .eq("username", "alice")
            .and(Filter::new().missing("likes.bob"));
        assert!(!combined.matches(&doc));
        let equalities: Vec<_> = combined.equalities().collect();
        assert_eq!(equalities, vec![("username", &json!("alice"))]);
    }

    #[test]
    fn test_update_ops() {
        let mut doc = json!({"post_count": 1, "friends": ["bob"]});
        Update::new()
            .inc("post_count", 1)
            .add_to_set("friends", "bob")
            .add_to_set("friends", "carol")
            .add_to_set("notifications", "n1")
            .set("likes.dave", "t2")
            .apply(&mut doc)
            .unwrap();

        assert_eq!(doc["post_count"], 2);
        assert_eq!(doc["friends"], json!(["bob", "carol"]));
        assert_eq!(doc["notifications"], json!(["n1"]));
        assert_eq!(doc["likes"]["dave"], "t2");
    }

    #[test]
    fn test_update_rejects_id_overwrite() {
        let mut doc = json!({"_id": "a"});
        let result = Update::new().set("_id", "b").apply(&mut doc);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_inc_on_non_numeric_fails() {
        let mut doc = json!({"content": "hi"});
        assert!(Update::new().inc("content", 1).apply(&mut doc).is_err());
    }
}
