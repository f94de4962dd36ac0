// Document store interface - the engine only consumes this contract; real
// backends live with the host service.

use crate::error::{DocflowError, Result};
use crate::reference::resolve_field_reference;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use ulid::Ulid;

/// An exact-match conjunction over raw field values. This is the only query
/// shape the engine builds (uniqueness checks).
#[derive(Debug, Clone, Default)]
pub struct Query {
    terms: Vec<(String, Value)>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    /// Add an exact-match term; all terms must match.
    pub fn term(mut self, field: impl Into<String>, value: Value) -> Self {
        self.terms.push((field.into(), value));
        self
    }

    pub fn terms(&self) -> &[(String, Value)] {
        &self.terms
    }
}

/// Abstract document store consumed by the validator and processor.
///
/// All returned documents carry `_id` and `_version`.
pub trait DocumentStore {
    /// Fetch one document; [`DocflowError::NotFound`] if it does not exist.
    fn get(&self, index: &str, doc_type: &str, id: &str) -> Result<Value>;

    /// Execute an exact-match query; returns the hits plus a backend cost
    /// metric (documents scanned, shards queried, ...).
    fn search(&self, index: &str, doc_type: &str, query: &Query) -> Result<(Vec<Value>, u64)>;

    /// Store a new document, assigning an id when none is given.
    fn create(&self, index: &str, doc_type: &str, document: Value, id: Option<&str>)
        -> Result<Value>;

    /// Merge a partial document into an existing one, bumping its version.
    fn update(&self, index: &str, doc_type: &str, id: &str, partial: Value) -> Result<Value>;
}

type Collections = HashMap<(String, String), BTreeMap<String, Value>>;

/// In-memory [`DocumentStore`] used by tests and embedding examples.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|_| DocflowError::Store("store lock poisoned".into()))
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, index: &str, doc_type: &str, id: &str) -> Result<Value> {
        let collections = self.lock()?;
        collections
            .get(&(index.to_string(), doc_type.to_string()))
            .and_then(|documents| documents.get(id))
            .cloned()
            .ok_or_else(|| DocflowError::NotFound {
                index: index.to_string(),
                doc_type: doc_type.to_string(),
                id: id.to_string(),
            })
    }

    fn search(&self, index: &str, doc_type: &str, query: &Query) -> Result<(Vec<Value>, u64)> {
        let collections = self.lock()?;
        let Some(documents) = collections.get(&(index.to_string(), doc_type.to_string())) else {
            return Ok((Vec::new(), 0));
        };

        let scanned = documents.len() as u64;
        let hits = documents
            .values()
            .filter(|document| {
                query.terms().iter().all(|(field, value)| {
                    resolve_field_reference(field, None, document)
                        .iter()
                        .any(|resolved| resolved == value)
                })
            })
            .cloned()
            .collect();

        Ok((hits, scanned))
    }

    fn create(
        &self,
        index: &str,
        doc_type: &str,
        document: Value,
        id: Option<&str>,
    ) -> Result<Value> {
        let mut stored = match document {
            Value::Object(map) => map,
            other => {
                return Err(DocflowError::Store(format!(
                    "cannot store non-object document: {other}"
                )))
            }
        };

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Ulid::new().to_string().to_lowercase());

        let mut collections = self.lock()?;
        let documents = collections
            .entry((index.to_string(), doc_type.to_string()))
            .or_default();

        if documents.contains_key(&id) {
            return Err(DocflowError::Store(format!(
                "document {index}/{doc_type}/{id} already exists"
            )));
        }

        stored.insert("_id".into(), Value::String(id.clone()));
        stored.insert("_version".into(), Value::from(1));

        let stored = Value::Object(stored);
        documents.insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, index: &str, doc_type: &str, id: &str, partial: Value) -> Result<Value> {
        let mut collections = self.lock()?;
        let existing = collections
            .get_mut(&(index.to_string(), doc_type.to_string()))
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| DocflowError::NotFound {
                index: index.to_string(),
                doc_type: doc_type.to_string(),
                id: id.to_string(),
            })?;

        let (Some(target), Some(fields)) = (existing.as_object_mut(), partial.as_object()) else {
            return Err(DocflowError::Store(
                "partial update requires object documents".into(),
            ));
        };

        for (key, value) in fields {
            if key != "_id" && key != "_version" {
                target.insert(key.clone(), value.clone());
            }
        }

        let version = target.get("_version").and_then(Value::as_u64).unwrap_or(0);
        target.insert("_version".into(), Value::from(version + 1));

        Ok(existing.clone())
    }
}
