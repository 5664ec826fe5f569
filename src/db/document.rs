use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use super::{DocumentStore, StructuredError};

/// A stored document.
pub type Document = Map<String, Value>;

/// Internal identifier field every document store adds.
pub const DOCUMENT_ID_FIELD: &str = "_id";

/// A find request: conjunctive equality filter, optional projection, limit.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub filter: Document,
    /// Empty means every field.
    pub projection: Vec<String>,
    /// `None` returns every match.
    pub limit: Option<u64>,
}

impl DocumentQuery {
    pub fn projection_document(&self) -> Document {
        self.projection
            .iter()
            .map(|f| (f.clone(), Value::from(1)))
            .collect()
    }
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "db.{}.find({}, {})",
            self.collection,
            Value::Object(self.filter.clone()),
            Value::Object(self.projection_document()),
        )?;
        match self.limit {
            Some(n) => write!(f, ".limit({})", n),
            None => Ok(()),
        }
    }
}

/// Document store backed by JSON held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    collections: HashMap<String, Vec<Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: &str, documents: Vec<Value>) -> Self {
        let docs = documents
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.collections.insert(name.to_string(), docs);
        self
    }

    /// Load `{ "<collection>": [ {..}, .. ], .. }` from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document fixtures: {}", path.display()))?;
        let parsed: HashMap<String, Vec<Value>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid document fixtures: {}", path.display()))?;
        Ok(parsed
            .into_iter()
            .fold(Self::new(), |store, (name, docs)| store.with_collection(&name, docs)))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Vec<Document>, StructuredError> {
        let docs = self.collections.get(&query.collection).ok_or_else(|| {
            StructuredError::from_string(format!(
                "collection `{}` does not exist",
                query.collection
            ))
        })?;

        Ok(docs
            .iter()
            .filter(|doc| {
                query
                    .filter
                    .iter()
                    .all(|(k, v)| doc.get(k).is_some_and(|dv| values_equal(dv, v)))
            })
            .take(query.limit.map_or(usize::MAX, |n| n as usize))
            .map(|doc| project(doc, &query.projection))
            .collect())
    }
}

fn project(doc: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return doc.clone();
    }
    let mut out = Map::new();
    if let Some(id) = doc.get(DOCUMENT_ID_FIELD) {
        out.insert(DOCUMENT_ID_FIELD.to_string(), id.clone());
    }
    for f in fields {
        if let Some(v) = doc.get(f) {
            out.insert(f.clone(), v.clone());
        }
    }
    out
}

/// Equality with numeric widening, so `1` matches `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}
