//! Task-scoped document memory
//!
//! Abilities store and look up documents through [`MemoryStore`]; the agent
//! never knows which backend is active. Every call is keyed by task id and
//! documents of one task are invisible to another.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

pub mod sqlite;

pub use sqlite::SqliteMemoryStore;

/// Free-form document attributes (e.g. `filename`, `url`, `role`)
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub id: String,
    pub task_id: String,
    pub content: String,
    pub metadata: Metadata,
}

/// Lookup modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryQuery {
    /// Free-text relevance search
    Text(String),
    /// Exact match on a metadata attribute
    Field { key: String, value: String },
    /// Document id
    Id(String),
}

impl MemoryQuery {
    pub fn field(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Field {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a document and return its id
    async fn add(&self, task_id: &str, document: &str, metadata: Metadata) -> Result<String>;

    /// Matching documents, most relevant first
    async fn query(&self, task_id: &str, query: &MemoryQuery) -> Result<Vec<MemoryDocument>>;
}

fn new_doc_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Process-local store, lost on exit
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, Vec<MemoryDocument>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Number of query terms present in the document
fn text_score(content: &str, terms: &[String]) -> usize {
    let content = content.to_lowercase();
    terms.iter().filter(|t| content.contains(t.as_str())).count()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, task_id: &str, document: &str, metadata: Metadata) -> Result<String> {
        let id = new_doc_id();
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents
            .entry(task_id.to_string())
            .or_default()
            .push(MemoryDocument {
                id: id.clone(),
                task_id: task_id.to_string(),
                content: document.to_string(),
                metadata,
            });
        Ok(id)
    }

    async fn query(&self, task_id: &str, query: &MemoryQuery) -> Result<Vec<MemoryDocument>> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let Some(docs) = documents.get(task_id) else {
            return Ok(Vec::new());
        };

        let found = match query {
            MemoryQuery::Id(id) => docs.iter().filter(|d| &d.id == id).cloned().collect(),
            MemoryQuery::Field { key, value } => docs
                .iter()
                .filter(|d| d.metadata.get(key).and_then(|v| v.as_str()) == Some(value.as_str()))
                .cloned()
                .collect(),
            MemoryQuery::Text(text) => {
                let terms: Vec<String> =
                    text.split_whitespace().map(|t| t.to_lowercase()).collect();
                let mut scored: Vec<(usize, &MemoryDocument)> = docs
                    .iter()
                    .map(|d| (text_score(&d.content, &terms), d))
                    .filter(|(score, _)| *score > 0)
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0));
                scored.into_iter().map(|(_, d)| d.clone()).collect()
            }
        };

        Ok(found)
    }
}
