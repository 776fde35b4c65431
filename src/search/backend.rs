use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected search response: {0}")]
    Unexpected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One page of ranked ids and the total number of matches.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchHits {
    pub ids: Vec<i64>,
    pub total: u64,
}

/// A document the backend refused during a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: i64,
    pub status: u16,
    pub error: String,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError>;

    async fn create_index(&self, index: &str) -> Result<(), SearchError>;

    /// Inserts or replaces the document stored under `id`.
    async fn index_document(&self, index: &str, id: i64, document: &Value) -> Result<(), SearchError>;

    /// Deleting a document that is not there succeeds.
    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError>;

    async fn query(
        &self,
        index: &str,
        expression: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchHits, SearchError>;

    async fn delete_all(&self, index: &str) -> Result<(), SearchError>;

    /// Indexes a batch, reporting documents that failed without failing the
    /// whole batch.
    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(i64, Value)>,
    ) -> Result<Vec<BulkFailure>, SearchError>;
}

/// In-process index used by tests and by `SEARCH_BACKEND=memory`.
///
/// Scores a document by how many times the query terms occur in its string
/// fields; ties go to the lower id.
#[derive(Clone, Default)]
pub struct MemorySearchBackend {
    indices: Arc<RwLock<HashMap<String, BTreeMap<i64, Value>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until switched back, to exercise degraded paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn document(&self, index: &str, id: i64) -> Option<Value> {
        self.indices.read().get(index)?.get(&id).cloned()
    }

    pub fn len(&self, index: &str) -> usize {
        self.indices.read().get(index).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    fn check(&self) -> Result<(), SearchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SearchError::Unavailable("memory backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.extend(tokenize(text)),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Object(fields) => fields.values().for_each(|field| collect_text(field, out)),
        _ => {}
    }
}

fn score(document: &Value, terms: &[String]) -> usize {
    let mut tokens = Vec::new();
    collect_text(document, &mut tokens);
    terms
        .iter()
        .map(|term| tokens.iter().filter(|token| *token == term).count())
        .sum()
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchError> {
        self.check()?;
        Ok(self.indices.read().contains_key(index))
    }

    async fn create_index(&self, index: &str) -> Result<(), SearchError> {
        self.check()?;
        self.indices.write().entry(index.to_string()).or_default();
        Ok(())
    }

    async fn index_document(&self, index: &str, id: i64, document: &Value) -> Result<(), SearchError> {
        self.check()?;
        if !document.is_object() {
            return Err(SearchError::Status {
                status: 400,
                body: "document must be an object".to_string(),
            });
        }
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .insert(id, document.clone());
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError> {
        self.check()?;
        if let Some(documents) = self.indices.write().get_mut(index) {
            documents.remove(&id);
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        expression: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchHits, SearchError> {
        self.check()?;
        let terms = tokenize(expression);
        let indices = self.indices.read();
        let Some(documents) = indices.get(index) else {
            return Ok(SearchHits::default());
        };

        let mut ranked: Vec<(usize, i64)> = documents
            .iter()
            .map(|(id, document)| (score(document, &terms), *id))
            .filter(|(score, _)| *score > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(SearchHits {
            total: ranked.len() as u64,
            ids: ranked.into_iter().skip(from).take(size).map(|(_, id)| id).collect(),
        })
    }

    async fn delete_all(&self, index: &str) -> Result<(), SearchError> {
        self.check()?;
        if let Some(documents) = self.indices.write().get_mut(index) {
            documents.clear();
        }
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: Vec<(i64, Value)>,
    ) -> Result<Vec<BulkFailure>, SearchError> {
        self.check()?;
        let mut failures = Vec::new();
        let mut indices = self.indices.write();
        let target = indices.entry(index.to_string()).or_default();
        for (id, document) in documents {
            if document.is_object() {
                target.insert(id, document);
            } else {
                failures.push(BulkFailure {
                    id,
                    status: 400,
                    error: "document must be an object".to_string(),
                });
            }
        }
        Ok(failures)
    }
}
