//! Search index mirror.
//!
//! Keeps an external full-text index in step with committed rows of
//! searchable tables and answers text queries with rows loaded back from
//! the database in the order the index ranked them.
//!
//! Everything here degrades to a no-op when no backend is configured, and
//! backend failures are logged rather than returned to request handlers.

mod backend;
mod elasticsearch;

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::config::{Config, REINDEX_CHUNK_SIZE};

pub use backend::{BulkFailure, MemorySearchBackend, SearchBackend, SearchError, SearchHits};
pub use elasticsearch::ElasticsearchBackend;

/// A persisted type whose fields are mirrored into a search index.
pub trait Searchable: Serialize {
    /// Table the rows live in.
    const TABLE: &'static str;
    /// Fields copied into the index document.
    const SEARCHABLE_FIELDS: &'static [&'static str];

    fn search_id(&self) -> i64;

    fn index_name() -> &'static str {
        Self::TABLE
    }

    fn document(&self) -> Value {
        let mut document = serde_json::Map::new();
        if let Ok(Value::Object(fields)) = serde_json::to_value(self) {
            for field in Self::SEARCHABLE_FIELDS {
                if let Some(value) = fields.get(*field) {
                    document.insert((*field).to_string(), value.clone());
                }
            }
        }
        Value::Object(document)
    }
}

/// Something that can be loaded back from the database by the ids a
/// search returned.
pub trait SearchLoad: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    /// `SELECT ... FROM ...` without a `WHERE` clause.
    const SELECT: &'static str;
    const ID_COLUMN: &'static str = "id";
}

/// Index mutation recorded by a unit of work, applied after commit.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexChange {
    Upsert {
        index: &'static str,
        id: i64,
        document: Value,
    },
    Remove {
        index: &'static str,
        id: i64,
    },
}

impl IndexChange {
    pub fn upsert<T: Searchable>(entity: &T) -> Self {
        IndexChange::Upsert {
            index: T::index_name(),
            id: entity.search_id(),
            document: entity.document(),
        }
    }

    pub fn remove<T: Searchable>(entity: &T) -> Self {
        IndexChange::Remove {
            index: T::index_name(),
            id: entity.search_id(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReindexReport {
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct SearchMirror {
    backend: Option<Arc<dyn SearchBackend>>,
}

impl SearchMirror {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    /// `ELASTICSEARCH_URL` wins; `SEARCH_BACKEND=memory` selects the
    /// in-process index; otherwise search is disabled.
    pub fn from_config(config: &Config) -> Result<Self, SearchError> {
        if let Some(url) = &config.elasticsearch_url {
            let backend = ElasticsearchBackend::new(url)?;
            return Ok(Self::new(Arc::new(backend)));
        }
        match config.search_backend.as_deref() {
            Some("memory") => Ok(Self::new(Arc::new(MemorySearchBackend::new()))),
            Some(other) => Err(SearchError::Unexpected(format!(
                "unknown search backend '{}'",
                other
            ))),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn create_index(&self, index: &str) -> Result<(), SearchError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        if !backend.index_exists(index).await? {
            backend.create_index(index).await?;
            tracing::info!(index, "search index created");
        }
        Ok(())
    }

    pub async fn add_to_index(&self, index: &str, id: i64, document: &Value) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(err) = backend.index_document(index, id, document).await {
            tracing::error!(index, id, error = %err, "failed to index document");
        }
    }

    pub async fn remove_from_index(&self, index: &str, id: i64) {
        let Some(backend) = &self.backend else {
            return;
        };
        if let Err(err) = backend.delete_document(index, id).await {
            tracing::error!(index, id, error = %err, "failed to remove document");
        }
    }

    /// Ranked ids for one page of results plus the total hit count.
    pub async fn query_index(
        &self,
        index: &str,
        expression: &str,
        page: usize,
        per_page: usize,
    ) -> (Vec<i64>, u64) {
        let Some(backend) = &self.backend else {
            return (Vec::new(), 0);
        };
        let from = page.saturating_sub(1).saturating_mul(per_page);
        match backend.query(index, expression, from, per_page).await {
            Ok(hits) => (hits.ids, hits.total),
            Err(err) => {
                tracing::error!(index, error = %err, "search query failed");
                (Vec::new(), 0)
            }
        }
    }

    /// Applies changes recorded before a successful commit.
    pub async fn apply(&self, changes: Vec<IndexChange>) {
        for change in changes {
            match change {
                IndexChange::Upsert {
                    index,
                    id,
                    document,
                } => self.add_to_index(index, id, &document).await,
                IndexChange::Remove { index, id } => self.remove_from_index(index, id).await,
            }
        }
    }

    /// Runs `expression` against `index` and loads the matching rows in
    /// ranking order.
    pub async fn search<T: SearchLoad>(
        &self,
        pool: &SqlitePool,
        index: &str,
        expression: &str,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<T>, u64), sqlx::Error> {
        let (ids, total) = self.query_index(index, expression, page, per_page).await;
        if total == 0 || ids.is_empty() {
            return Ok((Vec::new(), total));
        }
        let rows = load_in_order::<T>(pool, &ids).await?;
        Ok((rows, total))
    }

    /// Empties the index and rebuilds it from every row of `T`'s table.
    pub async fn reindex<T>(&self, pool: &SqlitePool) -> Result<ReindexReport, SearchError>
    where
        T: Searchable + SearchLoad,
    {
        let Some(backend) = &self.backend else {
            return Ok(ReindexReport::default());
        };
        let index = T::index_name();
        backend.delete_all(index).await?;

        let mut report = ReindexReport::default();
        let mut chunks = sqlx::query_as::<_, T>(T::SELECT)
            .fetch(pool)
            .chunks(REINDEX_CHUNK_SIZE);

        while let Some(chunk) = chunks.next().await {
            let mut documents = Vec::with_capacity(chunk.len());
            for row in chunk {
                let entity = row?;
                documents.push((entity.search_id(), entity.document()));
            }
            let sent = documents.len();
            let failures = backend.bulk_index(index, documents).await?;
            for failure in &failures {
                tracing::error!(
                    index,
                    id = failure.id,
                    status = failure.status,
                    error = %failure.error,
                    "failed to index document during reindex"
                );
            }
            report.failed += failures.len();
            report.indexed += sent - failures.len();
        }

        if report.failed > 0 {
            tracing::error!(index, errors = report.failed, "bulk indexing finished with errors");
        } else {
            tracing::info!(index, documents = report.indexed, "reindex finished");
        }
        Ok(report)
    }
}

async fn load_in_order<T: SearchLoad>(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<T>, sqlx::Error> {
    let mut query = QueryBuilder::<Sqlite>::new(T::SELECT);
    query.push(" WHERE ").push(T::ID_COLUMN).push(" IN (");
    {
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
    }
    query.push(") ORDER BY CASE ").push(T::ID_COLUMN);
    for (position, id) in ids.iter().enumerate() {
        query
            .push(" WHEN ")
            .push_bind(*id)
            .push(" THEN ")
            .push_bind(position as i64);
    }
    query.push(" END");
    query.build_query_as::<T>().fetch_all(pool).await
}
