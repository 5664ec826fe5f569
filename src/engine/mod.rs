//! Statement execution against a resolved backend.
//!
//! [`ExecutionEngine::execute`] never returns an error: every failure is
//! encoded in the [`QueryResult`] status.
mod repair;
mod translate;

pub use repair::{repair, Repair, RepairKind};
pub use translate::{parse_mini_query, translate, ParsedMiniQuery, TranslateError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{
    CellValue, Document, DocumentStore, QueryResult, QueryStatus, RelationalBackend,
    DOCUMENT_ID_FIELD,
};
use crate::domain::ExecutionTarget;
use crate::guard;
use crate::router::{BackendHandle, BackendRegistry};
use crate::vocab::Vocabulary;

pub const DEFAULT_REPAIR_ROUNDS: usize = 1;

pub struct ExecutionEngine {
    registry: BackendRegistry,
    vocabulary: Arc<dyn Vocabulary>,
    max_repair_rounds: usize,
}

impl ExecutionEngine {
    pub fn new(registry: BackendRegistry, vocabulary: Arc<dyn Vocabulary>) -> Self {
        Self {
            registry,
            vocabulary,
            max_repair_rounds: DEFAULT_REPAIR_ROUNDS,
        }
    }

    pub fn with_max_repair_rounds(mut self, rounds: usize) -> Self {
        self.max_repair_rounds = rounds;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn vocabulary(&self) -> &dyn Vocabulary {
        self.vocabulary.as_ref()
    }

    pub async fn execute(&self, sql: &str, target: ExecutionTarget, max_rows: u64) -> QueryResult {
        let start = Instant::now();
        if let Err(e) = guard::validate(sql) {
            return QueryResult::failure(QueryStatus::Rejected, e.to_string(), start.elapsed());
        }
        let handle = match self.registry.handle(&target) {
            Ok(h) => h,
            Err(e) => {
                return QueryResult::failure(QueryStatus::Rejected, e.to_string(), start.elapsed())
            }
        };

        match handle {
            BackendHandle::Relational(backend) => {
                self.run_relational(backend.as_ref(), sql, target, max_rows, start)
                    .await
            }
            BackendHandle::Document(store) => run_document(store.as_ref(), sql, max_rows, start).await,
        }
    }

    async fn run_relational(
        &self,
        backend: &dyn RelationalBackend,
        sql: &str,
        target: ExecutionTarget,
        max_rows: u64,
        start: Instant,
    ) -> QueryResult {
        let mut current = guard::cap_rows(sql, max_rows);
        let mut rounds = 0;
        loop {
            let err = match backend.query(&current).await {
                Ok(rows) => {
                    tracing::info!(
                        target_id = %target,
                        backend = backend.name(),
                        rows = rows.rows.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "statement executed"
                    );
                    return QueryResult::from_rows(rows.columns, rows.rows, start.elapsed())
                        .with_executed_sql(current);
                }
                Err(e) => e,
            };
            tracing::warn!(target_id = %target, sql = %current, error = %err.display_full(), "execution failed");

            let failure = || {
                QueryResult::failure(QueryStatus::Failed, err.to_string(), start.elapsed())
                    .with_executed_sql(current.clone())
            };
            if rounds >= self.max_repair_rounds {
                return failure();
            }
            let aliases = self.vocabulary.table_alias_map(target.domain);
            let Some(fixed) = repair(&current, &err.message, &aliases) else {
                return failure();
            };
            if let Err(e) = guard::validate(&fixed.sql) {
                tracing::warn!(sql = %fixed.sql, error = %e, "repair discarded");
                return failure();
            }

            let kinds: Vec<String> = fixed.kinds.iter().map(|k| k.to_string()).collect();
            tracing::warn!(target_id = %target, repairs = ?kinds, sql = %fixed.sql, "retrying repaired statement");
            current = guard::cap_rows(&fixed.sql, max_rows);
            rounds += 1;
        }
    }
}

async fn run_document(
    store: &dyn DocumentStore,
    sql: &str,
    max_rows: u64,
    start: Instant,
) -> QueryResult {
    let query = match translate(sql, max_rows) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(sql = %sql, error = %e, "document translation refused");
            return QueryResult::failure(QueryStatus::Unsupported, e.to_string(), start.elapsed());
        }
    };
    tracing::debug!(store = store.name(), query = %query, "document find");

    match store.find(&query).await {
        Ok(docs) => documents_to_result(&query.projection, docs, start.elapsed())
            .with_executed_sql(query.to_string()),
        Err(e) => {
            tracing::warn!(query = %query, error = %e, "document find failed");
            QueryResult::failure(QueryStatus::Failed, e.to_string(), start.elapsed())
                .with_executed_sql(query.to_string())
        }
    }
}

/// Rows in document order. Columns are the projection, or the union of
/// field names in first-seen order (documents keep their keys sorted); the
/// internal id field never appears.
fn documents_to_result(projection: &[String], docs: Vec<Document>, elapsed: Duration) -> QueryResult {
    let columns: Vec<String> = if projection.is_empty() {
        let mut seen = Vec::new();
        for key in docs.iter().flat_map(|d| d.keys()) {
            if key != DOCUMENT_ID_FIELD && !seen.contains(key) {
                seen.push(key.clone());
            }
        }
        seen
    } else {
        projection
            .iter()
            .filter(|f| f.as_str() != DOCUMENT_ID_FIELD)
            .cloned()
            .collect()
    };

    let rows = docs
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|c| doc.get(c).map(CellValue::from_json).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();
    QueryResult::from_rows(columns, rows, elapsed)
}
