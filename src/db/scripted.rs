//! In-process relational backend driven by a closure, for tests.
use async_trait::async_trait;
use std::sync::Mutex;

use super::{CellValue, RelationalBackend, RowSet, StructuredError};

type Handler = Box<dyn Fn(&str) -> Result<RowSet, StructuredError> + Send + Sync>;

pub struct ScriptedBackend {
    handler: Handler,
    seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(
        handler: impl Fn(&str) -> Result<RowSet, StructuredError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the given rows.
    pub fn returning(rows: RowSet) -> Self {
        Self::new(move |_| Ok(rows.clone()))
    }

    /// Every statement executed so far, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RelationalBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn query(&self, sql: &str) -> Result<RowSet, StructuredError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(sql.to_string());
        }
        (self.handler)(sql)
    }
}

/// Build a row set from string-ish columns and cells.
pub fn rowset(columns: &[&str], rows: Vec<Vec<CellValue>>) -> RowSet {
    RowSet {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}
