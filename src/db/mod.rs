mod connection;
mod document;
mod mysql;
mod postgres;
mod query;
#[cfg(test)]
pub(crate) mod scripted;

pub use connection::*;
pub use document::*;
pub use mysql::*;
pub use postgres::*;
pub use query::*;

use async_trait::async_trait;

/// Column names plus decoded rows as returned by a driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// A SQL backend. One statement per call.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    /// Short backend name for logs (`postgres`, `mysql`).
    fn name(&self) -> &'static str;

    async fn query(&self, sql: &str) -> Result<RowSet, StructuredError>;
}

/// A document store queried with a conjunctive equality filter.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(&self, query: &DocumentQuery) -> Result<Vec<Document>, StructuredError>;
}
