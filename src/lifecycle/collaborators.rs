//! Interfaces the lifecycle controller drives.
//!
//! Each collaborator is a narrow async trait so the controller can run
//! against a real database and language model or against test doubles.

use async_trait::async_trait;

use crate::db::QueryResult;
use crate::error::Result;
use crate::safety::ErrorKind;

/// Runs SQL against a named database.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes `sql` on `database`. Database failures are returned as
    /// `WardenError::Query` carrying the driver message.
    async fn execute(&self, sql: &str, database: &str) -> Result<QueryResult>;
}

/// Estimates how many rows a data-modifying statement would touch.
#[async_trait]
pub trait RowEstimator: Send + Sync {
    /// Returns `None` when no estimate can be produced.
    async fn estimate_affected_rows(&self, sql: &str, database: &str) -> Option<u64>;
}

/// Lists the tables of a database.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;
}

/// Everything a repairer gets to work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    /// SQL the session started with.
    pub original_sql: String,
    /// SQL that produced `error_text`. Equals `original_sql` on the first repair.
    pub failed_sql: String,
    pub error_text: String,
    pub error_kind: ErrorKind,
    pub database: String,
    /// The natural-language request behind the SQL, when there is one.
    pub question: Option<String>,
}

/// Produces a candidate correction for failed SQL.
#[async_trait]
pub trait Repairer: Send + Sync {
    /// Returns candidate SQL. An `Err` means no candidate could be produced.
    async fn repair(&self, request: &RepairRequest) -> Result<String>;
}
