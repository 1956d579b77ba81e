//! Database abstraction layer.
//!
//! Provides a trait-based interface for database operations so the
//! lifecycle can run against PostgreSQL or an in-memory mock.

mod mock;
mod postgres;
mod schema;
mod types;

pub use mock::{MockDatabaseClient, MockTable};
pub use postgres::PostgresClient;
pub use schema::{Column, ForeignKey, Schema, Table};
pub use types::{ColumnInfo, QueryResult, Row, Value};

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Connects to the database described by `config`.
pub async fn connect(config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
    let client = PostgresClient::connect(config).await?;
    Ok(Arc::new(client))
}

/// Interface for database clients.
///
/// A client is bound to one database. All operations are async and return
/// `WardenError` on failure.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Introspects the database schema, returning table and relationship information.
    async fn introspect_schema(&self) -> Result<Schema>;

    /// Executes a SQL statement and returns the results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Estimates the rows a data-modifying statement would touch without
    /// running it. Returns `None` when the estimate is unavailable.
    async fn estimate_affected_rows(&self, sql: &str) -> Option<u64>;

    /// Lists the user tables of the database, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Lists the databases on the same server.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}
