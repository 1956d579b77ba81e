//! Connection manager routing statements to per-database clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::db::{DatabaseClient, QueryResult, Schema};
use crate::error::{Result, WardenError};
use crate::lifecycle::{Executor, Introspector, RowEstimator};

/// Database used when the connection settings name none.
const FALLBACK_DATABASE: &str = "postgres";

/// Owns one client per database name.
///
/// Clients are created lazily from the base connection settings with the
/// database swapped in, then cached for the rest of the process.
pub struct ConnectionManager {
    base: Option<ConnectionConfig>,
    default_database: String,
    clients: RwLock<HashMap<String, Arc<dyn DatabaseClient>>>,
}

impl ConnectionManager {
    /// Creates a manager that connects on demand using `base`.
    pub fn new(base: ConnectionConfig) -> Self {
        let default_database = base
            .database
            .clone()
            .unwrap_or_else(|| FALLBACK_DATABASE.to_string());
        Self {
            base: Some(base),
            default_database,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a manager with no connection settings; only registered clients are reachable.
    pub fn offline(default_database: impl Into<String>) -> Self {
        Self {
            base: None,
            default_database: default_database.into(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a ready client for `database`.
    pub fn with_client(mut self, database: impl Into<String>, client: Arc<dyn DatabaseClient>) -> Self {
        self.clients.get_mut().insert(database.into(), client);
        self
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    /// Returns the client for `database`, connecting if needed.
    ///
    /// The cache lock is not held while connecting. When two callers race to
    /// open the same database, the first client stored wins and the other
    /// one is dropped.
    pub async fn client_for(&self, database: &str) -> Result<Arc<dyn DatabaseClient>> {
        if let Some(client) = self.clients.read().await.get(database) {
            return Ok(Arc::clone(client));
        }

        let base = self.base.as_ref().ok_or_else(|| {
            WardenError::connection(format!(
                "No connection configured for database '{database}'"
            ))
        })?;

        let config = base.with_database(database);
        debug!(database, "Opening connection");
        let client = crate::db::connect(&config).await?;
        info!(database, connection = %config.display_string(), "Connected");

        let mut clients = self.clients.write().await;
        Ok(Arc::clone(
            clients.entry(database.to_string()).or_insert(client),
        ))
    }

    /// Introspects the schema of `database`.
    pub async fn schema(&self, database: &str) -> Result<Schema> {
        self.client_for(database).await?.introspect_schema().await
    }

    /// Lists databases reachable through the default connection.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.client_for(&self.default_database)
            .await?
            .list_databases()
            .await
    }

    /// Closes every open client.
    pub async fn close(&self) -> Result<()> {
        let clients: Vec<_> = self.clients.write().await.drain().collect();
        for (database, client) in clients {
            debug!(database = %database, "Closing connection");
            client.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for ConnectionManager {
    async fn execute(&self, sql: &str, database: &str) -> Result<QueryResult> {
        self.client_for(database).await?.execute_query(sql).await
    }
}

#[async_trait]
impl RowEstimator for ConnectionManager {
    async fn estimate_affected_rows(&self, sql: &str, database: &str) -> Option<u64> {
        let client = self.client_for(database).await.ok()?;
        client.estimate_affected_rows(sql).await
    }
}

#[async_trait]
impl Introspector for ConnectionManager {
    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.client_for(database).await?.list_tables().await
    }
}
