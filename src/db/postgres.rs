//! PostgreSQL database client implementation.
//!
//! `PostgresClient` implements `DatabaseClient` on top of a sqlx pool bound to
//! a single database.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Executor as _, Row as SqlxRow, Statement as _, TypeInfo};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::db::{Column, ColumnInfo, DatabaseClient, ForeignKey, QueryResult, Row, Schema, Table, Value};
use crate::error::{Result, WardenError};

/// Query timeout in seconds.
const QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum rows to return from a query.
const MAX_ROWS: usize = 1000;

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Connects to the database described by `config`, retrying transient failures
    /// with exponential backoff.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts = MAX_RETRY_ATTEMPTS, "Connecting to PostgreSQL");

            let error = match PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await
            {
                Ok(pool) => {
                    debug!(database = ?config.database, "Connected to database");
                    return Ok(Self { pool });
                }
                Err(e) => e,
            };

            if attempt >= MAX_RETRY_ATTEMPTS || !is_transient_error(&error) {
                return Err(map_connection_error(error, config));
            }

            warn!(
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Connection attempt failed with a transient error, retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }

    /// Creates a client from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(Duration::from_secs(QUERY_TIMEOUT_SECS), fut)
            .await
            .map_err(|_| {
                WardenError::timeout(format!(
                    "Query timed out after {QUERY_TIMEOUT_SECS} seconds"
                ))
            })?
            .map_err(|e| WardenError::query(format_query_error(e)))
    }

    /// Fetches all tables from the public schema.
    async fn fetch_tables(&self) -> Result<Vec<Table>> {
        let mut tables = Vec::new();

        for name in self.list_tables().await? {
            let columns = self.fetch_columns(&name).await?;
            let primary_key = self.fetch_primary_key(&name).await?;
            tables.push(Table {
                name,
                columns,
                primary_key,
            });
        }

        Ok(tables)
    }

    async fn fetch_columns(&self, table_name: &str) -> Result<Vec<Column>> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                column_name::text,
                data_type::text,
                is_nullable::text,
                column_default::text
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            WardenError::query(format!("Failed to fetch columns for {table_name}: {e}"))
        })?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default)| Column {
                name,
                data_type,
                is_nullable: is_nullable == "YES",
                default,
            })
            .collect())
    }

    async fn fetch_primary_key(&self, table_name: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.table_name = $1
                AND tc.constraint_type = 'PRIMARY KEY'
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            WardenError::query(format!("Failed to fetch primary key for {table_name}: {e}"))
        })
    }

    /// Fetches foreign keys, grouping multi-column constraints by name.
    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                tc.constraint_name::text,
                kcu.table_name::text AS from_table,
                kcu.column_name::text AS from_column,
                ccu.table_name::text AS to_table,
                ccu.column_name::text AS to_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.table_schema = ccu.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY kcu.table_name, tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WardenError::query(format!("Failed to fetch foreign keys: {e}")))?;

        let mut order: Vec<String> = Vec::new();
        let mut by_constraint: HashMap<String, ForeignKey> = HashMap::new();

        for (constraint, from_table, from_column, to_table, to_column) in rows {
            let fk = by_constraint.entry(constraint.clone()).or_insert_with(|| {
                order.push(constraint);
                ForeignKey::new(from_table, Vec::new(), to_table, Vec::new())
            });
            if !fk.from_columns.contains(&from_column) {
                fk.from_columns.push(from_column);
            }
            if !fk.to_columns.contains(&to_column) {
                fk.to_columns.push(to_column);
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|name| by_constraint.remove(&name))
            .collect())
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        let tables = self.fetch_tables().await?;
        let foreign_keys = self.fetch_foreign_keys().await?;

        Ok(Schema {
            tables,
            foreign_keys,
        })
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        // Statements without output columns report a row count instead of rows.
        let statement = self.run((&self.pool).prepare(sql)).await?;
        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
            .collect();

        if columns.is_empty() {
            let done = self.run(sqlx::query(sql).execute(&self.pool)).await?;
            return Ok(QueryResult::affected(done.rows_affected())
                .with_execution_time(start.elapsed()));
        }

        let fetched = self.run(sqlx::query(sql).fetch_all(&self.pool)).await?;
        let execution_time = start.elapsed();

        let total_rows = fetched.len();
        let was_truncated = total_rows > MAX_ROWS;
        if was_truncated {
            warn!(total_rows, max_rows = MAX_ROWS, "Truncating query result");
        }

        let rows: Vec<Row> = fetched.iter().take(MAX_ROWS).map(convert_row).collect();
        let row_count = rows.len();

        Ok(QueryResult {
            columns,
            rows,
            execution_time,
            row_count,
            total_rows: Some(total_rows),
            was_truncated,
            rows_affected: None,
        })
    }

    async fn estimate_affected_rows(&self, sql: &str) -> Option<u64> {
        let explain = format!("EXPLAIN (FORMAT JSON) {sql}");
        let plan: serde_json::Value = match self
            .run(sqlx::query_scalar(&explain).fetch_one(&self.pool))
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                debug!(error = %e, "Row estimate unavailable");
                return None;
            }
        };

        plan.get(0)
            .and_then(|entry| entry.get("Plan"))
            .and_then(max_plan_rows)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WardenError::query(format!("Failed to fetch tables: {e}")))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT datname::text FROM pg_database WHERE NOT datistemplate ORDER BY datname",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WardenError::query(format!("Failed to list databases: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Largest "Plan Rows" value in a plan tree.
///
/// A ModifyTable node reports zero rows of its own, so the estimate comes
/// from the scan beneath it.
fn max_plan_rows(node: &serde_json::Value) -> Option<u64> {
    let own = node.get("Plan Rows").and_then(|rows| rows.as_f64()).map(|rows| rows as u64);
    let children = node
        .get("Plans")
        .and_then(|plans| plans.as_array())
        .into_iter()
        .flatten()
        .filter_map(max_plan_rows);

    own.into_iter().chain(children).max()
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::Bool)),
        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(|n| Value::Int(n as i64))),
        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(|n| Value::Int(n as i64))),
        "INT8" | "BIGINT" => row.try_get::<Option<i64>, _>(index).map(|v| v.map(Value::Int)),
        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|n| Value::Float(n as f64))),
        "FLOAT8" | "DOUBLE PRECISION" => {
            row.try_get::<Option<f64>, _>(index).map(|v| v.map(Value::Float))
        }
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|v| v.map(Value::Bytes)),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .map(|v| v.map(|json| Value::String(json.to_string()))),
        _ => row.try_get::<Option<String>, _>(index).map(|v| v.map(Value::String)),
    };

    value.ok().flatten().unwrap_or(Value::Null)
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("authentication failed")
        || error_str.contains("does not exist")
        || error_str.contains("ssl")
        || error_str.contains("tls")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-facing messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> WardenError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        WardenError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        WardenError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        WardenError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        WardenError::connection(
            "Server requires SSL. Add '?sslmode=require' to connection string.",
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        WardenError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        WardenError::connection(error.to_string())
    }
}

/// Formats a query error, appending PostgreSQL detail and hint fields.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = format!("ERROR: {}", db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn get_test_client() -> Option<PostgresClient> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = ConnectionConfig::from_connection_string(&url).ok()?;
        PostgresClient::connect(&config).await.ok()
    }

    #[test]
    fn test_max_plan_rows_reads_nested_plans() {
        let plan = json!({
            "Node Type": "ModifyTable",
            "Plan Rows": 0,
            "Plans": [{ "Node Type": "Seq Scan", "Plan Rows": 1200.0 }]
        });
        assert_eq!(max_plan_rows(&plan), Some(1200));
        assert_eq!(max_plan_rows(&json!({})), None);
    }

    #[tokio::test]
    async fn test_execute_select_query() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = client
            .execute_query("SELECT 1 as num, 'hello' as greeting")
            .await
            .unwrap();

        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[0].name, "num");
        assert_eq!(result.rows, vec![vec![Value::Int(1), Value::from("hello")]]);
        assert_eq!(result.rows_affected, None);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_reports_rows_affected() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        client
            .execute_query("DROP TABLE IF EXISTS warden_rows_affected")
            .await
            .unwrap();
        client
            .execute_query("CREATE TABLE warden_rows_affected (id int)")
            .await
            .unwrap();
        let result = client
            .execute_query("INSERT INTO warden_rows_affected VALUES (1), (2)")
            .await
            .unwrap();
        assert_eq!(result.rows_affected, Some(2));
        assert!(!result.has_result_set());

        client
            .execute_query("DROP TABLE warden_rows_affected")
            .await
            .unwrap();

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_relation_error_text() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let error = client
            .execute_query("SELECT * FROM nonexistent_table_xyz")
            .await
            .unwrap_err();
        assert!(error
            .message()
            .contains("relation \"nonexistent_table_xyz\" does not exist"));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_estimate_affected_rows() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        assert!(client
            .estimate_affected_rows("DELETE FROM pg_catalog.pg_class WHERE false")
            .await
            .is_some());
        assert_eq!(
            client
                .estimate_affected_rows("DELETE FROM nonexistent_table_xyz")
                .await,
            None
        );

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_databases() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let databases = client.list_databases().await.unwrap();
        assert!(!databases.is_empty());
        assert!(!databases.iter().any(|d| d == "template0"));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_is_connection_variant() {
        let config = ConnectionConfig {
            host: Some("nonexistent.invalid.host".to_string()),
            port: 5432,
            database: Some("testdb".to_string()),
            user: Some("testuser".to_string()),
            password: Some("testpass".to_string()),
        };

        let error = PostgresClient::connect(&config).await.unwrap_err();
        assert!(matches!(error, WardenError::Connection(_)));
    }
}
