//! Mock database client for testing and `--mock-db`.
//!
//! Keeps a handful of tables in memory and understands just enough SQL to
//! answer simple reads and report row counts for writes. Statements that
//! reference unknown tables fail the way PostgreSQL does.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::{Column, ColumnInfo, DatabaseClient, ForeignKey, QueryResult, Row, Schema, Table, Value};
use crate::error::{Result, WardenError};
use crate::safety::{detect_kind, StatementKind};

static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN|INTO|UPDATE|TABLE(?:\s+IF\s+EXISTS)?)\s+"?([A-Za-z_][\w.]*)"?"#)
        .unwrap()
});
static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bCREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([A-Za-z_][\w.]*)"?"#).unwrap()
});
static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static COUNT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOUNT\s*\(\s*\*\s*\)").unwrap());

/// A table held by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockTable {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl MockTable {
    pub fn new(name: impl Into<String>, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnInfo::new(*name, *data_type))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }
}

/// Failure injected for statements containing a pattern.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    pattern: String,
    message: String,
}

#[derive(Debug, Default)]
struct MockState {
    tables: Vec<MockTable>,
    executed: Vec<String>,
}

/// A mock database client backed by in-memory tables.
///
/// Clones share the same tables, so a test can keep a handle for inspection.
#[derive(Debug, Clone)]
pub struct MockDatabaseClient {
    database: String,
    state: Arc<Mutex<MockState>>,
    failures: Vec<ScriptedFailure>,
    estimates_available: bool,
}

impl MockDatabaseClient {
    /// Creates an empty mock database named `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            failures: Vec::new(),
            estimates_available: true,
        }
    }

    /// Creates a mock with `users` and `orders` tables filled with sample rows.
    pub fn sample(database: impl Into<String>) -> Self {
        let users = MockTable::new(
            "users",
            &[("id", "int4"), ("name", "text"), ("email", "text"), ("active", "bool")],
        )
        .with_row(vec![Value::Int(1), "Alice".into(), "alice@example.com".into(), true.into()])
        .with_row(vec![Value::Int(2), "Bob".into(), "bob@example.com".into(), true.into()])
        .with_row(vec![Value::Int(3), "Carol".into(), "carol@example.com".into(), false.into()]);

        let mut orders = MockTable::new(
            "orders",
            &[("id", "int4"), ("user_id", "int4"), ("total", "float8"), ("status", "text")],
        );
        let sample_orders: [(i64, i64, f64, &str); 7] = [
            (1, 1, 19.99, "paid"),
            (2, 1, 5.00, "paid"),
            (3, 2, 42.50, "pending"),
            (4, 2, 7.25, "cancelled"),
            (5, 3, 12.00, "paid"),
            (6, 3, 99.90, "pending"),
            (7, 1, 3.10, "cancelled"),
        ];
        for (id, user_id, total, status) in sample_orders {
            orders = orders.with_row(vec![
                Value::Int(id),
                Value::Int(user_id),
                Value::Float(total),
                status.into(),
            ]);
        }

        Self::new(database).with_table(users).with_table(orders)
    }

    pub fn with_table(self, table: MockTable) -> Self {
        self.lock().tables.push(table);
        self
    }

    /// Makes every statement containing `pattern` (case-insensitive) fail with `message`.
    pub fn with_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.push(ScriptedFailure {
            pattern: pattern.into().to_lowercase(),
            message: message.into(),
        });
        self
    }

    /// Makes `estimate_affected_rows` always return `None`.
    pub fn without_estimates(mut self) -> Self {
        self.estimates_available = false;
        self
    }

    /// Statements passed to `execute_query`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Current row count of a table.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.lock()
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .map(|t| t.rows.len())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failures(&self, sql: &str) -> Result<()> {
        let lowered = sql.to_lowercase();
        match self.failures.iter().find(|f| lowered.contains(&f.pattern)) {
            Some(failure) => Err(WardenError::query(failure.message.clone())),
            None => Ok(()),
        }
    }
}

/// Table names a statement refers to, with `schema.` prefixes removed.
fn referenced_tables(sql: &str) -> Vec<String> {
    TABLE_REFERENCE
        .captures_iter(sql)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let name = m.as_str();
            name.rsplit('.').next().unwrap_or(name).to_string()
        })
        .collect()
}

fn find<'a>(tables: &'a [MockTable], name: &str) -> Option<&'a MockTable> {
    tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

fn find_mut<'a>(tables: &'a mut [MockTable], name: &str) -> Option<&'a mut MockTable> {
    tables.iter_mut().find(|t| t.name.eq_ignore_ascii_case(name))
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn introspect_schema(&self) -> Result<Schema> {
        let state = self.lock();
        let tables = state
            .tables
            .iter()
            .map(|t| Table {
                name: t.name.clone(),
                columns: t
                    .columns
                    .iter()
                    .map(|c| Column::new(c.name.clone(), c.data_type.clone()))
                    .collect(),
                primary_key: t
                    .columns
                    .iter()
                    .filter(|c| c.name == "id")
                    .map(|c| c.name.clone())
                    .collect(),
            })
            .collect();

        let foreign_keys = state
            .tables
            .iter()
            .flat_map(|t| {
                t.columns.iter().filter_map(|c| {
                    let target = c.name.strip_suffix("_id")?;
                    let target_table = format!("{}s", target);
                    find(&state.tables, &target_table).map(|_| {
                        ForeignKey::new(
                            t.name.clone(),
                            vec![c.name.clone()],
                            target_table,
                            vec!["id".to_string()],
                        )
                    })
                })
            })
            .collect();

        Ok(Schema {
            tables,
            foreign_keys,
        })
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let mut state = self.lock();
        state.executed.push(sql.to_string());
        self.check_failures(sql)?;

        let kind = detect_kind(sql);
        let created = CREATE_TABLE
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        for table in referenced_tables(sql) {
            let is_new = created
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(&table));
            if !is_new && find(&state.tables, &table).is_none() {
                return Err(WardenError::query(format!(
                    "relation \"{}\" does not exist",
                    table
                )));
            }
        }

        let target = referenced_tables(sql).into_iter().next();
        let has_where = WHERE_CLAUSE.is_match(sql);

        let result = match kind {
            StatementKind::Read => match target.as_deref().and_then(|t| find(&state.tables, t)) {
                Some(table) if COUNT_STAR.is_match(sql) => QueryResult::with_data(
                    vec![ColumnInfo::new("count", "int8")],
                    vec![vec![Value::Int(table.rows.len() as i64)]],
                ),
                Some(table) => QueryResult::with_data(table.columns.clone(), table.rows.clone()),
                None => QueryResult::with_data(
                    vec![ColumnInfo::new("?column?", "int4")],
                    vec![vec![Value::Int(1)]],
                ),
            },
            StatementKind::Insert => QueryResult::affected(1),
            StatementKind::Update => {
                let count = target
                    .as_deref()
                    .and_then(|t| find(&state.tables, t))
                    .map(|t| if has_where { t.rows.len().min(1) } else { t.rows.len() })
                    .unwrap_or(0);
                QueryResult::affected(count as u64)
            }
            StatementKind::Delete => {
                let count = match target.as_deref().and_then(|t| find_mut(&mut state.tables, t)) {
                    Some(table) if has_where => table.rows.len().min(1),
                    Some(table) => {
                        let count = table.rows.len();
                        table.rows.clear();
                        count
                    }
                    None => 0,
                };
                QueryResult::affected(count as u64)
            }
            StatementKind::Create => {
                if let Some(name) = created {
                    if find(&state.tables, &name).is_none() {
                        state.tables.push(MockTable::new(name, &[]));
                    }
                }
                QueryResult::affected(0)
            }
            StatementKind::DropTable => {
                if let Some(name) = target {
                    state.tables.retain(|t| !t.name.eq_ignore_ascii_case(&name));
                }
                QueryResult::affected(0)
            }
            StatementKind::DropDatabase | StatementKind::Other => QueryResult::affected(0),
        };

        Ok(result.with_execution_time(Duration::from_millis(1)))
    }

    async fn estimate_affected_rows(&self, sql: &str) -> Option<u64> {
        if !self.estimates_available {
            return None;
        }
        let state = self.lock();
        let table = referenced_tables(sql).into_iter().next()?;
        find(&state.tables, &table).map(|t| t.rows.len() as u64)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock().tables.iter().map(|t| t.name.clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(vec![self.database.clone()])
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
