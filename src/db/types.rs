//! Query result types.
//!
//! Defines the structures used to represent statement results from the database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The result of executing a SQL statement.
///
/// Statements that return rows fill `columns` and `rows`. Statements that
/// only modify data leave them empty and report `rows_affected`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    /// Column metadata for the result set.
    pub columns: Vec<ColumnInfo>,

    /// Rows of data.
    pub rows: Vec<Row>,

    /// Time taken to execute the statement.
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,

    /// Number of rows in the result (may be truncated).
    pub row_count: usize,

    /// Total number of rows before truncation (if known).
    pub total_rows: Option<usize>,

    /// Whether the result was truncated to the row limit.
    #[serde(default)]
    pub was_truncated: bool,

    /// Rows inserted, updated or deleted by a data-modifying statement.
    #[serde(default)]
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query result with the given columns and rows.
    pub fn with_data(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            total_rows: Some(row_count),
            ..Self::default()
        }
    }

    /// Creates a result for a statement that returned no rows but touched `count` of them.
    pub fn affected(count: u64) -> Self {
        Self {
            total_rows: Some(0),
            rows_affected: Some(count),
            ..Self::default()
        }
    }

    /// Sets the execution time.
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.execution_time = duration;
        self
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if the statement produced a result set rather than a row count.
    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Returns a truncation warning message if the result was truncated.
    pub fn truncation_warning(&self) -> Option<String> {
        if self.was_truncated {
            let total = self.total_rows.unwrap_or(self.row_count);
            Some(format!(
                "Result truncated: showing {} of {} rows",
                self.row_count, total
            ))
        } else {
            None
        }
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// A single value from a database query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

/// Serde support for Duration, stored as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
