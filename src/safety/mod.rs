//! Statement safety and failure classification.
//!
//! Detects what kind of statement a piece of SQL is, assigns it a risk tier
//! that decides whether it may run without a human in the loop, and maps
//! database error text to an error kind that decides whether a repair is
//! worth attempting. Model-generated SQL is also screened here before it is
//! classified.

mod errors;
mod parser;
mod risk;
mod validator;

pub use errors::{classify_error, closest_table, ErrorDiagnosis, ErrorKind};
pub use parser::{detect_kind, is_parseable};
pub use risk::{RiskAssessment, RiskClassifier, DEFAULT_DELETE_ROWS_THRESHOLD};
pub use validator::{validate_generated, Rejection};

use std::fmt;

/// The kind of SQL statement, as far as the risk policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// SELECT, SHOW, plain EXPLAIN and other statements that only read.
    Read,
    Insert,
    Create,
    Update,
    Delete,
    DropTable,
    DropDatabase,
    /// TRUNCATE, ALTER, GRANT, other DROPs and anything unrecognized.
    Other,
}

impl StatementKind {
    /// Returns a priority value used when several statements are combined
    /// (higher = more dangerous).
    pub(crate) fn danger(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Create => 1,
            Self::Insert => 2,
            Self::Update => 3,
            Self::Delete => 4,
            Self::DropTable => 5,
            Self::Other => 6,
            Self::DropDatabase => 7,
        }
    }

    /// Returns the more dangerous of two kinds.
    pub(crate) fn max(self, other: Self) -> Self {
        if other.danger() > self.danger() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Insert => "insert",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DropTable => "drop-table",
            Self::DropDatabase => "drop-database",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tier assigned to a statement. Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    /// Execute without confirmation.
    Auto,
    /// Execute, but surface an advisory with the result.
    Warn,
    /// Must not execute until the caller approves.
    Confirm,
    /// Must never execute.
    Blocked,
}

impl RiskTier {
    /// Returns true if the statement may run without asking anyone.
    pub fn executes_immediately(&self) -> bool {
        matches!(self, Self::Auto | Self::Warn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Warn => "warn",
            Self::Confirm => "confirm",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL text together with its detected statement kind.
///
/// The kind is fixed at construction. A repaired query is a new `SqlStatement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    sql: String,
    kind: StatementKind,
}

impl SqlStatement {
    /// Wraps SQL text and detects its kind.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into().trim().to_string();
        let kind = detect_kind(&sql);
        Self { sql, kind }
    }

    /// Wraps SQL text with an already known kind.
    pub fn with_kind(sql: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            sql: sql.into().trim().to_string(),
            kind,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
