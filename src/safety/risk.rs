//! Risk tier assignment.
//!
//! Maps a statement and an optional affected-row estimate to a [`RiskTier`]
//! using a fixed precedence. Pure and deterministic.

use std::sync::LazyLock;

use regex::Regex;

use super::{RiskTier, SqlStatement, StatementKind};

/// Default number of rows a DELETE may touch before it needs confirmation.
pub const DEFAULT_DELETE_ROWS_THRESHOLD: u64 = 5;

static DELETE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bDELETE\s+FROM\s+(?:ONLY\s+)?([\w."]+)"#).unwrap());
static UPDATE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bUPDATE\s+(?:ONLY\s+)?([\w."]+)"#).unwrap());
static DROP_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bDROP\s+(?:TABLE|DATABASE)\s+(?:IF\s+EXISTS\s+)?([\w."]+)"#).unwrap()
});

/// A tier together with the human-readable reason behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    /// Why the statement was gated. `None` for plain `auto` statements.
    pub reason: Option<String>,
}

/// Assigns risk tiers to statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskClassifier {
    delete_rows_threshold: u64,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DELETE_ROWS_THRESHOLD)
    }
}

impl RiskClassifier {
    pub fn new(delete_rows_threshold: u64) -> Self {
        Self {
            delete_rows_threshold,
        }
    }

    pub fn delete_rows_threshold(&self) -> u64 {
        self.delete_rows_threshold
    }

    /// Returns the tier for a statement. First matching rule wins:
    ///
    /// 1. drop-database is always `Blocked`
    /// 2. drop-table is `Confirm`
    /// 3. delete is `Confirm` when the estimate is unknown or above the
    ///    threshold, `Auto` otherwise
    /// 4. update is `Warn`
    /// 5. read, insert and create are `Auto`
    /// 6. anything else is `Confirm`
    pub fn classify(&self, statement: &SqlStatement, estimated_rows: Option<u64>) -> RiskTier {
        match statement.kind() {
            StatementKind::DropDatabase => RiskTier::Blocked,
            StatementKind::DropTable => RiskTier::Confirm,
            StatementKind::Delete => match estimated_rows {
                Some(rows) if rows <= self.delete_rows_threshold => RiskTier::Auto,
                _ => RiskTier::Confirm,
            },
            StatementKind::Update => RiskTier::Warn,
            StatementKind::Read | StatementKind::Insert | StatementKind::Create => RiskTier::Auto,
            StatementKind::Other => RiskTier::Confirm,
        }
    }

    /// Classifies the statement and explains the decision.
    pub fn assess(&self, statement: &SqlStatement, estimated_rows: Option<u64>) -> RiskAssessment {
        let tier = self.classify(statement, estimated_rows);
        let sql = statement.sql();

        let reason = match (tier, statement.kind()) {
            (RiskTier::Auto, _) => None,
            (RiskTier::Blocked, _) => {
                Some("DROP DATABASE is blocked for security reasons.".to_string())
            }
            (RiskTier::Confirm, StatementKind::DropTable) => Some(format!(
                "You're about to DROP TABLE '{}'. This action cannot be undone.",
                target(&DROP_TARGET, sql)
            )),
            (RiskTier::Confirm, StatementKind::Delete) => {
                let mut reason = format!(
                    "You're about to DELETE rows from '{}'. This action cannot be undone.",
                    target(&DELETE_TARGET, sql)
                );
                match estimated_rows {
                    Some(rows) => reason.push_str(&format!(
                        " Estimated {} rows affected (threshold {}).",
                        rows, self.delete_rows_threshold
                    )),
                    None => reason.push_str(" The number of affected rows could not be estimated."),
                }
                Some(reason)
            }
            (RiskTier::Warn, _) => Some(format!(
                "UPDATE on '{}' may affect multiple rows.",
                target(&UPDATE_TARGET, sql)
            )),
            (RiskTier::Confirm, kind) => Some(format!(
                "This statement ({}) can modify the database in ways that cannot be undone.",
                kind
            )),
        };

        RiskAssessment { tier, reason }
    }
}

fn target(pattern: &Regex, sql: &str) -> String {
    pattern
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches('"').to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
