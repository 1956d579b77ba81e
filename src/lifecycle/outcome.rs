//! Results the controller hands back to its caller.

use std::fmt;

use crate::db::QueryResult;
use crate::safety::{ErrorKind, SqlStatement};

use super::session::{ExecutionSession, RepairRecord};

/// Note surfaced alongside a successful `warn`-tier statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub message: String,
    pub rows_affected: Option<u64>,
}

impl Advisory {
    pub(crate) fn for_update(rows_affected: Option<u64>) -> Self {
        let message = match rows_affected {
            Some(n) => format!("UPDATE affected {} row(s).", n),
            None => "UPDATE completed; the number of affected rows is unknown.".to_string(),
        };
        Self {
            message,
            rows_affected,
        }
    }
}

/// A statement that ran to completion.
#[derive(Debug, Clone)]
pub struct Success {
    /// The statement that succeeded (the repaired one, if repairs happened).
    pub statement: SqlStatement,
    pub result: QueryResult,
    pub advisory: Option<Advisory>,
    /// True when the SQL was automatically corrected before it succeeded.
    pub corrected: bool,
    /// Number of execution attempts the session made.
    pub attempts: usize,
    pub repairs: Vec<RepairRecord>,
}

/// Why a session ended in a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The error kind is not eligible for repair.
    NotRetryable,
    /// Repairs are switched off by policy.
    RetryDisabled,
    ExecutionBudgetExhausted,
    GenerationBudgetExhausted,
    /// The repairer could not produce a candidate.
    RepairFailed,
    /// An executor or repair call exceeded its time budget.
    Timeout,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRetryable => "not_retryable",
            Self::RetryDisabled => "retry_disabled",
            Self::ExecutionBudgetExhausted => "execution_budget_exhausted",
            Self::GenerationBudgetExhausted => "generation_budget_exhausted",
            Self::RepairFailed => "repair_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Short explanation for end users, if the reason adds anything to the error itself.
    pub fn describe(&self) -> Option<&'static str> {
        match self {
            Self::NotRetryable | Self::RetryDisabled => None,
            Self::ExecutionBudgetExhausted | Self::GenerationBudgetExhausted => {
                Some("Max regeneration attempts exceeded")
            }
            Self::RepairFailed => Some("Could not regenerate valid SQL"),
            Self::Timeout => Some("The operation timed out"),
            Self::Cancelled => Some("The request was cancelled"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnostic for a request that could not be completed.
#[derive(Debug, Clone)]
pub struct TerminalFailure {
    pub error_kind: ErrorKind,
    /// Last SQL that was attempted.
    pub last_sql: String,
    /// User-facing description of the failure.
    pub message: String,
    /// Raw error text from the last failing call.
    pub error_text: String,
    pub reason: FailureReason,
    /// Tables in the database, for missing-relation failures when enabled.
    pub suggestions: Option<Vec<String>>,
    /// Closest match to the missing table among `suggestions`.
    pub closest_table: Option<String>,
    pub attempts: usize,
    pub repairs: Vec<RepairRecord>,
}

/// A suspended session waiting for the caller to approve or deny its statement.
///
/// Holds no database resources. Pass it back to
/// [`QueryLifecycleController::resume`](super::QueryLifecycleController::resume).
#[derive(Debug)]
pub struct PendingConfirmation {
    pub(crate) session: ExecutionSession,
    reason: String,
    estimated_rows: Option<u64>,
}

impl PendingConfirmation {
    pub(crate) fn new(session: ExecutionSession, reason: String, estimated_rows: Option<u64>) -> Self {
        Self {
            session,
            reason,
            estimated_rows,
        }
    }

    /// The statement awaiting approval.
    pub fn statement(&self) -> &SqlStatement {
        self.session.current()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn estimated_rows(&self) -> Option<u64> {
        self.estimated_rows
    }

    pub fn database(&self) -> &str {
        self.session.database()
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    /// True if the statement awaiting approval is a repair of the original.
    pub fn is_corrected(&self) -> bool {
        self.session.is_corrected()
    }
}

/// The caller's answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Approve,
    Deny,
}

/// Final (or suspended) result of driving a request through the lifecycle.
#[derive(Debug)]
pub enum LifecycleOutcome {
    Succeeded(Success),
    Blocked {
        statement: SqlStatement,
        reason: String,
    },
    DeniedByUser {
        statement: SqlStatement,
    },
    AwaitingConfirmation(PendingConfirmation),
    TerminalFailure(TerminalFailure),
}

impl LifecycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Blocked { .. } => "blocked",
            Self::DeniedByUser { .. } => "denied_by_user",
            Self::AwaitingConfirmation(_) => "awaiting_confirmation",
            Self::TerminalFailure(_) => "terminal_failure",
        }
    }

    /// Returns false only for `AwaitingConfirmation`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingConfirmation(_))
    }
}
