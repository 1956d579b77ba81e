//! Per-request execution session.
//!
//! A session owns everything that changes while one request moves through
//! the lifecycle: the current statement, the attempt history, the repair
//! budget and the state. It is created when a request starts and dropped
//! when the request reaches a terminal outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::safety::{ErrorKind, SqlStatement};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Classifying,
    AwaitingConfirmation,
    Ready,
    Executing,
    Succeeded,
    Failed,
    RepairRequested,
    TerminalFailure,
    Blocked,
    DeniedByUser,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifying => "classifying",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RepairRequested => "repair_requested",
            Self::TerminalFailure => "terminal_failure",
            Self::Blocked => "blocked",
            Self::DeniedByUser => "denied_by_user",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::TerminalFailure | Self::Blocked | Self::DeniedByUser
        )
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Classifying, AwaitingConfirmation | Ready | Blocked)
                | (AwaitingConfirmation, Ready | DeniedByUser)
                | (Ready, Executing)
                | (Executing, Succeeded | Failed)
                | (Failed, RepairRequested | TerminalFailure)
                | (RepairRequested, Classifying | TerminalFailure)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The statement returned a result set.
    Rows { row_count: usize },
    /// The statement modified data and reported a count.
    RowCount { rows_affected: u64 },
    Failed {
        error_kind: ErrorKind,
        error_text: String,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// One try at running a statement.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    /// Zero-based position in the session.
    pub index: usize,
    pub statement: SqlStatement,
    pub outcome: AttemptOutcome,
    pub started_at: SystemTime,
    pub duration: Duration,
}

/// Per-session retry counters, each capped by the policy.
///
/// Counters only move through the `try_consume_*` methods, which refuse to
/// go past the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairBudget {
    generation_retries_used: u32,
    execution_retries_used: u32,
    max_generation_retries: u32,
    max_execution_retries: u32,
}

impl RepairBudget {
    pub fn new(max_generation_retries: u32, max_execution_retries: u32) -> Self {
        Self {
            generation_retries_used: 0,
            execution_retries_used: 0,
            max_generation_retries,
            max_execution_retries,
        }
    }

    pub fn generation_retries_used(&self) -> u32 {
        self.generation_retries_used
    }

    pub fn execution_retries_used(&self) -> u32 {
        self.execution_retries_used
    }

    pub fn generation_exhausted(&self) -> bool {
        self.generation_retries_used >= self.max_generation_retries
    }

    pub fn execution_exhausted(&self) -> bool {
        self.execution_retries_used >= self.max_execution_retries
    }

    /// Uses one execution retry. Returns false if none remain.
    pub fn try_consume_execution(&mut self) -> bool {
        if self.execution_exhausted() {
            return false;
        }
        self.execution_retries_used += 1;
        true
    }

    /// Uses one generation retry. Returns false if none remain.
    pub fn try_consume_generation(&mut self) -> bool {
        if self.generation_exhausted() {
            return false;
        }
        self.generation_retries_used += 1;
        true
    }
}

/// Audit entry for one repair step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRecord {
    pub failed_sql: String,
    pub error_kind: ErrorKind,
    pub error_text: String,
    /// `None` when the repairer produced nothing usable.
    pub candidate_sql: Option<String>,
    pub generation_retries_used: u32,
    pub execution_retries_used: u32,
}

/// State of one logical request.
#[derive(Debug)]
pub struct ExecutionSession {
    id: u64,
    database: String,
    question: Option<String>,
    original: SqlStatement,
    current: SqlStatement,
    state: SessionState,
    attempts: Vec<ExecutionAttempt>,
    budget: RepairBudget,
    corrected: bool,
    repairs: Vec<RepairRecord>,
    cancel: CancellationToken,
}

impl ExecutionSession {
    pub(crate) fn new(
        statement: SqlStatement,
        database: impl Into<String>,
        question: Option<String>,
        budget: RepairBudget,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            database: database.into(),
            question,
            original: statement.clone(),
            current: statement,
            state: SessionState::Classifying,
            attempts: Vec::new(),
            budget,
            corrected: false,
            repairs: Vec::new(),
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn question(&self) -> Option<&str> {
        self.question.as_deref()
    }

    pub fn original(&self) -> &SqlStatement {
        &self.original
    }

    pub fn current(&self) -> &SqlStatement {
        &self.current
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> &[ExecutionAttempt] {
        &self.attempts
    }

    pub fn budget(&self) -> &RepairBudget {
        &self.budget
    }

    pub(crate) fn budget_mut(&mut self) -> &mut RepairBudget {
        &mut self.budget
    }

    pub fn is_corrected(&self) -> bool {
        self.corrected
    }

    pub fn repairs(&self) -> &[RepairRecord] {
        &self.repairs
    }

    pub(crate) fn take_repairs(&mut self) -> Vec<RepairRecord> {
        std::mem::take(&mut self.repairs)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {} -> {}",
            self.state,
            next
        );
        trace!(session_id = self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
    }

    pub(crate) fn record_attempt(
        &mut self,
        outcome: AttemptOutcome,
        started_at: SystemTime,
        duration: Duration,
    ) -> &ExecutionAttempt {
        let index = self.attempts.len();
        self.attempts.push(ExecutionAttempt {
            index,
            statement: self.current.clone(),
            outcome,
            started_at,
            duration,
        });
        &self.attempts[index]
    }

    pub(crate) fn record_repair(&mut self, record: RepairRecord) {
        self.repairs.push(record);
    }

    /// Swaps in a repaired statement and marks the session as corrected.
    pub(crate) fn replace_statement(&mut self, statement: SqlStatement) {
        self.current = statement;
        self.corrected = true;
    }
}
