//! Query lifecycle: risk gating, execution and bounded repair.
//!
//! [`QueryLifecycleController`] takes a SQL statement through classification,
//! optional confirmation, execution and, on failure, a repair loop capped by
//! the [`LifecyclePolicy`] budgets. The database, the row estimator, the
//! repairer and the table lister are reached through the traits in
//! [`collaborators`].

pub mod collaborators;
mod controller;
mod outcome;
mod policy;
mod session;

pub use collaborators::{Executor, Introspector, RepairRequest, Repairer, RowEstimator};
pub use controller::{LifecycleRequest, QueryLifecycleController};
pub use outcome::{
    Advisory, ConfirmationDecision, FailureReason, LifecycleOutcome, PendingConfirmation,
    Success, TerminalFailure,
};
pub use policy::{
    LifecyclePolicy, DEFAULT_EXECUTOR_TIMEOUT, DEFAULT_MAX_GENERATION_RETRIES,
    DEFAULT_REPAIR_TIMEOUT,
};
pub use session::{
    AttemptOutcome, ExecutionAttempt, ExecutionSession, RepairBudget, RepairRecord, SessionState,
};
