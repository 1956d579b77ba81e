//! Query lifecycle controller.
//!
//! Drives one request from classification through execution and, on
//! failure, through a bounded repair-and-retry loop. Every collaborator
//! failure is folded into a [`LifecycleOutcome`]; nothing escapes as an error.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::QueryResult;
use crate::error::WardenError;
use crate::safety::{
    classify_error, closest_table, ErrorDiagnosis, ErrorKind, RiskClassifier, RiskTier,
    SqlStatement, StatementKind,
};

use super::collaborators::{Executor, Introspector, RepairRequest, Repairer, RowEstimator};
use super::outcome::{
    Advisory, ConfirmationDecision, FailureReason, LifecycleOutcome, PendingConfirmation,
    Success, TerminalFailure,
};
use super::policy::LifecyclePolicy;
use super::session::{AttemptOutcome, ExecutionSession, RepairBudget, RepairRecord, SessionState};

/// A request to run SQL through the lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleRequest {
    pub sql: String,
    pub database: String,
    /// The natural-language request the SQL was generated from, if any.
    pub question: Option<String>,
    pub cancel: CancellationToken,
}

impl LifecycleRequest {
    pub fn new(sql: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            database: database.into(),
            question: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    /// Uses `token` to abort in-flight executor and repair calls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Where `drive` picks up the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// Classify the current statement first.
    Classify,
    /// The caller approved the current statement; execute it directly.
    Approved,
}

/// A failed executor or repair call, already classified.
#[derive(Debug)]
struct StepFailure {
    kind: ErrorKind,
    text: String,
    /// Set when the failure itself decides the terminal reason.
    reason: Option<FailureReason>,
}

impl StepFailure {
    fn from_error(error: WardenError) -> Self {
        match error {
            WardenError::Timeout(msg) => Self::timeout(msg),
            other => {
                let text = other.message().to_string();
                Self {
                    kind: classify_error(&text),
                    text,
                    reason: None,
                }
            }
        }
    }

    fn timeout(text: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Other,
            text: text.into(),
            reason: Some(FailureReason::Timeout),
        }
    }

    fn cancelled(what: &str) -> Self {
        Self {
            kind: ErrorKind::Other,
            text: format!("{} was cancelled", what),
            reason: Some(FailureReason::Cancelled),
        }
    }
}

/// Orchestrates risk classification, execution, error classification and repair.
///
/// Holds only read-only policy and shared collaborator handles; all per-request
/// state lives in the session, so one controller can serve concurrent requests.
pub struct QueryLifecycleController {
    policy: LifecyclePolicy,
    classifier: RiskClassifier,
    executor: Arc<dyn Executor>,
    estimator: Arc<dyn RowEstimator>,
    repairer: Arc<dyn Repairer>,
    introspector: Arc<dyn Introspector>,
}

impl QueryLifecycleController {
    pub fn new(
        policy: LifecyclePolicy,
        executor: Arc<dyn Executor>,
        estimator: Arc<dyn RowEstimator>,
        repairer: Arc<dyn Repairer>,
        introspector: Arc<dyn Introspector>,
    ) -> Self {
        let classifier = RiskClassifier::new(policy.delete_rows_threshold);
        Self {
            policy,
            classifier,
            executor,
            estimator,
            repairer,
            introspector,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Starts a new session for `request` and drives it until it terminates
    /// or needs confirmation.
    pub async fn start(&self, request: LifecycleRequest) -> LifecycleOutcome {
        let session = ExecutionSession::new(
            SqlStatement::new(request.sql),
            request.database,
            request.question,
            RepairBudget::new(
                self.policy.max_generation_retries,
                self.policy.max_execution_retries,
            ),
            request.cancel,
        );

        info!(
            session_id = session.id(),
            database = %session.database(),
            kind = %session.current().kind(),
            "Starting query lifecycle"
        );

        self.drive(session, Entry::Classify).await
    }

    /// Continues a suspended session with the caller's decision.
    pub async fn resume(
        &self,
        pending: PendingConfirmation,
        decision: ConfirmationDecision,
    ) -> LifecycleOutcome {
        let mut session = pending.session;

        match decision {
            ConfirmationDecision::Deny => {
                session.transition(SessionState::DeniedByUser);
                info!(
                    session_id = session.id(),
                    corrected = session.is_corrected(),
                    "Statement denied by user"
                );
                LifecycleOutcome::DeniedByUser {
                    statement: session.current().clone(),
                }
            }
            ConfirmationDecision::Approve => {
                session.transition(SessionState::Ready);
                info!(session_id = session.id(), "Statement approved by user");
                self.drive(session, Entry::Approved).await
            }
        }
    }

    async fn drive(&self, mut session: ExecutionSession, mut entry: Entry) -> LifecycleOutcome {
        loop {
            if entry == Entry::Classify {
                let statement = session.current().clone();
                let estimate = if statement.kind() == StatementKind::Delete {
                    self.estimate_bounded(&session).await
                } else {
                    None
                };
                let assessment = self.classifier.assess(&statement, estimate);

                debug!(
                    session_id = session.id(),
                    kind = %statement.kind(),
                    tier = %assessment.tier,
                    estimated_rows = ?estimate,
                    "Statement classified"
                );

                match assessment.tier {
                    RiskTier::Blocked => {
                        session.transition(SessionState::Blocked);
                        let reason = assessment.reason.unwrap_or_default();
                        warn!(session_id = session.id(), reason = %reason, "Statement blocked");
                        return LifecycleOutcome::Blocked { statement, reason };
                    }
                    RiskTier::Confirm => {
                        session.transition(SessionState::AwaitingConfirmation);
                        let reason = assessment.reason.unwrap_or_default();
                        return LifecycleOutcome::AwaitingConfirmation(PendingConfirmation::new(
                            session, reason, estimate,
                        ));
                    }
                    RiskTier::Auto | RiskTier::Warn => session.transition(SessionState::Ready),
                }
            }
            entry = Entry::Classify;

            session.transition(SessionState::Executing);
            let started_at = SystemTime::now();
            let start = Instant::now();
            let result = self.execute_bounded(&session).await;
            let duration = start.elapsed();

            let failure = match result {
                Ok(result) => {
                    let outcome = match result.rows_affected {
                        Some(rows_affected) if !result.has_result_set() => {
                            AttemptOutcome::RowCount { rows_affected }
                        }
                        _ => AttemptOutcome::Rows {
                            row_count: result.row_count,
                        },
                    };
                    let attempt = session.record_attempt(outcome, started_at, duration).index;
                    session.transition(SessionState::Succeeded);
                    info!(
                        session_id = session.id(),
                        attempt,
                        duration_ms = duration.as_millis() as u64,
                        corrected = session.is_corrected(),
                        "Statement succeeded"
                    );
                    return self.succeed(session, result);
                }
                Err(failure) => failure,
            };

            let attempt = session
                .record_attempt(
                    AttemptOutcome::Failed {
                        error_kind: failure.kind,
                        error_text: failure.text.clone(),
                    },
                    started_at,
                    duration,
                )
                .index;
            session.transition(SessionState::Failed);
            warn!(
                session_id = session.id(),
                attempt,
                error_kind = %failure.kind,
                duration_ms = duration.as_millis() as u64,
                error = %failure.text,
                "Statement failed"
            );

            let stop = if let Some(reason) = failure.reason {
                Some(reason)
            } else if !failure.kind.is_retryable() {
                Some(FailureReason::NotRetryable)
            } else if !self.policy.enable_intelligent_retry {
                Some(FailureReason::RetryDisabled)
            } else if !session.budget_mut().try_consume_execution() {
                Some(FailureReason::ExecutionBudgetExhausted)
            } else {
                None
            };
            if let Some(reason) = stop {
                return self.fail(session, failure, reason).await;
            }

            session.transition(SessionState::RepairRequested);
            if session.budget().generation_exhausted() {
                return self
                    .fail(session, failure, FailureReason::GenerationBudgetExhausted)
                    .await;
            }

            let request = RepairRequest {
                original_sql: session.original().sql().to_string(),
                failed_sql: session.current().sql().to_string(),
                error_text: failure.text.clone(),
                error_kind: failure.kind,
                database: session.database().to_string(),
                question: session.question().map(str::to_string),
            };
            let repaired = self.repair_bounded(&session, &request).await;
            session.budget_mut().try_consume_generation();

            let candidate = repaired.as_ref().ok().cloned();
            self.audit_repair(&mut session, &failure, candidate.clone());

            let candidate = match repaired {
                Ok(candidate) => candidate,
                Err(repair_failure) => {
                    warn!(
                        session_id = session.id(),
                        error = %repair_failure.text,
                        "Repair request failed"
                    );
                    let reason = repair_failure.reason.unwrap_or(FailureReason::RepairFailed);
                    return self.fail(session, failure, reason).await;
                }
            };

            if session.budget().generation_exhausted() {
                return self
                    .fail(session, failure, FailureReason::GenerationBudgetExhausted)
                    .await;
            }

            session.replace_statement(SqlStatement::new(candidate));
            session.transition(SessionState::Classifying);
        }
    }

    fn succeed(&self, mut session: ExecutionSession, result: QueryResult) -> LifecycleOutcome {
        // Re-derived from the statement that actually succeeded.
        let advisory = (session.current().kind() == StatementKind::Update)
            .then(|| Advisory::for_update(result.rows_affected));

        LifecycleOutcome::Succeeded(Success {
            statement: session.current().clone(),
            result,
            advisory,
            corrected: session.is_corrected(),
            attempts: session.attempts().len(),
            repairs: session.take_repairs(),
        })
    }

    async fn fail(
        &self,
        mut session: ExecutionSession,
        failure: StepFailure,
        reason: FailureReason,
    ) -> LifecycleOutcome {
        session.transition(SessionState::TerminalFailure);

        let mut diagnosis = ErrorDiagnosis::from_error_text(&failure.text);
        diagnosis.kind = failure.kind;
        let mut message = diagnosis.describe(session.database());
        if let Some(prefix) = reason.describe() {
            message = format!("Error: {}\n{}", prefix, message);
        }

        let mut suggestions = None;
        let mut closest = None;
        if self.policy.suggest_available_tables && failure.kind == ErrorKind::MissingRelation {
            match self.list_tables_bounded(&session).await {
                Ok(tables) => {
                    closest = diagnosis
                        .relation
                        .as_deref()
                        .and_then(|name| closest_table(name, &tables));
                    suggestions = Some(tables);
                }
                Err(e) => {
                    warn!(session_id = session.id(), error = %e, "Could not list tables for suggestions")
                }
            }
        }
        if let Some(table) = &closest {
            message.push_str(&format!(" Did you mean '{}'?", table));
        }

        info!(
            session_id = session.id(),
            reason = %reason,
            error_kind = %failure.kind,
            generation_retries_used = session.budget().generation_retries_used(),
            execution_retries_used = session.budget().execution_retries_used(),
            "Query lifecycle ended in failure"
        );

        LifecycleOutcome::TerminalFailure(TerminalFailure {
            error_kind: failure.kind,
            last_sql: session.current().sql().to_string(),
            message,
            error_text: failure.text,
            reason,
            suggestions,
            closest_table: closest,
            attempts: session.attempts().len(),
            repairs: session.take_repairs(),
        })
    }

    fn audit_repair(
        &self,
        session: &mut ExecutionSession,
        failure: &StepFailure,
        candidate: Option<String>,
    ) {
        if !self.policy.log_sql_repairs {
            return;
        }

        let budget = *session.budget();
        info!(
            target: "sqlwarden::audit",
            session_id = session.id(),
            original_sql = %session.original().sql(),
            failed_sql = %session.current().sql(),
            error_kind = %failure.kind,
            candidate_sql = candidate.as_deref().unwrap_or(""),
            generation_retries_used = budget.generation_retries_used(),
            execution_retries_used = budget.execution_retries_used(),
            "SQL repair"
        );

        session.record_repair(RepairRecord {
            failed_sql: session.current().sql().to_string(),
            error_kind: failure.kind,
            error_text: failure.text.clone(),
            candidate_sql: candidate,
            generation_retries_used: budget.generation_retries_used(),
            execution_retries_used: budget.execution_retries_used(),
        });
    }

    async fn execute_bounded(
        &self,
        session: &ExecutionSession,
    ) -> std::result::Result<QueryResult, StepFailure> {
        let timeout = self.policy.executor_timeout;
        let call = self
            .executor
            .execute(session.current().sql(), session.database());

        tokio::select! {
            _ = session.cancel_token().cancelled() => Err(StepFailure::cancelled("Statement execution")),
            result = tokio::time::timeout(timeout, call) => match result {
                Err(_) => Err(StepFailure::timeout(format!(
                    "Statement execution timed out after {} ms",
                    timeout.as_millis()
                ))),
                Ok(Err(e)) => Err(StepFailure::from_error(e)),
                Ok(Ok(result)) => Ok(result),
            },
        }
    }

    /// Row estimate for the current statement. A timeout or cancellation
    /// counts as an unknown estimate.
    async fn estimate_bounded(&self, session: &ExecutionSession) -> Option<u64> {
        let timeout = self.policy.executor_timeout;
        let call = self
            .estimator
            .estimate_affected_rows(session.current().sql(), session.database());

        tokio::select! {
            _ = session.cancel_token().cancelled() => {
                debug!(session_id = session.id(), "Row estimate cancelled");
                None
            }
            result = tokio::time::timeout(timeout, call) => result.unwrap_or_else(|_| {
                warn!(
                    session_id = session.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Row estimate timed out"
                );
                None
            }),
        }
    }

    async fn repair_bounded(
        &self,
        session: &ExecutionSession,
        request: &RepairRequest,
    ) -> std::result::Result<String, StepFailure> {
        let timeout = self.policy.repair_timeout;

        let result = tokio::select! {
            _ = session.cancel_token().cancelled() => return Err(StepFailure::cancelled("Repair request")),
            result = tokio::time::timeout(timeout, self.repairer.repair(request)) => result,
        };

        match result {
            Err(_) => Err(StepFailure::timeout(format!(
                "Repair request timed out after {} ms",
                timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(StepFailure {
                kind: ErrorKind::Other,
                text: e.to_string(),
                reason: matches!(e, WardenError::Timeout(_)).then_some(FailureReason::Timeout),
            }),
            Ok(Ok(candidate)) if candidate.trim().is_empty() => Err(StepFailure {
                kind: ErrorKind::Other,
                text: "Repair produced no SQL".to_string(),
                reason: None,
            }),
            Ok(Ok(candidate)) => Ok(candidate),
        }
    }

    async fn list_tables_bounded(&self, session: &ExecutionSession) -> crate::error::Result<Vec<String>> {
        tokio::time::timeout(
            self.policy.executor_timeout,
            self.introspector.list_tables(session.database()),
        )
        .await
        .map_err(|_| WardenError::timeout("Listing tables timed out"))?
    }
}
