//! Request handling from question to lifecycle outcome.
//!
//! The agent asks the model for SQL, then hands the statement to the query
//! lifecycle controller. Confirmation requests come back to the caller as
//! part of the reply and are answered through [`Agent::confirm`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::{Result, WardenError};
use crate::lifecycle::{
    ConfirmationDecision, LifecycleOutcome, LifecyclePolicy, LifecycleRequest,
    PendingConfirmation, QueryLifecycleController,
};
use crate::llm::{LlmClient, LlmRepairer, LlmService};
use crate::safety::validate_generated;

/// What the agent did with one request.
#[derive(Debug)]
pub struct Reply {
    /// The SQL the outcome refers to: the statement that ran, failed, or is
    /// waiting for approval.
    pub sql: String,
    pub outcome: LifecycleOutcome,
}

impl Reply {
    fn new(outcome: LifecycleOutcome, fallback_sql: String) -> Self {
        let sql = match &outcome {
            LifecycleOutcome::Succeeded(success) => success.statement.sql().to_string(),
            LifecycleOutcome::Blocked { statement, .. }
            | LifecycleOutcome::DeniedByUser { statement } => statement.sql().to_string(),
            LifecycleOutcome::AwaitingConfirmation(pending) => pending.statement().sql().to_string(),
            LifecycleOutcome::TerminalFailure(failure) => failure.last_sql.clone(),
        };
        let sql = if sql.is_empty() { fallback_sql } else { sql };
        Self { sql, outcome }
    }
}

/// Ties SQL generation and the query lifecycle together.
pub struct Agent {
    llm: LlmService,
    controller: QueryLifecycleController,
    connections: Arc<ConnectionManager>,
}

impl Agent {
    /// Creates an agent whose database collaborators are all served by `connections`.
    pub fn new(
        client: Arc<dyn LlmClient>,
        connections: Arc<ConnectionManager>,
        policy: LifecyclePolicy,
    ) -> Self {
        let repairer =
            LlmRepairer::new(Arc::clone(&client)).with_introspector(connections.clone());
        let llm = LlmService::new(client, policy.max_generation_retries);
        let controller = QueryLifecycleController::new(
            policy,
            connections.clone(),
            connections.clone(),
            Arc::new(repairer),
            connections.clone(),
        );

        Self {
            llm,
            controller,
            connections,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        self.controller.policy()
    }

    /// Answers a natural-language question against `database`.
    ///
    /// Fails only when no SQL could be generated; everything after that is
    /// reported through the reply's outcome.
    pub async fn ask(&self, question: &str, database: &str) -> Result<Reply> {
        self.ask_with_cancellation(question, database, CancellationToken::new())
            .await
    }

    /// Like [`Agent::ask`], stopping early when `cancel` fires.
    pub async fn ask_with_cancellation(
        &self,
        question: &str,
        database: &str,
        cancel: CancellationToken,
    ) -> Result<Reply> {
        let start = Instant::now();
        let schema = self.connections.schema(database).await?;
        let sql = self.llm.generate_sql(question, &schema, database).await?;
        if let Err(rejection) = validate_generated(&sql) {
            warn!(database, %rejection, "Generated SQL rejected");
            return Err(WardenError::validation(format!(
                "Generated SQL is invalid: {rejection}"
            )));
        }

        let request = LifecycleRequest::new(sql.clone(), database)
            .with_question(question)
            .with_cancellation(cancel);
        let outcome = self.controller.start(request).await;

        info!(
            database,
            outcome = outcome.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Question handled"
        );
        Ok(Reply::new(outcome, sql))
    }

    /// Runs SQL the user typed directly, skipping generation.
    pub async fn run_sql(&self, sql: &str, database: &str) -> Reply {
        let outcome = self
            .controller
            .start(LifecycleRequest::new(sql, database))
            .await;
        Reply::new(outcome, sql.to_string())
    }

    /// Answers a pending confirmation and continues the session.
    pub async fn confirm(
        &self,
        pending: PendingConfirmation,
        decision: ConfirmationDecision,
    ) -> Reply {
        let sql = pending.statement().sql().to_string();
        let outcome = self.controller.resume(pending, decision).await;
        Reply::new(outcome, sql)
    }
}
