//! Query lifecycle tests against the in-memory database and the mock LLM.

use std::sync::Arc;

use sqlwarden::connection::ConnectionManager;
use sqlwarden::db::MockDatabaseClient;
use sqlwarden::lifecycle::{
    ConfirmationDecision, FailureReason, LifecycleOutcome, LifecyclePolicy, LifecycleRequest,
    PendingConfirmation, QueryLifecycleController, Success, TerminalFailure,
};
use sqlwarden::llm::{LlmRepairer, MockLlmClient};
use sqlwarden::safety::{ErrorKind, StatementKind};

const DB: &str = "demo";

/// Builds a controller whose executor, estimator and table lister are all
/// backed by `db`, with repairs produced by `llm`.
fn controller(
    db: &MockDatabaseClient,
    llm: &MockLlmClient,
    policy: LifecyclePolicy,
) -> QueryLifecycleController {
    let connections =
        Arc::new(ConnectionManager::offline(DB).with_client(DB, Arc::new(db.clone())));
    let repairer =
        LlmRepairer::new(Arc::new(llm.clone())).with_introspector(connections.clone());
    QueryLifecycleController::new(
        policy,
        connections.clone(),
        connections.clone(),
        Arc::new(repairer),
        connections,
    )
}

fn expect_success(outcome: LifecycleOutcome) -> Success {
    match outcome {
        LifecycleOutcome::Succeeded(success) => success,
        other => panic!("Expected Succeeded, got {}", other.as_str()),
    }
}

fn expect_failure(outcome: LifecycleOutcome) -> TerminalFailure {
    match outcome {
        LifecycleOutcome::TerminalFailure(failure) => failure,
        other => panic!("Expected TerminalFailure, got {}", other.as_str()),
    }
}

fn expect_pending(outcome: LifecycleOutcome) -> PendingConfirmation {
    match outcome {
        LifecycleOutcome::AwaitingConfirmation(pending) => pending,
        other => panic!("Expected AwaitingConfirmation, got {}", other.as_str()),
    }
}

#[tokio::test]
async fn test_typo_is_repaired_and_marked_corrected() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "```sql\nSELECT * FROM users\n```");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let success = expect_success(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert!(success.corrected);
    assert_eq!(success.statement.sql(), "SELECT * FROM users");
    assert_eq!(success.result.row_count, 3);
    assert_eq!(success.attempts, 2);
    assert_eq!(success.repairs.len(), 1);
    assert_eq!(success.repairs[0].error_kind, ErrorKind::MissingRelation);
    assert_eq!(llm.call_count(), 1);

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("Run this SQL: SELECT * FROM usres"));
    assert!(prompt.contains("ERROR (missing-relation):"));
    assert!(prompt.contains("orders, users"));
}

#[tokio::test]
async fn test_drop_database_is_blocked_without_execution() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let outcome = controller
        .start(LifecycleRequest::new("DROP DATABASE production", DB))
        .await;

    match outcome {
        LifecycleOutcome::Blocked { statement, reason } => {
            assert_eq!(statement.kind(), StatementKind::DropDatabase);
            assert!(reason.contains("blocked for security reasons"));
        }
        other => panic!("Expected Blocked, got {}", other.as_str()),
    }
    assert!(db.executed().is_empty());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_delete_without_estimate_waits_and_denial_runs_nothing() {
    let db = MockDatabaseClient::sample(DB).without_estimates();
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let pending = expect_pending(
        controller
            .start(LifecycleRequest::new("DELETE FROM orders", DB))
            .await,
    );
    assert_eq!(pending.estimated_rows(), None);
    assert!(pending.reason().contains("could not be estimated"));
    assert!(!pending.is_corrected());

    let outcome = controller.resume(pending, ConfirmationDecision::Deny).await;

    match outcome {
        LifecycleOutcome::DeniedByUser { statement } => {
            assert_eq!(statement.sql(), "DELETE FROM orders");
        }
        other => panic!("Expected DeniedByUser, got {}", other.as_str()),
    }
    assert!(db.executed().is_empty());
    assert_eq!(db.row_count("orders"), Some(7));
}

#[tokio::test]
async fn test_large_delete_runs_after_approval() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let pending = expect_pending(
        controller
            .start(LifecycleRequest::new("DELETE FROM orders", DB))
            .await,
    );
    assert_eq!(pending.estimated_rows(), Some(7));
    assert!(db.executed().is_empty());

    let success = expect_success(controller.resume(pending, ConfirmationDecision::Approve).await);

    assert_eq!(success.result.rows_affected, Some(7));
    assert_eq!(db.row_count("orders"), Some(0));
}

#[tokio::test]
async fn test_small_delete_runs_without_confirmation() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let success = expect_success(
        controller
            .start(LifecycleRequest::new("DELETE FROM users", DB))
            .await,
    );

    assert_eq!(success.result.rows_affected, Some(3));
    assert_eq!(db.row_count("users"), Some(0));
}

#[tokio::test]
async fn test_read_repaired_into_update_gains_advisory() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new()
        .with_response("usres", "```sql\nUPDATE users SET active = true\n```");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let success = expect_success(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert!(success.corrected);
    assert_eq!(success.statement.kind(), StatementKind::Update);
    let advisory = success
        .advisory
        .expect("the corrected UPDATE should carry an advisory");
    assert_eq!(advisory.rows_affected, Some(3));
}

#[tokio::test]
async fn test_update_repaired_into_read_drops_advisory() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "```sql\nSELECT * FROM users\n```");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let success = expect_success(
        controller
            .start(LifecycleRequest::new("UPDATE usres SET active = true", DB))
            .await,
    );

    assert!(success.corrected);
    assert_eq!(success.statement.kind(), StatementKind::Read);
    assert_eq!(success.result.row_count, 3);
    assert!(success.advisory.is_none());
}

#[tokio::test]
async fn test_update_runs_with_advisory() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let success = expect_success(
        controller
            .start(LifecycleRequest::new("UPDATE users SET active = true", DB))
            .await,
    );

    let advisory = success.advisory.expect("UPDATE should carry an advisory");
    assert_eq!(advisory.rows_affected, Some(3));
    assert_eq!(advisory.message, "UPDATE affected 3 row(s).");
    assert!(!success.corrected);
}

#[tokio::test]
async fn test_repeated_failure_exhausts_execution_budget() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "SELECT * FROM usres");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::ExecutionBudgetExhausted);
    assert_eq!(failure.error_kind, ErrorKind::MissingRelation);
    assert_eq!(failure.last_sql, "SELECT * FROM usres");
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.repairs.len(), 2);
    assert_eq!(
        failure.suggestions,
        Some(vec!["orders".to_string(), "users".to_string()])
    );
    assert_eq!(failure.closest_table.as_deref(), Some("users"));
    assert!(failure
        .message
        .contains("Table 'usres' does not exist in database 'demo'."));
    assert!(failure.message.contains("Did you mean 'users'?"));
    assert_eq!(db.executed().len(), 3);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_generation_budget_caps_repairs() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "SELECT * FROM usres");
    let policy = LifecyclePolicy::new(5).with_max_generation_retries(2);
    let controller = controller(&db, &llm, policy);

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::GenerationBudgetExhausted);
    assert_eq!(llm.call_count(), 2);
    assert_eq!(db.executed().len(), 2);
}

#[tokio::test]
async fn test_repair_records_never_exceed_budgets() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "SELECT * FROM usres");

    for (max_exec, max_gen) in [(0, 3), (1, 3), (2, 3), (3, 1), (4, 2), (5, 5)] {
        let policy = LifecyclePolicy::new(max_exec).with_max_generation_retries(max_gen);
        let controller = controller(&db, &llm, policy);

        let failure = expect_failure(
            controller
                .start(LifecycleRequest::new("SELECT * FROM usres", DB))
                .await,
        );

        assert!(failure.repairs.len() as u32 <= max_exec.min(max_gen));
        for record in &failure.repairs {
            assert!(record.execution_retries_used <= max_exec);
            assert!(record.generation_retries_used <= max_gen);
        }
    }
}

#[tokio::test]
async fn test_permission_error_is_not_repaired() {
    let db = MockDatabaseClient::sample(DB)
        .with_failure("users", "permission denied for table users");
    let llm = MockLlmClient::new();
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM users", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::NotRetryable);
    assert_eq!(failure.error_kind, ErrorKind::PermissionDenied);
    assert_eq!(failure.suggestions, None);
    assert_eq!(failure.attempts, 1);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_retry_disabled_skips_repair() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "SELECT * FROM users");
    let policy = LifecyclePolicy::new(2).with_intelligent_retry(false);
    let controller = controller(&db, &llm, policy);

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::RetryDisabled);
    assert_eq!(failure.closest_table.as_deref(), Some("users"));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_failing_repairer_ends_with_original_error() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_failure("usres", "model unreachable");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::RepairFailed);
    assert_eq!(failure.error_kind, ErrorKind::MissingRelation);
    assert_eq!(failure.error_text, "relation \"usres\" does not exist");
    assert_eq!(db.executed().len(), 1);
}

#[tokio::test]
async fn test_repair_into_large_delete_needs_confirmation() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("ordres", "```sql\nDELETE FROM orders\n```");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let pending = expect_pending(
        controller
            .start(LifecycleRequest::new("SELECT * FROM ordres", DB))
            .await,
    );
    assert!(pending.is_corrected());
    assert_eq!(pending.statement().kind(), StatementKind::Delete);
    assert_eq!(pending.estimated_rows(), Some(7));

    let outcome = controller.resume(pending, ConfirmationDecision::Deny).await;

    assert!(matches!(outcome, LifecycleOutcome::DeniedByUser { .. }));
    assert_eq!(db.executed(), vec!["SELECT * FROM ordres".to_string()]);
    assert_eq!(db.row_count("orders"), Some(7));
}

#[tokio::test]
async fn test_natural_language_repair_is_rejected() {
    let db = MockDatabaseClient::sample(DB);
    let llm = MockLlmClient::new().with_response("usres", "Sorry, I cannot help with that.");
    let controller = controller(&db, &llm, LifecyclePolicy::new(2));

    let failure = expect_failure(
        controller
            .start(LifecycleRequest::new("SELECT * FROM usres", DB))
            .await,
    );

    assert_eq!(failure.reason, FailureReason::RepairFailed);
    assert_eq!(failure.last_sql, "SELECT * FROM usres");
}
