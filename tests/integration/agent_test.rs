//! End-to-end tests from question to rendered answer.

use std::sync::Arc;

use sqlwarden::agent::Agent;
use sqlwarden::connection::ConnectionManager;
use sqlwarden::db::MockDatabaseClient;
use sqlwarden::lifecycle::{FailureReason, LifecycleOutcome, LifecyclePolicy};
use sqlwarden::llm::MockLlmClient;
use sqlwarden::render::{parse_permission, render_confirmation, render_outcome};

fn agent(llm: &MockLlmClient, db: &MockDatabaseClient) -> Agent {
    let connections =
        Arc::new(ConnectionManager::offline("demo").with_client("demo", Arc::new(db.clone())));
    Agent::new(Arc::new(llm.clone()), connections, LifecyclePolicy::new(2))
}

#[tokio::test]
async fn test_question_is_answered_with_summary() {
    let db = MockDatabaseClient::sample("demo");
    let llm = MockLlmClient::new();
    let agent = agent(&llm, &db);

    let reply = agent.ask("Show me all users", "demo").await.unwrap();
    let text = render_outcome(&reply.outcome);

    assert!(text.starts_with("Found 3 results:"));
    assert!(text.contains("name: Alice"));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_generated_typo_is_corrected() {
    let db = MockDatabaseClient::sample("demo");
    // Repair prompts are matched first; generation prompts hold only the question.
    let llm = MockLlmClient::new()
        .with_response("FAILED SQL:", "```sql\nSELECT * FROM users\n```")
        .with_response("customers", "```sql\nSELECT * FROM customers\n```");
    let agent = agent(&llm, &db);

    let reply = agent.ask("List the customers", "demo").await.unwrap();

    assert_eq!(reply.sql, "SELECT * FROM users");
    let text = render_outcome(&reply.outcome);
    assert!(text.starts_with("Note: the SQL was automatically corrected to:\nSELECT * FROM users"));
    assert!(text.contains("Found 3 results:"));

    let repair_prompt = &llm.prompts()[1];
    assert!(repair_prompt.contains("ORIGINAL USER REQUEST:\nList the customers"));
}

#[tokio::test]
async fn test_update_reports_advisory() {
    let db = MockDatabaseClient::sample("demo");
    let llm = MockLlmClient::new();
    let agent = agent(&llm, &db);

    let reply = agent.ask("Activate the users", "demo").await.unwrap();
    let text = render_outcome(&reply.outcome);

    assert!(text.contains("Warning: UPDATE affected 3 row(s)."));
    assert!(text.contains("Successfully updated 3 row(s)."));
}

#[tokio::test]
async fn test_delete_confirmation_flow() {
    let db = MockDatabaseClient::sample("demo");
    let llm = MockLlmClient::new();
    let agent = agent(&llm, &db);

    let reply = agent.ask("Delete all orders", "demo").await.unwrap();
    let pending = match reply.outcome {
        LifecycleOutcome::AwaitingConfirmation(pending) => pending,
        other => panic!("Expected AwaitingConfirmation, got {}", other.as_str()),
    };

    let prompt = render_confirmation(&pending);
    assert!(prompt.contains("You're about to DELETE rows from 'orders'."));
    assert!(prompt.contains("```sql\nDELETE FROM orders\n```"));
    assert!(prompt.ends_with("Do you want to proceed? (yes/no)"));
    assert!(db.executed().is_empty());

    let reply = agent.confirm(pending, parse_permission("Go ahead!")).await;

    assert_eq!(
        render_outcome(&reply.outcome),
        "Successfully deleted 7 row(s)."
    );
    assert_eq!(db.row_count("orders"), Some(0));
}

#[tokio::test]
async fn test_unknown_table_failure_lists_tables() {
    let db = MockDatabaseClient::sample("demo");
    let llm = MockLlmClient::new().with_response("invoices", "```sql\nSELECT * FROM invoices\n```");
    let agent = agent(&llm, &db);

    let reply = agent.ask("Show me the invoices", "demo").await.unwrap();

    match &reply.outcome {
        LifecycleOutcome::TerminalFailure(failure) => {
            assert_eq!(failure.reason, FailureReason::ExecutionBudgetExhausted);
            assert_eq!(failure.closest_table, None);
        }
        other => panic!("Expected TerminalFailure, got {}", other.as_str()),
    }

    let text = render_outcome(&reply.outcome);
    assert!(text.contains("Table 'invoices' does not exist in database 'demo'."));
    assert!(text.contains("Available tables: orders, users"));
    assert!(text.contains("Last SQL attempted (missing-relation):"));
    assert_eq!(reply.sql, "SELECT * FROM invoices");
}

#[tokio::test]
async fn test_unanswerable_question_is_an_error() {
    let db = MockDatabaseClient::sample("demo");
    let llm = MockLlmClient::new();
    let agent = agent(&llm, &db);

    let err = agent.ask("What is the meaning of life?", "demo").await.unwrap_err();

    assert!(err.message().contains("couldn't generate a SQL query"));
    assert!(db.executed().is_empty());
}
