//! Lifecycle tests against a live PostgreSQL database.

use std::sync::Arc;

use sqlwarden::config::ConnectionConfig;
use sqlwarden::connection::ConnectionManager;
use sqlwarden::lifecycle::{
    Executor, Introspector, LifecycleOutcome, LifecyclePolicy, LifecycleRequest,
    QueryLifecycleController, RowEstimator,
};
use sqlwarden::llm::{LlmRepairer, MockLlmClient};
use sqlwarden::safety::{classify_error, ErrorKind};

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a connection manager whose default database is reachable.
async fn get_test_connections() -> Option<Arc<ConnectionManager>> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    let manager = ConnectionManager::new(config);
    manager.client_for(manager.default_database()).await.ok()?;
    Some(Arc::new(manager))
}

#[tokio::test]
async fn test_missing_relation_error_is_classified() {
    let Some(connections) = get_test_connections().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let database = connections.default_database().to_string();

    let err = connections
        .execute("SELECT * FROM sqlwarden_missing_table_xyz", &database)
        .await
        .unwrap_err();

    assert_eq!(classify_error(err.message()), ErrorKind::MissingRelation);
}

#[tokio::test]
async fn test_syntax_error_is_classified() {
    let Some(connections) = get_test_connections().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let database = connections.default_database().to_string();

    let err = connections
        .execute("SELEC 1", &database)
        .await
        .unwrap_err();

    assert_eq!(classify_error(err.message()), ErrorKind::SyntaxError);
}

#[tokio::test]
async fn test_estimate_and_list_tables() {
    let Some(connections) = get_test_connections().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let database = connections.default_database().to_string();

    connections
        .execute("DROP TABLE IF EXISTS sqlwarden_estimate_items", &database)
        .await
        .unwrap();
    connections
        .execute(
            "CREATE TABLE sqlwarden_estimate_items (id serial PRIMARY KEY, label text)",
            &database,
        )
        .await
        .unwrap();
    connections
        .execute(
            "INSERT INTO sqlwarden_estimate_items (label) SELECT 'item ' || g FROM generate_series(1, 50) g",
            &database,
        )
        .await
        .unwrap();
    connections
        .execute("ANALYZE sqlwarden_estimate_items", &database)
        .await
        .unwrap();

    let estimate = connections
        .estimate_affected_rows("DELETE FROM sqlwarden_estimate_items", &database)
        .await;
    let tables = connections.list_tables(&database).await.unwrap();

    connections
        .execute("DROP TABLE sqlwarden_estimate_items", &database)
        .await
        .unwrap();

    assert!(estimate.is_some_and(|rows| rows > 0));
    assert!(tables.contains(&"sqlwarden_estimate_items".to_string()));
}

#[tokio::test]
async fn test_lifecycle_repairs_against_postgres() {
    let Some(connections) = get_test_connections().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let database = connections.default_database().to_string();

    let llm = MockLlmClient::new()
        .with_response("sqlwarden_missing_table_xyz", "```sql\nSELECT 1 AS one\n```");
    let repairer = LlmRepairer::new(Arc::new(llm.clone())).with_introspector(connections.clone());
    let controller = QueryLifecycleController::new(
        LifecyclePolicy::new(2),
        connections.clone(),
        connections.clone(),
        Arc::new(repairer),
        connections.clone(),
    );

    let outcome = controller
        .start(LifecycleRequest::new(
            "SELECT * FROM sqlwarden_missing_table_xyz",
            database,
        ))
        .await;

    match outcome {
        LifecycleOutcome::Succeeded(success) => {
            assert!(success.corrected);
            assert_eq!(success.statement.sql(), "SELECT 1 AS one");
            assert_eq!(success.result.row_count, 1);
        }
        other => panic!("Expected Succeeded, got {}", other.as_str()),
    }
    assert_eq!(llm.call_count(), 1);
}
