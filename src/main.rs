//! sqlwarden - ask a PostgreSQL database questions in plain English.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use sqlwarden::agent::Agent;
use sqlwarden::cli::Cli;
use sqlwarden::config::{Config, ConnectionConfig};
use sqlwarden::connection::ConnectionManager;
use sqlwarden::console::Console;
use sqlwarden::db::MockDatabaseClient;
use sqlwarden::error::WardenError;
use sqlwarden::lifecycle::{ConfirmationDecision, LifecycleOutcome};
use sqlwarden::llm::{create_client, LlmProvider};
use sqlwarden::logging;
use sqlwarden::render::{parse_permission, render_confirmation, render_outcome};

/// Database name used by `--mock-db`.
const MOCK_DATABASE: &str = "demo";

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    if cli.is_one_shot() {
        logging::init_stderr_logging();
    } else {
        logging::init_file_logging();
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let policy = config
        .lifecycle_policy()
        .context("Invalid lifecycle configuration")?;

    let provider = match cli.llm_provider().map_err(anyhow::Error::msg)? {
        Some(provider) => provider,
        None => config
            .llm
            .provider
            .parse::<LlmProvider>()
            .map_err(anyhow::Error::msg)?,
    };
    let client = create_client(provider, config.llm.model.clone())
        .with_context(|| format!("Failed to create {} client", provider))?;

    let connections = Arc::new(build_connections(&cli, &config).await?);
    let agent = Arc::new(Agent::new(client, Arc::clone(&connections), policy));

    let code = match &cli.query {
        Some(question) => ask_once(&agent, question, cli.yes).await?,
        None => {
            Console::new(Arc::clone(&agent)).run().await?;
            ExitCode::SUCCESS
        }
    };

    connections.close().await?;
    Ok(code)
}

async fn build_connections(cli: &Cli, config: &Config) -> anyhow::Result<ConnectionManager> {
    if cli.mock_db {
        info!("Using in-memory sample database");
        return Ok(ConnectionManager::offline(MOCK_DATABASE).with_client(
            MOCK_DATABASE,
            Arc::new(MockDatabaseClient::sample(MOCK_DATABASE)),
        ));
    }

    let Some(connection) = resolve_connection(cli, config)? else {
        warn!("No database connection configured");
        bail!("No database connection configured. Use --help for usage information.");
    };

    info!("Connection: {}", connection.display_string());
    let manager = ConnectionManager::new(connection);
    manager
        .client_for(manager.default_database())
        .await
        .context("Failed to connect")?;
    Ok(manager)
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>, WardenError> {
    // Precedence: CLI arguments, named connection, default connection, environment.
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(WardenError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    let connection = match connection {
        Some(mut conn) => {
            conn.apply_env_defaults();
            Some(conn)
        }
        None => {
            let mut conn = ConnectionConfig {
                port: 5432,
                ..Default::default()
            };
            conn.apply_env_defaults();
            (conn.host.is_some() || conn.database.is_some()).then_some(conn)
        }
    };

    Ok(connection)
}

/// Answers one question, asking on stdin when a statement needs approval.
async fn ask_once(agent: &Agent, question: &str, auto_approve: bool) -> anyhow::Result<ExitCode> {
    let database = agent.connections().default_database().to_string();
    let mut reply = agent.ask(question, &database).await?;
    println!("SQL: {}\n", reply.sql);

    loop {
        match reply.outcome {
            LifecycleOutcome::AwaitingConfirmation(pending) => {
                let decision = if auto_approve {
                    info!(session_id = pending.session_id(), "Approving via --yes");
                    ConfirmationDecision::Approve
                } else {
                    println!("{}", render_confirmation(&pending));
                    read_answer().await?
                };
                reply = agent.confirm(pending, decision).await;
            }
            outcome => {
                println!("{}", render_outcome(&outcome));
                let succeeded = matches!(outcome, LifecycleOutcome::Succeeded(_));
                return Ok(if succeeded {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                });
            }
        }
    }
}

async fn read_answer() -> anyhow::Result<ConfirmationDecision> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read answer")?;
    Ok(parse_permission(&line))
}
