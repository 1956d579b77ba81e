//! Interactive console.
//!
//! Reads one line at a time. Lines are console commands, SQL statements that
//! run directly, or questions for the model. While a statement waits for
//! approval, the next line is read as the answer.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::agent::{Agent, Reply};
use crate::error::{Result, WardenError};
use crate::lifecycle::{LifecycleOutcome, PendingConfirmation};
use crate::render::{parse_permission, render_outcome};
use crate::safety::is_parseable;

/// Leading keywords of input that is run as SQL instead of sent to the model.
const DIRECT_SQL_STARTERS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE",
    "EXPLAIN",
];

const HELP: &str = "Commands:
  tables            List tables in the current database
  databases         List databases on the server
  use <database>    Switch the current database
  schema <table>    Show the columns of a table
  help              Show this help
  exit              Quit

SQL statements are run directly. Anything else is treated as a question.";

/// What the console wants the caller to do after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleResponse {
    /// Print this text and read the next line.
    Text(String),
    /// Print this text; the next line answers the confirmation.
    Confirm(String),
    Exit,
}

/// Line-oriented session over an [`Agent`].
pub struct Console {
    agent: Arc<Agent>,
    database: String,
    pending: Option<PendingConfirmation>,
}

impl Console {
    pub fn new(agent: Arc<Agent>) -> Self {
        let database = agent.connections().default_database().to_string();
        Self {
            agent,
            database,
            pending: None,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// True while a statement waits for the user's approval.
    pub fn is_awaiting_confirmation(&self) -> bool {
        self.pending.is_some()
    }

    /// Handles one line of input.
    pub async fn handle(&mut self, line: &str) -> ConsoleResponse {
        let input = line.trim();

        if let Some(pending) = self.pending.take() {
            let decision = parse_permission(input);
            debug!(session_id = pending.session_id(), ?decision, "Confirmation answered");
            let reply = self.agent.confirm(pending, decision).await;
            return self.respond(reply);
        }

        if input.is_empty() {
            return ConsoleResponse::Text(String::new());
        }

        let (command, argument) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command.to_lowercase(), rest.trim()),
            None => (input.to_lowercase(), ""),
        };

        match (command.as_str(), argument) {
            ("exit" | "quit" | "\\q", "") => ConsoleResponse::Exit,
            ("help" | "?", "") => ConsoleResponse::Text(HELP.to_string()),
            ("tables", "") => self.text_or_error(self.list_tables().await),
            ("databases", "") => self.text_or_error(self.list_databases().await),
            ("use", db) if is_identifier(db) => self.switch_database(db).await,
            ("schema", table) if is_identifier(table) => {
                self.text_or_error(self.describe_table(table).await)
            }
            _ if looks_like_sql(input) => {
                let reply = self.agent.run_sql(input, &self.database).await;
                self.respond(reply)
            }
            _ => match self.agent.ask(input, &self.database).await {
                Ok(reply) => self.respond(reply),
                Err(e) => ConsoleResponse::Text(e.message().to_string()),
            },
        }
    }

    fn respond(&mut self, reply: Reply) -> ConsoleResponse {
        let text = render_outcome(&reply.outcome);
        match reply.outcome {
            LifecycleOutcome::AwaitingConfirmation(pending) => {
                self.pending = Some(pending);
                ConsoleResponse::Confirm(text)
            }
            _ => ConsoleResponse::Text(text),
        }
    }

    fn text_or_error(&self, result: Result<String>) -> ConsoleResponse {
        match result {
            Ok(text) => ConsoleResponse::Text(text),
            Err(e) => ConsoleResponse::Text(format!("Error: {}", e.message())),
        }
    }

    async fn list_tables(&self) -> Result<String> {
        let tables = self
            .agent
            .connections()
            .client_for(&self.database)
            .await?
            .list_tables()
            .await?;
        if tables.is_empty() {
            return Ok(format!("No tables found in database '{}'.", self.database));
        }
        Ok(format!("Tables in '{}':\n{}", self.database, bullet_list(&tables)))
    }

    async fn list_databases(&self) -> Result<String> {
        let databases = self.agent.connections().list_databases().await?;
        Ok(format!("Databases:\n{}", bullet_list(&databases)))
    }

    async fn describe_table(&self, table: &str) -> Result<String> {
        let schema = self.agent.connections().schema(&self.database).await?;
        schema.format_table(table).ok_or_else(|| {
            WardenError::query(format!(
                "Table '{}' does not exist in database '{}'.",
                table, self.database
            ))
        })
    }

    async fn switch_database(&mut self, database: &str) -> ConsoleResponse {
        match self.agent.connections().client_for(database).await {
            Ok(_) => {
                self.database = database.to_string();
                ConsoleResponse::Text(format!("Switched to database '{}'.", database))
            }
            Err(e) => ConsoleResponse::Text(format!("Error: {}", e.message())),
        }
    }

    /// Reads lines from stdin until `exit` or end of input.
    pub async fn run(mut self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        write_out(&mut stdout, "sqlwarden - type 'help' for commands.\n").await?;
        loop {
            let prompt = if self.is_awaiting_confirmation() {
                "confirm> ".to_string()
            } else {
                format!("{}> ", self.database)
            };
            write_out(&mut stdout, &prompt).await?;

            let line = lines
                .next_line()
                .await
                .map_err(|e| WardenError::internal(format!("Failed to read input: {e}")))?;
            let Some(line) = line else { break };

            match self.handle(&line).await {
                ConsoleResponse::Exit => break,
                ConsoleResponse::Text(text) | ConsoleResponse::Confirm(text) => {
                    if !text.is_empty() {
                        write_out(&mut stdout, &format!("{}\n\n", text)).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn write_out<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<()> {
    let write = async {
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    };
    write
        .await
        .map_err(|e| WardenError::internal(format!("Failed to write output: {e}")))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// Input is SQL when it opens with a statement keyword and the parser accepts it.
fn looks_like_sql(input: &str) -> bool {
    let first = input
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    DIRECT_SQL_STARTERS.contains(&first.as_str()) && is_parseable(input)
}
