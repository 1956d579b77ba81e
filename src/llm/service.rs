//! LLM service for natural language to SQL conversion and SQL repair.
//!
//! [`LlmService`] turns a question into a SQL statement. [`LlmRepairer`]
//! plugs the model into the query lifecycle as its repairer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::db::Schema;
use crate::error::{Result, WardenError};
use crate::lifecycle::{Introspector, RepairRequest, Repairer};
use crate::safety::validate_generated;

use super::{
    build_generation_messages, build_repair_messages, extract_sql, is_natural_language, LlmClient,
};

/// Generates SQL for natural-language questions.
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    max_attempts: u32,
}

impl LlmService {
    /// Creates a new service that asks the model at most `max_attempts` times
    /// per question.
    pub fn new(client: Arc<dyn LlmClient>, max_attempts: u32) -> Self {
        Self {
            client,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Generates a SQL statement answering `question` against `schema`.
    ///
    /// Asks again when the reply contains no SQL or the call fails; the last
    /// failure is returned once the attempts are used up.
    pub async fn generate_sql(&self, question: &str, schema: &Schema, database: &str) -> Result<String> {
        let messages = build_generation_messages(question, schema, database);
        let start = Instant::now();
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            tracing::debug!(attempt, question_len = question.len(), "Requesting SQL from LLM");

            match self.client.complete(&messages).await {
                Ok(response) => {
                    if let Some(sql) = extract_sql(&response) {
                        tracing::info!(
                            attempt,
                            duration_ms = start.elapsed().as_millis() as u64,
                            sql_len = sql.len(),
                            "Generated SQL"
                        );
                        return Ok(sql);
                    }
                    tracing::warn!(attempt, "No SQL extracted from LLM response");
                    last_error = Some(WardenError::llm(
                        "I couldn't generate a SQL query from your request. Could you rephrase it?",
                    ));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "SQL generation request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WardenError::llm("No response from LLM")))
    }
}

/// Asks the model to correct SQL that failed to execute.
pub struct LlmRepairer {
    client: Arc<dyn LlmClient>,
    introspector: Option<Arc<dyn Introspector>>,
}

impl LlmRepairer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            introspector: None,
        }
    }

    /// Lists the database's tables in every repair prompt.
    pub fn with_introspector(mut self, introspector: Arc<dyn Introspector>) -> Self {
        self.introspector = Some(introspector);
        self
    }

    async fn available_tables(&self, database: &str) -> Option<Vec<String>> {
        let introspector = self.introspector.as_ref()?;
        match introspector.list_tables(database).await {
            Ok(tables) => Some(tables),
            Err(e) => {
                tracing::debug!(error = %e, "Could not list tables for repair prompt");
                None
            }
        }
    }
}

#[async_trait]
impl Repairer for LlmRepairer {
    async fn repair(&self, request: &RepairRequest) -> Result<String> {
        let tables = self.available_tables(&request.database).await;
        let messages = build_repair_messages(request, tables.as_deref());

        let start = Instant::now();
        let response = self.client.complete(&messages).await?;
        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            response_len = response.len(),
            "Received repair response"
        );

        let sql = extract_sql(&response)
            .ok_or_else(|| WardenError::llm("Repair response contained no SQL"))?;

        if is_natural_language(&sql) {
            tracing::warn!(
                response = %sql.chars().take(100).collect::<String>(),
                "Repair response looks like natural language"
            );
            return Err(WardenError::llm("Repair response was not a SQL statement"));
        }

        if let Err(rejection) = validate_generated(&sql) {
            tracing::warn!(%rejection, "Repair candidate rejected");
            return Err(WardenError::llm(format!(
                "Repair produced invalid SQL: {rejection}"
            )));
        }

        Ok(sql)
    }
}
