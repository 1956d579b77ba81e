//! Mock LLM client for testing.
//!
//! Provides deterministic responses based on input patterns.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::{Result, WardenError};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// Mock LLM client that returns canned responses based on input patterns.
///
/// Patterns are matched case-insensitively against the last user message.
/// Custom responses are checked in insertion order before the defaults.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    /// Custom response mappings (pattern -> response).
    custom_responses: Vec<(String, String)>,
    /// Patterns that make the call fail, as an unreachable model would.
    failures: Vec<(String, String)>,
    /// Last user message of every call, shared between clones.
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockLlmClient {
    /// Creates a new mock client with default responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom response mapping.
    ///
    /// When the input contains `pattern`, the mock will return `response`.
    pub fn with_response(
        mut self,
        pattern: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.custom_responses
            .push((pattern.into(), response.into()));
        self
    }

    /// Makes calls whose input contains `pattern` fail with `message`.
    pub fn with_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.push((pattern.into(), message.into()));
        self
    }

    /// Returns the user input of every call made so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
    }

    /// Generates a mock response based on the input.
    fn mock_response(&self, input: &str) -> String {
        let input_lower = input.to_lowercase();

        for (pattern, response) in &self.custom_responses {
            if input_lower.contains(&pattern.to_lowercase()) {
                return response.clone();
            }
        }

        if input_lower.contains("all users") || input_lower.contains("show users") {
            return "```sql\nSELECT * FROM users;\n```".to_string();
        }

        if input_lower.contains("count") && input_lower.contains("orders") {
            return "```sql\nSELECT COUNT(*) FROM orders;\n```".to_string();
        }

        if input_lower.contains("count") && input_lower.contains("users") {
            return "```sql\nSELECT COUNT(*) FROM users;\n```".to_string();
        }

        if input_lower.contains("orders") && input_lower.contains("user") {
            return "```sql\nSELECT o.* FROM orders o\nJOIN users u ON o.user_id = u.id;\n```"
                .to_string();
        }

        if (input_lower.contains("insert") || input_lower.contains("add"))
            && input_lower.contains("user")
        {
            return "```sql\nINSERT INTO users (email, name) VALUES ('test@example.com', 'Test User');\n```".to_string();
        }

        if input_lower.contains("activate") && input_lower.contains("users") {
            return "```sql\nUPDATE users SET active = true;\n```".to_string();
        }

        if input_lower.contains("update") && input_lower.contains("user") {
            return "```sql\nUPDATE users SET name = 'Updated Name' WHERE id = 1;\n```".to_string();
        }

        if input_lower.contains("delete all orders") {
            return "```sql\nDELETE FROM orders;\n```".to_string();
        }

        if input_lower.contains("delete") && input_lower.contains("user") {
            return "```sql\nDELETE FROM users WHERE id = 1;\n```".to_string();
        }

        "I don't understand that question. Could you please rephrase it?".to_string()
    }

    /// Extracts the last user message content from a message list.
    fn extract_user_input(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let input = Self::extract_user_input(messages);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(input.clone());
        }

        let input_lower = input.to_lowercase();
        if let Some((_, message)) = self
            .failures
            .iter()
            .find(|(pattern, _)| input_lower.contains(&pattern.to_lowercase()))
        {
            return Err(WardenError::llm(message.clone()));
        }

        Ok(self.mock_response(&input))
    }
}
