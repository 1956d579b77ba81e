//! Anthropic LLM client implementation.
//!
//! Implements the LlmClient trait for Anthropic's Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, WardenError};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Maximum tokens to generate. SQL answers are short.
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Maximum number of attempts for rate limits, overload and connection errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Anthropic client configuration.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    /// Model to use (e.g., "claude-sonnet-4-20250514").
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Anthropic LLM client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WardenError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Splits out the system prompt; Anthropic takes it as a separate parameter.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system: Option<String> = None;
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => match system.as_mut() {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => system = Some(msg.content.clone()),
                },
                Role::User | Role::Assistant => converted.push(AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        (system, converted)
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (WardenError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return (
                WardenError::llm("Authentication failed. Check your ANTHROPIC_API_KEY."),
                false,
            );
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (
                WardenError::llm("Rate limited. Please wait and try again."),
                true,
            );
        }

        // Covers 529 "overloaded".
        let is_retryable = status.is_server_error();

        if let Ok(error_response) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            return (
                WardenError::llm(format!(
                    "Anthropic API error: {}",
                    error_response.error.message
                )),
                is_retryable,
            );
        }

        (
            WardenError::llm(format!("Anthropic API error ({}): {}", status, body)),
            is_retryable,
        )
    }

    fn request_error(error: &reqwest::Error) -> (WardenError, bool) {
        if error.is_timeout() {
            (WardenError::llm("Request timed out. Try again."), true)
        } else if error.is_connect() {
            (
                WardenError::llm("Failed to connect to Anthropic API. Check your network."),
                true,
            )
        } else {
            (WardenError::llm(format!("Request failed: {}", error)), false)
        }
    }

    /// Sends one request. The flag tells whether a failure is worth retrying.
    async fn send(&self, request: &AnthropicRequest) -> std::result::Result<String, (WardenError, bool)> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| Self::request_error(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            (
                WardenError::llm(format!("Failed to read response: {}", e)),
                false,
            )
        })?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let response: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            (
                WardenError::llm(format!("Failed to parse response: {}", e)),
                false,
            )
        })?;

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err((WardenError::llm("No response from Anthropic"), false));
        }

        Ok(text)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let (system, converted_messages) = Self::convert_messages(messages);
        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system,
            messages: converted_messages,
        };

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!(attempt, model = %self.config.model, "Anthropic API request");

            let (error, is_retryable) = match self.send(&request).await {
                Ok(text) => return Ok(text),
                Err(failure) => failure,
            };

            if !is_retryable || attempt >= MAX_RETRY_ATTEMPTS {
                return Err(error);
            }

            warn!(
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Anthropic API request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = AnthropicConfig::new("sk-ant-test", "claude-sonnet-4-20250514")
            .with_timeout(60)
            .with_max_tokens(512);
        assert_eq!(config.api_key, "sk-ant-test");
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_tokens, 512);
    }

    #[test]
    fn test_convert_messages_joins_system_prompts() {
        let messages = vec![
            Message::system("You write SQL."),
            Message::system("Schema: users"),
            Message::user("Hello"),
            Message::assistant("SELECT 1"),
        ];

        let (system, converted) = AnthropicClient::convert_messages(&messages);

        assert_eq!(system.as_deref(), Some("You write SQL.\n\nSchema: users"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "user");
        assert_eq!(converted[1].role, "assistant");
    }

    #[test]
    fn test_parse_error_statuses() {
        let (error, retry) = AnthropicClient::parse_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(error.to_string().contains("Authentication failed"));
        assert!(!retry);

        let (error, retry) =
            AnthropicClient::parse_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(error.to_string().contains("Rate limited"));
        assert!(retry);

        let overloaded = reqwest::StatusCode::from_u16(529).unwrap();
        let (_, retry) = AnthropicClient::parse_error(overloaded, "");
        assert!(retry);
    }

    #[test]
    fn test_parse_error_with_message() {
        let body = r#"{"error":{"message":"Invalid API key"}}"#;
        let (error, retry) = AnthropicClient::parse_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(error.to_string().contains("Invalid API key"));
        assert!(!retry);
    }

    #[test]
    fn test_request_omits_missing_system() {
        let request = AnthropicRequest {
            model: "m".to_string(),
            max_tokens: 10,
            system: None,
            messages: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
    }
}
