//! LLM integration for sqlwarden.
//!
//! Turns questions into SQL and proposes corrections for SQL that failed.
//! Providers sit behind the [`LlmClient`] trait.

pub mod anthropic;
pub mod factory;
pub mod mock;
pub mod parser;
pub mod prompt;
pub mod service;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use factory::create_client;
pub use mock::MockLlmClient;
pub use parser::{extract_sql, is_natural_language};
pub use prompt::{build_generation_messages, build_repair_messages};
pub use service::{LlmRepairer, LlmService};
pub use types::{Message, Role};

use async_trait::async_trait;
use std::str::FromStr;

use crate::error::Result;

/// Trait for LLM clients that can generate completions.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages and returns the full text.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Anthropic (Claude)
    #[default]
    Anthropic,
    /// Deterministic client for tests and `--llm mock` (no API key required)
    Mock,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
