//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients.

use std::sync::Arc;

use crate::error::{Result, WardenError};
use crate::llm::{AnthropicClient, AnthropicConfig, LlmClient, LlmProvider, MockLlmClient};

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Creates an LLM client for the given provider.
///
/// The Anthropic key is read from `ANTHROPIC_API_KEY`. The model is resolved
/// in order:
/// 1. Provided `model` parameter
/// 2. `ANTHROPIC_MODEL`
/// 3. Provider default
pub fn create_client(provider: LlmProvider, model: Option<String>) -> Result<Arc<dyn LlmClient>> {
    create_client_with_env(provider, model, |key| std::env::var(key).ok())
}

/// Like [`create_client`], reading variables through `lookup`.
pub fn create_client_with_env(
    provider: LlmProvider,
    model: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LlmClient>> {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    match provider {
        LlmProvider::Anthropic => {
            let key = non_empty("ANTHROPIC_API_KEY").ok_or_else(|| {
                WardenError::llm("No API key configured. Set ANTHROPIC_API_KEY.")
            })?;
            let model = model
                .or_else(|| non_empty("ANTHROPIC_MODEL"))
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string());
            Ok(Arc::new(AnthropicClient::new(AnthropicConfig::new(
                key, model,
            ))?))
        }
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}
