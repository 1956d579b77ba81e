//! Error types for sqlwarden.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for sqlwarden operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WardenError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors as reported by the database.
    #[error("Query error: {0}")]
    Query(String),

    /// LLM API errors (rate limits, auth, unusable responses, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model-generated SQL rejected before it reached the lifecycle.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external call exceeded its time budget or was cancelled.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(msg)
            | Self::Query(msg)
            | Self::Llm(msg)
            | Self::Config(msg)
            | Self::Validation(msg)
            | Self::Timeout(msg)
            | Self::Internal(msg) => msg,
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::Validation(_) => "Validation Error",
            Self::Timeout(_) => "Timeout",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using WardenError.
pub type Result<T> = std::result::Result<T, WardenError>;
