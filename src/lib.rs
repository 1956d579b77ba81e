//! sqlwarden - natural-language SQL agent with risk-gated execution.
//!
//! This library exposes the core modules for use in integration tests.

pub mod agent;
pub mod cli;
pub mod config;
pub mod connection;
pub mod console;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod llm;
pub mod logging;
pub mod render;
pub mod safety;
