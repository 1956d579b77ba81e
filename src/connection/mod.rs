//! Connection management for sqlwarden.
//!
//! Maps database names to live clients and exposes them to the lifecycle.

mod manager;

pub use manager::ConnectionManager;
