//! Integration tests for sqlwarden.
//!
//! `postgres_test` requires a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run it.

pub mod agent_test;
pub mod lifecycle_test;
pub mod postgres_test;
