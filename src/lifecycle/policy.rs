//! Lifecycle policy.
//!
//! Thresholds, retry caps and feature flags the controller obeys. Built once
//! from configuration and shared read-only by every session.

use std::time::Duration;

use crate::safety::DEFAULT_DELETE_ROWS_THRESHOLD;

/// Default cap on repair candidates requested per session.
pub const DEFAULT_MAX_GENERATION_RETRIES: u32 = 3;

/// Default time budget for one statement execution.
pub const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time budget for one repair request.
pub const DEFAULT_REPAIR_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable policy handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// DELETEs estimated to touch more rows than this need confirmation.
    pub delete_rows_threshold: u64,
    pub max_generation_retries: u32,
    pub max_execution_retries: u32,
    /// When false, every execution failure is terminal.
    pub enable_intelligent_retry: bool,
    /// Attach the database's table list to missing-relation failures.
    pub suggest_available_tables: bool,
    /// Emit each repair step on the audit log target.
    pub log_sql_repairs: bool,
    pub executor_timeout: Duration,
    pub repair_timeout: Duration,
}

impl LifecyclePolicy {
    /// Creates a policy with default values. The execution retry cap has no
    /// default and must be given.
    pub fn new(max_execution_retries: u32) -> Self {
        Self {
            delete_rows_threshold: DEFAULT_DELETE_ROWS_THRESHOLD,
            max_generation_retries: DEFAULT_MAX_GENERATION_RETRIES,
            max_execution_retries,
            enable_intelligent_retry: true,
            suggest_available_tables: true,
            log_sql_repairs: true,
            executor_timeout: DEFAULT_EXECUTOR_TIMEOUT,
            repair_timeout: DEFAULT_REPAIR_TIMEOUT,
        }
    }

    pub fn with_delete_rows_threshold(mut self, threshold: u64) -> Self {
        self.delete_rows_threshold = threshold;
        self
    }

    pub fn with_max_generation_retries(mut self, max: u32) -> Self {
        self.max_generation_retries = max;
        self
    }

    pub fn with_intelligent_retry(mut self, enabled: bool) -> Self {
        self.enable_intelligent_retry = enabled;
        self
    }

    pub fn with_table_suggestions(mut self, enabled: bool) -> Self {
        self.suggest_available_tables = enabled;
        self
    }

    pub fn with_repair_logging(mut self, enabled: bool) -> Self {
        self.log_sql_repairs = enabled;
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn with_repair_timeout(mut self, timeout: Duration) -> Self {
        self.repair_timeout = timeout;
        self
    }
}
