//! Scheduler error types.

use thiserror::Error;

/// Terminal outcomes of a scheduled task other than success.
///
/// Cloneable because one failed batch task fans out to many waiters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("queue full: {depth}/{max} pending tasks")]
    QueueFull { depth: usize, max: usize },

    #[error("task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: u64, timeout_ms: u64 },

    #[error("task {task_id} failed: {message}")]
    Worker { task_id: u64, message: String },

    #[error("scheduler shut down")]
    Shutdown,
}

impl SchedulerError {
    /// Whether the retry budget applies to this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Worker { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
