//! Request coordinator errors.

use thiserror::Error;

use crate::scheduler::SchedulerError;

/// Failure of a coordinated request.
///
/// Cloneable because deduplicated callers share one result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Terminal scheduler failure, passed through unchanged.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("batch call to {endpoint} failed for all {members} members: {source}")]
    Batch {
        endpoint: String,
        members: usize,
        #[source]
        source: SchedulerError,
    },

    #[error("batch reply from {endpoint} had {actual} results for {expected} members")]
    BatchLengthMismatch { endpoint: String, expected: usize, actual: usize },

    #[error("unexpected reply shape from {endpoint}")]
    MalformedReply { endpoint: String },

    #[error("request abandoned before completion")]
    Abandoned,
}

impl RequestError {
    /// The underlying scheduler failure, if any.
    pub fn scheduler_error(&self) -> Option<&SchedulerError> {
        match self {
            Self::Scheduler(e) | Self::Batch { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self.scheduler_error(), Some(SchedulerError::QueueFull { .. }))
    }
}
