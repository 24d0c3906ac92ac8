//! Error types for the event loop.
//!

use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventLoopError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("Rule validation error: {0}")]
    RuleValidation(String),
    #[error("Rule {0} not found")]
    RuleNotFound(i64),
    #[error("Queue entry {0} not found")]
    QueueEntryNotFound(i64),
    #[error("Invalid transition for queue entry {queue_id}: {reason}")]
    InvalidTransition { queue_id: i64, reason: String },
    #[error("Queue entry {queue_id} is not claimed by {worker_id} (held by {claimed_by:?})")]
    ClaimNotOwned {
        queue_id: i64,
        worker_id: String,
        claimed_by: Option<String>,
    },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EventLoopError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Storage and internal failures are transient. Everything else describes
    /// a request that will keep failing until its input changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }

    pub fn invalid_transition(queue_id: i64, error: StateMachineError) -> Self {
        Self::InvalidTransition {
            queue_id,
            reason: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for EventLoopError {
    fn from(error: serde_json::Error) -> Self {
        EventLoopError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for EventLoopError {
    fn from(err: sqlx::Error) -> Self {
        EventLoopError::Database(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for EventLoopError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        EventLoopError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventLoopError>;
