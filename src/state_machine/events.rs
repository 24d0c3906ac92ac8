use serde::{Deserialize, Serialize};

/// Events that drive queue entry transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    /// A worker takes exclusive ownership
    Claim,
    /// Execution succeeded
    Complete,
    /// Execution failed with retries remaining
    Retry,
    /// Execution failed and retries are exhausted
    FailTerminally,
    /// Operator cancellation
    Skip,
}

impl QueueEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Complete => "complete",
            Self::Retry => "retry",
            Self::FailTerminally => "fail",
            Self::Skip => "skip",
        }
    }
}
