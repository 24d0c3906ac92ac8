use super::states::QueueStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("Cannot apply {event} to entry in {from} state")]
    InvalidTransition { from: QueueStatus, event: String },

    #[error("Entry is terminal in {0} state")]
    Terminal(QueueStatus),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
