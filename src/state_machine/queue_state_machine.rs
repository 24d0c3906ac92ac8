use super::errors::{StateMachineError, StateMachineResult};
use super::events::QueueEvent;
use super::states::QueueStatus;

/// Outcome of a failed attempt under the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureResolution {
    pub event: QueueEvent,
    pub retry_count: i32,
}

impl FailureResolution {
    pub fn target_status(&self) -> QueueStatus {
        match self.event {
            QueueEvent::Retry => QueueStatus::Pending,
            _ => QueueStatus::Failed,
        }
    }

    pub fn will_retry(&self) -> bool {
        self.event == QueueEvent::Retry
    }
}

pub struct QueueStateMachine;

impl QueueStateMachine {
    /// Determine the target state for an event, rejecting anything the
    /// lifecycle does not allow.
    pub fn determine_target_state(
        current: QueueStatus,
        event: QueueEvent,
    ) -> StateMachineResult<QueueStatus> {
        let target = match (current, event) {
            (QueueStatus::Pending, QueueEvent::Claim) => QueueStatus::Processing,
            (QueueStatus::Pending, QueueEvent::Skip) => QueueStatus::Skipped,
            (QueueStatus::Processing, QueueEvent::Complete) => QueueStatus::Completed,
            (QueueStatus::Processing, QueueEvent::Retry) => QueueStatus::Pending,
            (QueueStatus::Processing, QueueEvent::FailTerminally) => QueueStatus::Failed,
            (from, _) if from.is_terminal() => return Err(StateMachineError::Terminal(from)),
            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply the retry policy to one failed attempt.
    ///
    /// The count never exceeds `max_retries`; with `max_retries == 0` the
    /// first failure is terminal and the count stays at zero.
    pub fn resolve_failure(retry_count: i32, max_retries: i32) -> FailureResolution {
        let max_retries = max_retries.max(0);
        let attempted = retry_count.saturating_add(1);

        if attempted < max_retries {
            FailureResolution {
                event: QueueEvent::Retry,
                retry_count: attempted,
            }
        } else {
            FailureResolution {
                event: QueueEvent::FailTerminally,
                retry_count: attempted.min(max_retries),
            }
        }
    }
}
