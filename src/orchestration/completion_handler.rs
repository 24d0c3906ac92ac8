//! # Completion Handler
//!
//! Records the outcome of an executed entry and applies the retry policy.
//!
//! A success ends the entry `COMPLETED`. A failure consumes one attempt: the
//! entry re-opens as `PENDING` at its original priority while attempts remain,
//! otherwise it ends `FAILED` with its error kept for audit. Retries are driven
//! only by callers that actually attempted the work.

use crate::clock::Clock;
use crate::error::{EventLoopError, Result};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::models::QueueEntry;
use crate::state_machine::QueueStatus;
use crate::store::{EventLoopStore, ExecutionAttempt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Where an entry ended up after `complete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Completed(QueueEntry),
    /// Re-opened for another attempt
    Retrying(QueueEntry),
    /// Retries exhausted
    Failed(QueueEntry),
}

impl CompletionOutcome {
    pub(crate) fn from_entry(entry: QueueEntry) -> Self {
        match entry.status {
            QueueStatus::Completed => Self::Completed(entry),
            QueueStatus::Pending => Self::Retrying(entry),
            _ => Self::Failed(entry),
        }
    }

    pub fn entry(&self) -> &QueueEntry {
        match self {
            Self::Completed(entry) | Self::Retrying(entry) | Self::Failed(entry) => entry,
        }
    }

    pub fn into_entry(self) -> QueueEntry {
        match self {
            Self::Completed(entry) | Self::Retrying(entry) | Self::Failed(entry) => entry,
        }
    }

    pub fn retry_count(&self) -> i32 {
        self.entry().retry_count
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying(_))
    }
}

pub struct CompletionHandler {
    store: Arc<dyn EventLoopStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
}

impl CompletionHandler {
    pub fn new(store: Arc<dyn EventLoopStore>, clock: Arc<dyn Clock>, publisher: EventPublisher) -> Self {
        Self {
            store,
            clock,
            publisher,
        }
    }

    /// Record `worker_id`'s attempt at `queue_id`.
    ///
    /// Rejected with [`EventLoopError::ClaimNotOwned`] when another worker now
    /// holds the claim, e.g. after the watchdog expired this worker's claim
    /// and the entry was claimed again.
    #[instrument(skip(self, result, error), fields(queue_id = queue_id, worker_id = worker_id, success = success))]
    pub async fn complete(
        &self,
        queue_id: i64,
        worker_id: &str,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    ) -> Result<CompletionOutcome> {
        let attempt = ExecutionAttempt {
            success,
            result,
            error,
        };

        let entry = self
            .store
            .complete(queue_id, worker_id, attempt, self.clock.now())
            .await
            .map_err(|e| {
                match &e {
                    EventLoopError::ClaimNotOwned { claimed_by, .. } => warn!(
                        claimed_by = ?claimed_by,
                        "Discarding report for a claim this worker no longer holds"
                    ),
                    _ => error!(error = %e, "Failed to record completion"),
                }
                e
            })?;

        let outcome = CompletionOutcome::from_entry(entry);
        self.announce(&outcome);
        Ok(outcome)
    }

    /// Log and publish the outcome of an attempt, whoever recorded it
    pub(crate) fn announce(&self, outcome: &CompletionOutcome) {
        let entry = outcome.entry();
        let event = match outcome {
            CompletionOutcome::Completed(_) => {
                info!(
                    queue_id = entry.queue_id,
                    target_action = %entry.target_action,
                    duration_ms = entry.execution_duration_ms,
                    "Entry completed"
                );
                LifecycleEvent::EntryCompleted {
                    queue_id: entry.queue_id,
                    duration_ms: entry.execution_duration_ms,
                }
            }
            CompletionOutcome::Retrying(_) => {
                warn!(
                    queue_id = entry.queue_id,
                    retry_count = entry.retry_count,
                    max_retries = entry.max_retries,
                    "Entry failed; re-opened for retry"
                );
                LifecycleEvent::EntryRetrying {
                    queue_id: entry.queue_id,
                    retry_count: entry.retry_count,
                    max_retries: entry.max_retries,
                }
            }
            CompletionOutcome::Failed(_) => {
                error!(
                    queue_id = entry.queue_id,
                    retry_count = entry.retry_count,
                    target_agent = %entry.target_agent,
                    target_action = %entry.target_action,
                    "Entry failed terminally"
                );
                LifecycleEvent::EntryFailed {
                    queue_id: entry.queue_id,
                    retry_count: entry.retry_count,
                    error: entry.error.clone(),
                }
            }
        };
        self.publisher.publish(event);
    }
}
