//! # Work Claimer
//!
//! Worker-side handle for taking exclusive ownership of pending queue entries.
//!
//! ## Key Features
//!
//! - **Non-blocking claims**: entries held by a racing claimer are skipped,
//!   never awaited
//! - **Priority then FIFO**: lower priority values first, earlier
//!   `queued_at` first within a priority
//! - **Bounded batches**: requested limits are clamped to
//!   `claim.max_batch_size`
//! - **Owner tracking**: every claimed entry records this claimer's worker id,
//!   and only that id may report its outcome
//!
//! ## Usage
//!
//! ```rust
//! use event_loop_core::config::ClaimConfig;
//! use event_loop_core::orchestration::WorkClaimer;
//! use event_loop_core::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let claimer = WorkClaimer::with_defaults(Arc::new(InMemoryStore::new()), "risk-worker-1");
//!
//! for entry in claimer.claim(Some("risk"), 10).await.unwrap() {
//!     println!("claimed {} -> {}", entry.queue_id, entry.target_action);
//!     claimer.complete(entry.queue_id, true, None, None).await.unwrap();
//! }
//! # });
//! ```

use super::completion_handler::{CompletionHandler, CompletionOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::ClaimConfig;
use crate::error::Result;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::models::QueueEntry;
use crate::store::{ClaimRequest, EventLoopStore};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub struct WorkClaimer {
    store: Arc<dyn EventLoopStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    completions: CompletionHandler,
    worker_id: String,
    config: ClaimConfig,
}

impl WorkClaimer {
    pub fn new(
        store: Arc<dyn EventLoopStore>,
        clock: Arc<dyn Clock>,
        publisher: EventPublisher,
        worker_id: impl Into<String>,
        config: ClaimConfig,
    ) -> Self {
        let completions = CompletionHandler::new(store.clone(), clock.clone(), publisher.clone());
        Self {
            store,
            clock,
            publisher,
            completions,
            worker_id: worker_id.into(),
            config,
        }
    }

    /// Claimer with the system clock, default limits and no subscribers
    pub fn with_defaults(store: Arc<dyn EventLoopStore>, worker_id: impl Into<String>) -> Self {
        Self::new(
            store,
            Arc::new(SystemClock),
            EventPublisher::default(),
            worker_id,
            ClaimConfig::default(),
        )
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim up to `limit` pending entries, optionally only those addressed
    /// to `target_agent`.
    ///
    /// A zero limit returns nothing and touches nothing.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn claim(&self, target_agent: Option<&str>, limit: usize) -> Result<Vec<QueueEntry>> {
        let actual_limit = limit.min(self.config.max_batch_size);
        if actual_limit == 0 {
            return Ok(Vec::new());
        }

        debug!(
            limit = actual_limit,
            target_agent = target_agent,
            "Claiming pending entries"
        );

        let request = ClaimRequest {
            worker_id: self.worker_id.clone(),
            target_agent: target_agent.map(str::to_string),
            limit: actual_limit,
        };

        let claimed = self
            .store
            .claim(&request, self.clock.now())
            .await
            .map_err(|e| {
                error!(error = %e, retryable = e.is_retryable(), "Claim failed");
                e
            })?;

        for entry in &claimed {
            self.publisher.publish(LifecycleEvent::EntryClaimed {
                queue_id: entry.queue_id,
                worker_id: self.worker_id.clone(),
            });
        }

        if !claimed.is_empty() {
            info!(
                claimed = claimed.len(),
                requested = actual_limit,
                "Claimed entries"
            );
        }

        Ok(claimed)
    }

    /// Report the outcome of an entry this claimer holds
    pub async fn complete(
        &self,
        queue_id: i64,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    ) -> Result<CompletionOutcome> {
        self.completions
            .complete(queue_id, &self.worker_id, success, result, error)
            .await
    }
}
