//! # Queue Watchdog
//!
//! Recovers entries left `PROCESSING` by a worker that never reported back.
//!
//! A claim older than `watchdog.stale_after_seconds` is treated as one failed
//! attempt with the error `"claim expired"`, so the normal retry policy
//! decides whether the entry re-opens or fails terminally. Each recovery is
//! conditional on the entry still being `PROCESSING` under the same claim: a
//! worker that completes concurrently either lands first (and the watchdog
//! leaves the entry alone) or finds the entry already moved on.
//!
//! The sweep runs only when called; scheduling it is up to the embedder.

use super::completion_handler::{CompletionHandler, CompletionOutcome};
use crate::clock::Clock;
use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::store::EventLoopStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Entries a sweep touched, by where they ended up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogReport {
    pub examined: usize,
    pub requeued: Vec<i64>,
    pub failed: Vec<i64>,
}

impl WatchdogReport {
    pub fn recovered(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }
}

pub struct QueueWatchdog {
    store: Arc<dyn EventLoopStore>,
    clock: Arc<dyn Clock>,
    completions: Arc<CompletionHandler>,
    config: WatchdogConfig,
}

impl QueueWatchdog {
    pub fn new(
        store: Arc<dyn EventLoopStore>,
        clock: Arc<dyn Clock>,
        completions: Arc<CompletionHandler>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            store,
            clock,
            completions,
            config,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<WatchdogReport> {
        let mut report = WatchdogReport::default();
        if !self.config.enabled {
            debug!("Watchdog disabled; skipping sweep");
            return Ok(report);
        }

        let now = self.clock.now();
        let cutoff = now - self.config.stale_after();
        let stale = self.store.find_stale(cutoff, self.config.batch_size).await?;
        report.examined = stale.len();

        for candidate in stale {
            let Some(entry) = self
                .store
                .expire_claim(candidate.queue_id, cutoff, now)
                .await?
            else {
                debug!(
                    queue_id = candidate.queue_id,
                    "Entry moved on before it could be expired"
                );
                continue;
            };

            warn!(
                queue_id = entry.queue_id,
                claimed_by = ?candidate.claimed_by,
                started_at = ?candidate.started_at,
                "Expired abandoned claim"
            );

            let outcome = CompletionOutcome::from_entry(entry);
            match &outcome {
                CompletionOutcome::Retrying(entry) => report.requeued.push(entry.queue_id),
                _ => report.failed.push(outcome.entry().queue_id),
            }
            self.completions.announce(&outcome);
        }

        if report.recovered() > 0 {
            info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Watchdog sweep recovered entries"
            );
        }
        Ok(report)
    }
}
