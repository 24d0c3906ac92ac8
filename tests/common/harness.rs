//! In-memory event loop with a hand-driven clock and context

use super::builders::epoch;
use chrono::{DateTime, Utc};
use event_loop_core::clock::{Clock, ManualClock};
use event_loop_core::config::EventLoopConfig;
use event_loop_core::context::StaticContextProvider;
use event_loop_core::orchestration::EventLoop;
use event_loop_core::store::{InMemoryStore, QueueStore};
use std::sync::Arc;

pub struct TestLoop {
    pub event_loop: EventLoop,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub context: Arc<StaticContextProvider>,
}

impl TestLoop {
    pub fn new(mode: &str, severity: i32) -> Self {
        Self::with_config(mode, severity, EventLoopConfig::default())
    }

    pub fn with_config(mode: &str, severity: i32, config: EventLoopConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let context = Arc::new(StaticContextProvider::new(mode, severity));
        let event_loop = EventLoop::builder(store.clone(), context.clone())
            .with_clock(clock.clone())
            .with_config(config)
            .with_worker_id("test-worker")
            .build()
            .expect("valid test configuration");

        Self {
            event_loop,
            store,
            clock,
            context,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Publish an event of `event_type` and dispatch it, returning the number
    /// of entries enqueued
    pub async fn fire(&self, event_type: &str) -> usize {
        let event_id = self
            .event_loop
            .publish(event_type, None, None, serde_json::json!({}))
            .await
            .expect("publish");
        self.event_loop
            .dispatch(event_id)
            .await
            .expect("dispatch")
            .enqueued_count()
    }

    pub async fn pending(&self) -> i64 {
        self.store
            .status_counts(None)
            .await
            .expect("status counts")
            .get(event_loop_core::QueueStatus::Pending)
    }
}
