//! # Event Loop
//!
//! Single entry point wiring the registry, dispatcher, claimer, completion
//! handler and watchdog over one store, one clock and one notification
//! channel.
//!
//! ## Usage
//!
//! ```rust
//! use event_loop_core::context::StaticContextProvider;
//! use event_loop_core::models::NewRule;
//! use event_loop_core::orchestration::EventLoop;
//! use event_loop_core::store::InMemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let event_loop = EventLoop::builder(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(StaticContextProvider::new("BULL", 2)),
//! )
//! .build()
//! .unwrap();
//!
//! event_loop
//!     .register_rule(NewRule::new("recalibrate", "regime_shift", "strategist", "recalibrate"))
//!     .await
//!     .unwrap();
//!
//! let event_id = event_loop
//!     .publish("regime_shift", Some("classifier"), None, json!({"to": "BULL"}))
//!     .await
//!     .unwrap();
//! assert_eq!(event_loop.dispatch(event_id).await.unwrap().enqueued_count(), 1);
//!
//! let work = event_loop.claim(Some("strategist"), 10).await.unwrap();
//! event_loop
//!     .complete(work[0].queue_id, true, Some(json!({"ok": true})), None)
//!     .await
//!     .unwrap();
//! # });
//! ```

use super::completion_handler::{CompletionHandler, CompletionOutcome};
use super::dispatcher::{DispatchReport, Dispatcher};
use super::queue_watchdog::{QueueWatchdog, WatchdogReport};
use super::work_claimer::WorkClaimer;
use crate::clock::{Clock, SystemClock};
use crate::config::EventLoopConfig;
use crate::context::ContextProvider;
use crate::error::{EventLoopError, Result};
use crate::events::{EventPublisher, LifecycleEvent, PublishedEvent};
use crate::models::{Event, NewEvent, NewRule, QueueEntry, QueueTransition, Rule, StatusCounts};
use crate::registry::RuleRegistry;
use crate::store::EventLoopStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub struct EventLoopBuilder {
    store: Arc<dyn EventLoopStore>,
    context: Arc<dyn ContextProvider>,
    clock: Arc<dyn Clock>,
    config: EventLoopConfig,
    worker_id: Option<String>,
}

impl EventLoopBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EventLoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity used by [`EventLoop::claim`]; generated from
    /// `claim.worker_id_prefix` when unset
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn build(self) -> Result<EventLoop> {
        self.config.validate()?;

        let publisher = EventPublisher::new(self.config.events.channel_capacity);
        let worker_id = self
            .worker_id
            .unwrap_or_else(|| self.config.claim.generate_worker_id());

        let registry = RuleRegistry::new(
            self.store.clone(),
            self.clock.clone(),
            publisher.clone(),
            self.config.dispatch.priority_bounds(),
        );
        let dispatcher = Dispatcher::new(
            self.store.clone(),
            self.context,
            self.clock.clone(),
            publisher.clone(),
            self.config.dispatch.clone(),
        );
        let claimer = WorkClaimer::new(
            self.store.clone(),
            self.clock.clone(),
            publisher.clone(),
            worker_id,
            self.config.claim.clone(),
        );
        let completions = Arc::new(CompletionHandler::new(
            self.store.clone(),
            self.clock.clone(),
            publisher.clone(),
        ));
        let watchdog = QueueWatchdog::new(
            self.store.clone(),
            self.clock.clone(),
            completions,
            self.config.watchdog.clone(),
        );

        debug!(worker_id = %claimer.worker_id(), "Event loop assembled");

        Ok(EventLoop {
            store: self.store,
            clock: self.clock,
            publisher,
            config: self.config,
            registry,
            dispatcher,
            claimer,
            watchdog,
        })
    }
}

pub struct EventLoop {
    store: Arc<dyn EventLoopStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    config: EventLoopConfig,
    registry: RuleRegistry,
    dispatcher: Dispatcher,
    claimer: WorkClaimer,
    watchdog: QueueWatchdog,
}

impl EventLoop {
    pub fn builder(
        store: Arc<dyn EventLoopStore>,
        context: Arc<dyn ContextProvider>,
    ) -> EventLoopBuilder {
        EventLoopBuilder {
            store,
            context,
            clock: Arc::new(SystemClock),
            config: EventLoopConfig::default(),
            worker_id: None,
        }
    }

    /// Connect to PostgreSQL per `config.database`, apply pending migrations
    /// and assemble an event loop over the pool
    #[cfg(feature = "postgres")]
    pub async fn connect(
        config: EventLoopConfig,
        context: Arc<dyn ContextProvider>,
    ) -> Result<EventLoop> {
        let connection = crate::database::DatabaseConnection::new(&config.database).await?;
        if !connection.health_check().await? {
            return Err(EventLoopError::Database(
                "health check returned an unexpected value".to_string(),
            ));
        }
        crate::database::run_migrations(connection.pool()).await?;
        let store = Arc::new(crate::store::PostgresStore::new(connection.pool().clone()));
        EventLoop::builder(store, context).with_config(config).build()
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn worker_id(&self) -> &str {
        self.claimer.worker_id()
    }

    /// Store an event for later dispatch; returns its id
    pub async fn publish(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<i64> {
        let mut event = NewEvent::new(event_type).with_payload(payload);
        event.source_agent = source_agent.map(str::to_string);
        event.source_layer = source_layer.map(str::to_string);
        Ok(self.publish_event(event).await?.event_id)
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn publish_event(&self, event: NewEvent) -> Result<Event> {
        if event.event_type.trim().is_empty() {
            return Err(EventLoopError::InvalidEvent(
                "event_type must not be empty".to_string(),
            ));
        }

        let stored = self.store.insert_event(event, self.clock.now()).await?;
        debug!(event_id = stored.event_id, "Event stored");
        self.publisher.publish(LifecycleEvent::EventPublished {
            event_id: stored.event_id,
            event_type: stored.event_type.clone(),
        });
        Ok(stored)
    }

    /// Dispatch a stored event.
    ///
    /// An unknown id is logged and yields an empty report. Storage failures
    /// are returned so callers can retry.
    pub async fn dispatch(&self, event_id: i64) -> Result<DispatchReport> {
        match self.dispatcher.dispatch_event_id(event_id).await {
            Err(EventLoopError::InvalidEvent(reason)) => {
                warn!(event_id = event_id, reason = %reason, "Ignoring dispatch of unknown event");
                Ok(DispatchReport::empty(event_id))
            }
            other => other,
        }
    }

    /// Claim as this loop's own worker
    pub async fn claim(&self, target_agent: Option<&str>, limit: usize) -> Result<Vec<QueueEntry>> {
        self.claimer.claim(target_agent, limit).await
    }

    /// A claimer with its own identity sharing this loop's store and channel
    pub fn worker(&self, worker_id: impl Into<String>) -> WorkClaimer {
        WorkClaimer::new(
            self.store.clone(),
            self.clock.clone(),
            self.publisher.clone(),
            worker_id,
            self.config.claim.clone(),
        )
    }

    /// Report the outcome of an entry claimed through [`EventLoop::claim`].
    ///
    /// Entries claimed by a [`EventLoop::worker`] handle are completed through
    /// that handle; only the current claim holder may report.
    pub async fn complete(
        &self,
        queue_id: i64,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<serde_json::Value>,
    ) -> Result<CompletionOutcome> {
        self.claimer.complete(queue_id, success, result, error).await
    }

    /// Cancel a `PENDING` entry
    #[instrument(skip(self, reason))]
    pub async fn skip(&self, queue_id: i64, reason: Option<String>) -> Result<QueueEntry> {
        let entry = self
            .store
            .skip(queue_id, reason.clone(), self.clock.now())
            .await?;
        info!(queue_id = queue_id, reason = ?reason, "Entry skipped");
        self.publisher
            .publish(LifecycleEvent::EntrySkipped { queue_id, reason });
        Ok(entry)
    }

    pub async fn register_rule(&self, rule: NewRule) -> Result<Rule> {
        self.registry.register_rule(rule).await
    }

    pub async fn deactivate_rule(&self, rule_id: i64) -> Result<Rule> {
        self.registry.deactivate_rule(rule_id).await
    }

    pub async fn activate_rule(&self, rule_id: i64) -> Result<Rule> {
        self.registry.activate_rule(rule_id).await
    }

    pub async fn sweep_stale(&self) -> Result<WatchdogReport> {
        self.watchdog.sweep().await
    }

    pub async fn status_counts(&self, target_agent: Option<&str>) -> Result<StatusCounts> {
        self.store.status_counts(target_agent).await
    }

    pub async fn entry(&self, queue_id: i64) -> Result<QueueEntry> {
        self.store
            .get_entry(queue_id)
            .await?
            .ok_or(EventLoopError::QueueEntryNotFound(queue_id))
    }

    pub async fn transitions(&self, queue_id: i64) -> Result<Vec<QueueTransition>> {
        self.store.transitions(queue_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContextProvider;
    use crate::state_machine::QueueStatus;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn event_loop() -> EventLoop {
        EventLoop::builder(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticContextProvider::new("BULL", 0)),
        )
        .with_worker_id("loop-worker")
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = EventLoopConfig::default();
        config.claim.max_batch_size = 0;
        let result = EventLoop::builder(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticContextProvider::new("BULL", 0)),
        )
        .with_config(config)
        .build();
        assert!(matches!(result, Err(EventLoopError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unknown_event_dispatches_nothing() {
        let event_loop = event_loop();
        let report = event_loop.dispatch(999).await.unwrap();
        assert_eq!(report.enqueued_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_event_type_is_rejected() {
        let event_loop = event_loop();
        let err = event_loop.publish("  ", None, None, json!({})).await.unwrap_err();
        assert!(matches!(err, EventLoopError::InvalidEvent(_)));
    }

    #[tokio::test]
    async fn test_skip_pending_entry() {
        let event_loop = event_loop();
        event_loop
            .register_rule(NewRule::new("r", "fill", "ledger", "record"))
            .await
            .unwrap();
        let event_id = event_loop.publish("fill", None, None, json!({})).await.unwrap();
        let report = event_loop.dispatch(event_id).await.unwrap();
        let queue_id = report.queue_ids()[0];

        let skipped = event_loop
            .skip(queue_id, Some("superseded".to_string()))
            .await
            .unwrap();
        assert_eq!(skipped.status, QueueStatus::Skipped);
        assert!(event_loop.claim(None, 10).await.unwrap().is_empty());

        let err = event_loop.skip(queue_id, None).await.unwrap_err();
        assert!(matches!(err, EventLoopError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_claim_uses_loop_worker_id() {
        let event_loop = event_loop();
        event_loop
            .register_rule(NewRule::new("r", "fill", "ledger", "record"))
            .await
            .unwrap();
        let event_id = event_loop.publish("fill", None, None, json!({})).await.unwrap();
        event_loop.dispatch(event_id).await.unwrap();

        let claimed = event_loop.claim(None, 1).await.unwrap();
        assert_eq!(claimed[0].claimed_by.as_deref(), Some("loop-worker"));
        assert_eq!(event_loop.worker_id(), "loop-worker");
    }
}
