//! # Dispatcher
//!
//! Turns one published event into zero or more `PENDING` queue entries.
//!
//! The dispatcher resolves the operating context once per event, asks the
//! registry for candidate rules, runs them through the
//! [`rule_matcher`](super::rule_matcher) gates and enqueues one entry per
//! firing rule. Each enqueue goes through [`QueueStore::enqueue_for_rule`],
//! which re-checks the cooldown and records the firing in the same atomic
//! step, so a rule that loses a race with a concurrent dispatch is reported as
//! cooling down instead of firing twice.
//!
//! A rule fires at most once per event. Dispatching an event again, e.g. after
//! a storage error cut the fan-out short, leaves the entries that already
//! exist untouched and reports them under `already_enqueued`, so retrying a
//! failed dispatch only fills in what is missing.
//!
//! Nothing is executed here; the dispatcher only records intent.

use super::rule_matcher::{select_rules, GateRejection, RuleRejection};
use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::context::{ContextProvider, OperatingContext};
use crate::error::{EventLoopError, Result};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::models::{ContextSnapshot, Event, NewQueueEntry, QueueEntry, Rule};
use crate::store::{EventLoopStore, FireOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// What one dispatch did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub event_id: i64,
    pub enqueued: Vec<QueueEntry>,
    /// Entries an earlier dispatch of the same event already created
    #[serde(default)]
    pub already_enqueued: Vec<QueueEntry>,
    pub rejected: Vec<RuleRejection>,
}

impl DispatchReport {
    pub fn empty(event_id: i64) -> Self {
        Self {
            event_id,
            ..Self::default()
        }
    }

    pub fn enqueued_count(&self) -> usize {
        self.enqueued.len()
    }

    pub fn queue_ids(&self) -> Vec<i64> {
        self.enqueued.iter().map(|entry| entry.queue_id).collect()
    }
}

pub struct Dispatcher {
    store: Arc<dyn EventLoopStore>,
    context: Arc<dyn ContextProvider>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EventLoopStore>,
        context: Arc<dyn ContextProvider>,
        clock: Arc<dyn Clock>,
        publisher: EventPublisher,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            context,
            clock,
            publisher,
            config,
        }
    }

    /// Load the event and dispatch it; unknown ids are [`EventLoopError::InvalidEvent`]
    pub async fn dispatch_event_id(&self, event_id: i64) -> Result<DispatchReport> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| EventLoopError::InvalidEvent(format!("event {event_id} not found")))?;
        self.dispatch(&event).await
    }

    #[instrument(skip(self, event), fields(event_id = event.event_id, event_type = %event.event_type))]
    pub async fn dispatch(&self, event: &Event) -> Result<DispatchReport> {
        let context = self.context.current().await?;
        let candidates = self
            .store
            .find_matching(
                &event.event_type,
                event.source_agent.as_deref(),
                event.source_layer.as_deref(),
            )
            .await?;

        let now = self.clock.now();
        let selection = select_rules(event, &candidates, &context, now);

        debug!(
            mode = %context.mode,
            severity = context.severity,
            candidates = candidates.len(),
            firing = selection.firing.len(),
            "Evaluated rules"
        );

        let mut report = DispatchReport {
            event_id: event.event_id,
            enqueued: Vec::with_capacity(selection.firing.len()),
            already_enqueued: Vec::new(),
            rejected: selection.rejected,
        };

        for rule in &selection.firing {
            let entry = self.build_entry(event, rule, &context, now)?;
            let outcome = self
                .store
                .enqueue_for_rule(rule.rule_id, entry, now)
                .await
                .map_err(|e| {
                    error!(
                        rule_id = rule.rule_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to enqueue rule firing"
                    );
                    e
                })?;
            match outcome {
                FireOutcome::Enqueued { rule, entry } => {
                    debug!(
                        rule_id = rule.rule_id,
                        queue_id = entry.queue_id,
                        fire_count = rule.fire_count,
                        "Rule fired"
                    );
                    self.publisher.publish(LifecycleEvent::EntryEnqueued {
                        queue_id: entry.queue_id,
                        event_id: entry.event_id,
                        rule_id: entry.rule_id,
                        target_agent: entry.target_agent.clone(),
                        target_action: entry.target_action.clone(),
                        priority: entry.priority,
                    });
                    report.enqueued.push(entry);
                }
                FireOutcome::AlreadyEnqueued { entry } => {
                    debug!(
                        rule_id = rule.rule_id,
                        queue_id = entry.queue_id,
                        "Rule already fired for this event"
                    );
                    report.already_enqueued.push(entry);
                }
                FireOutcome::CoolingDown { remaining } => {
                    debug!(rule_id = rule.rule_id, "Rule fired concurrently; cooling down");
                    report.rejected.push(RuleRejection {
                        rule_id: rule.rule_id,
                        rule_name: rule.name.clone(),
                        rejection: GateRejection::cooldown(remaining),
                    });
                }
                FireOutcome::Inactive => {
                    report.rejected.push(RuleRejection {
                        rule_id: rule.rule_id,
                        rule_name: rule.name.clone(),
                        rejection: GateRejection::Inactive,
                    });
                }
            }
        }

        info!(
            enqueued = report.enqueued_count(),
            already_enqueued = report.already_enqueued.len(),
            rejected = report.rejected.len(),
            "Event dispatched"
        );

        Ok(report)
    }

    fn build_entry(
        &self,
        event: &Event,
        rule: &Rule,
        context: &OperatingContext,
        now: DateTime<Utc>,
    ) -> Result<NewQueueEntry> {
        let snapshot = ContextSnapshot::capture(context, &event.event_type, &rule.name, now);
        Ok(NewQueueEntry {
            event_id: event.event_id,
            rule_id: Some(rule.rule_id),
            target_agent: rule.target_agent.clone(),
            target_action: rule.target_action.clone(),
            priority: rule.priority,
            max_retries: rule.max_retries.unwrap_or(self.config.default_max_retries),
            context_snapshot: serde_json::to_value(snapshot)?,
        })
    }
}
