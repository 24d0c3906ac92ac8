//! # In-Memory Store
//!
//! Process-local backend with the same atomicity guarantees as the
//! PostgreSQL store:
//!
//! - **Rules** live in a `DashMap`; a firing holds the rule's shard guard
//!   while it re-checks the cooldown, inserts the entry and bumps the
//!   bookkeeping, so concurrent dispatches serialize per rule. The same guard
//!   covers the (event, rule) firing index, so a rule fires at most once per
//!   event.
//! - **Queue entries** each sit behind their own `parking_lot::Mutex`, held
//!   only for the instant it takes to read or swap the record. A claim is a
//!   compare-and-swap on `PENDING`: the status is re-checked under the lock
//!   and entries another caller already moved on are skipped, never awaited.
//! - **Transitions** are appended while the entry lock is still held, so the
//!   audit trail never lags the status a reader can see.

use super::lifecycle::{self, ClaimRequest, ExecutionAttempt, FireOutcome};
use super::{EventStore, QueueStore, RuleStore};
use crate::error::{EventLoopError, Result};
use crate::models::{
    Event, NewEvent, NewQueueEntry, NewQueueTransition, NewRule, QueueEntry, QueueTransition,
    Rule, StatusCounts,
};
use crate::state_machine::QueueStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

type EntryCell = Arc<Mutex<QueueEntry>>;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    events: DashMap<i64, Event>,
    rules: DashMap<i64, Rule>,
    entries: DashMap<i64, EntryCell>,
    /// (event_id, rule_id) -> queue_id of the entry that firing produced
    firings: DashMap<(i64, i64), i64>,
    transitions: Mutex<Vec<QueueTransition>>,
    event_seq: AtomicI64,
    rule_seq: AtomicI64,
    queue_seq: AtomicI64,
    transition_seq: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn entry_cell(&self, queue_id: i64) -> Result<EntryCell> {
        self.entries
            .get(&queue_id)
            .map(|cell| Arc::clone(cell.value()))
            .ok_or(EventLoopError::QueueEntryNotFound(queue_id))
    }

    /// Caller must hold the entry's lock.
    fn append_transition(&self, transition: NewQueueTransition, now: DateTime<Utc>) {
        let id = Self::next_id(&self.transition_seq);
        self.transitions
            .lock()
            .push(transition.into_transition(id, now));
    }

    fn insert_entry(&self, entry: NewQueueEntry, now: DateTime<Utc>) -> QueueEntry {
        let queue_id = Self::next_id(&self.queue_seq);
        let entry = entry.into_entry(queue_id, now);
        let cell = Arc::new(Mutex::new(entry.clone()));

        // Hold the entry lock until its first transition is recorded.
        let guard = cell.lock();
        self.entries.insert(queue_id, Arc::clone(&cell));
        self.append_transition(lifecycle::enqueued_transition(&entry), now);
        drop(guard);

        entry
    }

    /// Apply `change` to one entry under its lock, persisting the result and
    /// its audit record together.
    fn mutate_entry<F>(&self, queue_id: i64, now: DateTime<Utc>, change: F) -> Result<QueueEntry>
    where
        F: FnOnce(&QueueEntry) -> Result<(QueueEntry, NewQueueTransition)>,
    {
        let cell = self.entry_cell(queue_id)?;
        let mut guard = cell.lock();
        let (next, transition) = change(&guard)?;
        *guard = next.clone();
        self.append_transition(transition, now);
        Ok(next)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        let event_id = Self::next_id(&self.event_seq);
        let event = event.into_event(event_id, now);
        self.events.insert(event_id, event.clone());
        Ok(event)
    }

    async fn get_event(&self, event_id: i64) -> Result<Option<Event>> {
        Ok(self.events.get(&event_id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn insert_rule(&self, rule: NewRule, now: DateTime<Utc>) -> Result<Rule> {
        let rule_id = Self::next_id(&self.rule_seq);
        let rule = rule.into_rule(rule_id, now);
        self.rules.insert(rule_id, rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, rule_id: i64) -> Result<Option<Rule>> {
        Ok(self.rules.get(&rule_id).map(|r| r.value().clone()))
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.rule_id);
        Ok(rules)
    }

    async fn find_matching(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
    ) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| {
                r.active && r.event_type == event_type && r.matches_source(source_agent, source_layer)
            })
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| (r.priority, r.rule_id));
        Ok(rules)
    }

    async fn mark_fired(&self, rule_id: i64, now: DateTime<Utc>) -> Result<Rule> {
        let mut rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(EventLoopError::RuleNotFound(rule_id))?;
        rule.record_fired(now);
        Ok(rule.clone())
    }

    async fn set_active(&self, rule_id: i64, active: bool, now: DateTime<Utc>) -> Result<Rule> {
        let mut rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(EventLoopError::RuleNotFound(rule_id))?;
        rule.active = active;
        rule.updated_at = now;
        Ok(rule.clone())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(&self, entry: NewQueueEntry, now: DateTime<Utc>) -> Result<QueueEntry> {
        Ok(self.insert_entry(entry, now))
    }

    async fn enqueue_for_rule(
        &self,
        rule_id: i64,
        entry: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        let mut rule = self
            .rules
            .get_mut(&rule_id)
            .ok_or(EventLoopError::RuleNotFound(rule_id))?;

        let firing = (entry.event_id, rule_id);
        if let Some(queue_id) = self.firings.get(&firing).map(|id| *id) {
            let existing = self.entry_cell(queue_id)?.lock().clone();
            debug!(rule_id = rule_id, queue_id = queue_id, "Rule already fired for event");
            return Ok(FireOutcome::AlreadyEnqueued { entry: existing });
        }

        if let Some(rejected) = lifecycle::check_fireable(&rule, now) {
            return Ok(rejected);
        }

        let entry = self.insert_entry(entry, now);
        self.firings.insert(firing, entry.queue_id);
        rule.record_fired(now);

        Ok(FireOutcome::Enqueued {
            rule: rule.clone(),
            entry,
        })
    }

    async fn claim(&self, request: &ClaimRequest, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<((i32, DateTime<Utc>, i64), EntryCell)> = self
            .entries
            .iter()
            .filter_map(|cell| {
                let guard = cell.value().lock();
                let wanted = guard.status.is_claimable()
                    && request
                        .target_agent
                        .as_deref()
                        .map_or(true, |agent| guard.target_agent == agent);
                let key = guard.claim_order_key();
                drop(guard);
                wanted.then(|| (key, Arc::clone(cell.value())))
            })
            .collect();
        candidates.sort_by_key(|(key, _)| *key);

        let mut claimed = Vec::with_capacity(request.limit.min(candidates.len()));
        for (_, cell) in candidates {
            if claimed.len() >= request.limit {
                break;
            }
            let mut guard = cell.lock();
            // Taken by a racing caller since the scan.
            if !guard.status.is_claimable() {
                continue;
            }
            let (next, transition) = lifecycle::apply_claim(&guard, &request.worker_id, now)?;
            *guard = next.clone();
            self.append_transition(transition, now);
            claimed.push(next);
        }

        debug!(
            worker_id = %request.worker_id,
            claimed = claimed.len(),
            "In-memory claim pass finished"
        );
        Ok(claimed)
    }

    async fn complete(
        &self,
        queue_id: i64,
        worker_id: &str,
        attempt: ExecutionAttempt,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.mutate_entry(queue_id, now, |entry| {
            lifecycle::apply_completion(entry, worker_id, attempt, now)
        })
    }

    async fn skip(
        &self,
        queue_id: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.mutate_entry(queue_id, now, |entry| lifecycle::apply_skip(entry, reason, now))
    }

    async fn find_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut stale: Vec<QueueEntry> = self
            .entries
            .iter()
            .filter_map(|cell| {
                let guard = cell.value().lock();
                if lifecycle::is_stale(&guard, started_before) {
                    Some(guard.clone())
                } else {
                    None
                }
            })
            .collect();
        stale.sort_by_key(|e| (e.started_at, e.queue_id));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn expire_claim(
        &self,
        queue_id: i64,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let cell = self.entry_cell(queue_id)?;
        let mut guard = cell.lock();
        if !lifecycle::is_stale(&guard, started_before) {
            return Ok(None);
        }
        let (next, transition) = lifecycle::apply_failure(
            &guard,
            serde_json::Value::String(lifecycle::CLAIM_EXPIRED_ERROR.to_string()),
            now,
        )?;
        *guard = next.clone();
        self.append_transition(transition, now);
        Ok(Some(next))
    }

    async fn get_entry(&self, queue_id: i64) -> Result<Option<QueueEntry>> {
        Ok(self
            .entries
            .get(&queue_id)
            .map(|cell| {
                let entry = cell.value().lock().clone();
                entry
            }))
    }

    async fn transitions(&self, queue_id: i64) -> Result<Vec<QueueTransition>> {
        Ok(self
            .transitions
            .lock()
            .iter()
            .filter(|t| t.queue_id == queue_id)
            .cloned()
            .collect())
    }

    async fn status_counts(&self, target_agent: Option<&str>) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for status in QueueStatus::ALL {
            counts.counts.insert(status.to_string(), 0);
        }
        for cell in self.entries.iter() {
            let entry = cell.value().lock();
            if target_agent.map_or(true, |agent| entry.target_agent == agent) {
                counts.increment(entry.status);
            }
        }
        Ok(counts)
    }
}
