//! In-memory store that fails one chosen rule firing with a storage error

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_loop_core::models::{
    Event, NewEvent, NewQueueEntry, NewRule, QueueEntry, QueueTransition, Rule, StatusCounts,
};
use event_loop_core::store::{
    ClaimRequest, EventStore, ExecutionAttempt, FireOutcome, InMemoryStore, QueueStore, RuleStore,
};
use event_loop_core::{EventLoopError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct FailingStore {
    pub inner: InMemoryStore,
    fail_on: usize,
    firings: AtomicUsize,
}

impl FailingStore {
    /// Fail the `nth` call to `enqueue_for_rule` (1-based); every other call
    /// goes through
    pub fn failing_firing(nth: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_on: nth,
            firings: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EventStore for FailingStore {
    async fn insert_event(&self, event: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        self.inner.insert_event(event, now).await
    }

    async fn get_event(&self, event_id: i64) -> Result<Option<Event>> {
        self.inner.get_event(event_id).await
    }
}

#[async_trait]
impl RuleStore for FailingStore {
    async fn insert_rule(&self, rule: NewRule, now: DateTime<Utc>) -> Result<Rule> {
        self.inner.insert_rule(rule, now).await
    }

    async fn get_rule(&self, rule_id: i64) -> Result<Option<Rule>> {
        self.inner.get_rule(rule_id).await
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.inner.list_rules().await
    }

    async fn find_matching(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
    ) -> Result<Vec<Rule>> {
        self.inner
            .find_matching(event_type, source_agent, source_layer)
            .await
    }

    async fn mark_fired(&self, rule_id: i64, now: DateTime<Utc>) -> Result<Rule> {
        self.inner.mark_fired(rule_id, now).await
    }

    async fn set_active(&self, rule_id: i64, active: bool, now: DateTime<Utc>) -> Result<Rule> {
        self.inner.set_active(rule_id, active, now).await
    }
}

#[async_trait]
impl QueueStore for FailingStore {
    async fn enqueue(&self, entry: NewQueueEntry, now: DateTime<Utc>) -> Result<QueueEntry> {
        self.inner.enqueue(entry, now).await
    }

    async fn enqueue_for_rule(
        &self,
        rule_id: i64,
        entry: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        if self.firings.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(EventLoopError::Database("connection reset".to_string()));
        }
        self.inner.enqueue_for_rule(rule_id, entry, now).await
    }

    async fn claim(&self, request: &ClaimRequest, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        self.inner.claim(request, now).await
    }

    async fn complete(
        &self,
        queue_id: i64,
        worker_id: &str,
        attempt: ExecutionAttempt,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.inner.complete(queue_id, worker_id, attempt, now).await
    }

    async fn skip(
        &self,
        queue_id: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.inner.skip(queue_id, reason, now).await
    }

    async fn find_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        self.inner.find_stale(started_before, limit).await
    }

    async fn expire_claim(
        &self,
        queue_id: i64,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        self.inner.expire_claim(queue_id, started_before, now).await
    }

    async fn get_entry(&self, queue_id: i64) -> Result<Option<QueueEntry>> {
        self.inner.get_entry(queue_id).await
    }

    async fn transitions(&self, queue_id: i64) -> Result<Vec<QueueTransition>> {
        self.inner.transitions(queue_id).await
    }

    async fn status_counts(&self, target_agent: Option<&str>) -> Result<StatusCounts> {
        self.inner.status_counts(target_agent).await
    }
}
