//! # Storage Backends
//!
//! The rule registry, the event log and the work queue are the only shared
//! mutable state of the event loop. Each is a trait so the dispatcher and the
//! workers can run against PostgreSQL in production and an in-process store
//! in tests and embedded deployments.
//!
//! Every mutating method is one atomic operation on one record: callers never
//! observe a half-applied transition. Lifecycle arithmetic (what a claim,
//! completion or skip does to an entry) lives in [`lifecycle`] and is shared
//! by all backends.

pub mod lifecycle;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use lifecycle::{ClaimRequest, ExecutionAttempt, FireOutcome};
pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use crate::error::Result;
use crate::models::{
    Event, NewEvent, NewQueueEntry, NewRule, QueueEntry, QueueTransition, Rule, StatusCounts,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable, immutable event log
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: NewEvent, now: DateTime<Utc>) -> Result<Event>;

    async fn get_event(&self, event_id: i64) -> Result<Option<Event>>;
}

/// Routing rules and their firing bookkeeping
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert_rule(&self, rule: NewRule, now: DateTime<Utc>) -> Result<Rule>;

    async fn get_rule(&self, rule_id: i64) -> Result<Option<Rule>>;

    async fn list_rules(&self) -> Result<Vec<Rule>>;

    /// Active rules for an event type whose source filters are unset or equal
    /// to the given values, most urgent first.
    async fn find_matching(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
    ) -> Result<Vec<Rule>>;

    /// Set `last_fired_at` and increment `fire_count` without losing
    /// concurrent updates.
    async fn mark_fired(&self, rule_id: i64, now: DateTime<Utc>) -> Result<Rule>;

    async fn set_active(&self, rule_id: i64, active: bool, now: DateTime<Utc>) -> Result<Rule>;
}

/// Queue entries, their lifecycle and audit history
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a `PENDING` entry that no rule produced
    async fn enqueue(&self, entry: NewQueueEntry, now: DateTime<Utc>) -> Result<QueueEntry>;

    /// Fire `rule_id` and enqueue `entry` as one atomic step.
    ///
    /// The rule's active flag and cooldown are re-checked under the rule's
    /// row guard, so concurrent dispatches cannot both fire inside one
    /// cooldown window. A rule fires at most once per event: when an entry
    /// for (`entry.event_id`, `rule_id`) exists it is returned as
    /// [`FireOutcome::AlreadyEnqueued`] and nothing changes, which makes
    /// re-dispatching an event safe.
    async fn enqueue_for_rule(
        &self,
        rule_id: i64,
        entry: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome>;

    /// Move up to `request.limit` pending entries to `PROCESSING`, skipping
    /// any entry another caller holds. Never blocks on contention.
    async fn claim(&self, request: &ClaimRequest, now: DateTime<Utc>) -> Result<Vec<QueueEntry>>;

    /// Record the outcome of an executed `PROCESSING` entry.
    ///
    /// Only `worker_id`, the current claim holder, may report on the entry;
    /// the owner check happens under the same guard as the status change.
    async fn complete(
        &self,
        queue_id: i64,
        worker_id: &str,
        attempt: ExecutionAttempt,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry>;

    /// Cancel a `PENDING` entry.
    async fn skip(&self, queue_id: i64, reason: Option<String>, now: DateTime<Utc>)
        -> Result<QueueEntry>;

    /// `PROCESSING` entries whose claim started at or before `started_before`.
    async fn find_stale(&self, started_before: DateTime<Utc>, limit: usize)
        -> Result<Vec<QueueEntry>>;

    /// Treat a stale claim as one failed attempt. Returns `None` when the
    /// entry is no longer `PROCESSING` or was re-claimed after the cutoff.
    async fn expire_claim(
        &self,
        queue_id: i64,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>>;

    async fn get_entry(&self, queue_id: i64) -> Result<Option<QueueEntry>>;

    /// Audit history, oldest first
    async fn transitions(&self, queue_id: i64) -> Result<Vec<QueueTransition>>;

    async fn status_counts(&self, target_agent: Option<&str>) -> Result<StatusCounts>;
}

/// Everything the event loop needs from one backend
pub trait EventLoopStore: EventStore + RuleStore + QueueStore {}

impl<T> EventLoopStore for T where T: EventStore + RuleStore + QueueStore {}
