//! # PostgreSQL Store
//!
//! Durable backend over the `event_loop_*` tables (see `migrations/`).
//!
//! ## Concurrency
//!
//! - **Claiming** selects candidates with `FOR UPDATE SKIP LOCKED` inside a
//!   data-modifying CTE that flips them to `processing` and appends their
//!   transitions in the same statement. Racing workers skip each other's rows
//!   instead of waiting, and no row can be returned to two callers.
//! - **Rule firing** locks the rule row, returns the existing entry if the rule
//!   already fired for this event (backed by a unique index on
//!   `(event_id, rule_id)`), then runs a guarded `UPDATE ... RETURNING` that
//!   re-checks the active flag and cooldown, followed by the entry insert in
//!   the same transaction.
//! - **Completion, skip and claim expiry** lock the single entry row with
//!   `FOR UPDATE`, apply the shared lifecycle rules and write the row plus its
//!   transition before committing. Completion checks `claimed_by` against the
//!   reporting worker while the row is locked, so a report from a worker whose
//!   claim was expired and handed on cannot land on the new claim.

use super::lifecycle::{self, ClaimRequest, ExecutionAttempt, FireOutcome};
use super::{EventStore, QueueStore, RuleStore};
use crate::error::{EventLoopError, Result};
use crate::models::queue_entry::QueueEntryRow;
use crate::models::queue_transition::QueueTransitionRow;
use crate::models::{
    Event, NewEvent, NewQueueEntry, NewQueueTransition, NewRule, QueueEntry, QueueTransition,
    Rule, StatusCounts,
};
use crate::state_machine::QueueStatus;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, instrument};

const EVENT_COLUMNS: &str =
    "event_id, event_type, source_agent, source_layer, payload, created_at";

const RULE_COLUMNS: &str = "rule_id, name, event_type, source_agent, source_layer, \
     allowed_modes, severity_ceiling, target_agent, target_action, priority, \
     cooldown_seconds, max_retries, active, last_fired_at, fire_count, created_at, updated_at";

const ENTRY_COLUMNS: &str = "queue_id, event_id, rule_id, target_agent, target_action, \
     priority, status, retry_count, max_retries, queued_at, started_at, completed_at, \
     claimed_by, result, error, execution_duration_ms, context_snapshot";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_entry(conn: &mut PgConnection, queue_id: i64) -> Result<Option<QueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM event_loop_queue_entries WHERE queue_id = $1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(queue_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn write_entry(
        conn: &mut PgConnection,
        entry: &QueueEntry,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let sql = format!(
            r#"
            UPDATE event_loop_queue_entries
            SET status = $2, retry_count = $3, started_at = $4, completed_at = $5,
                claimed_by = $6, result = $7, error = $8, execution_duration_ms = $9,
                updated_at = $10
            WHERE queue_id = $1
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(entry.queue_id)
            .bind(entry.status.as_str())
            .bind(entry.retry_count)
            .bind(entry.started_at)
            .bind(entry.completed_at)
            .bind(&entry.claimed_by)
            .bind(&entry.result)
            .bind(&entry.error)
            .bind(entry.execution_duration_ms)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?;
        QueueEntry::try_from(row)
    }

    async fn insert_entry(
        conn: &mut PgConnection,
        entry: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let sql = format!(
            r#"
            INSERT INTO event_loop_queue_entries
                (event_id, rule_id, target_agent, target_action, priority, status,
                 retry_count, max_retries, queued_at, context_snapshot, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, $7, $8, $7)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(entry.event_id)
            .bind(entry.rule_id)
            .bind(&entry.target_agent)
            .bind(&entry.target_action)
            .bind(entry.priority)
            .bind(entry.max_retries)
            .bind(now)
            .bind(&entry.context_snapshot)
            .fetch_one(&mut *conn)
            .await?;
        let stored = QueueEntry::try_from(row)?;

        Self::insert_transition(conn, lifecycle::enqueued_transition(&stored), now).await?;
        Ok(stored)
    }

    async fn insert_transition(
        conn: &mut PgConnection,
        transition: NewQueueTransition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_loop_queue_transitions
                (queue_id, from_status, to_status, retry_count, worker_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transition.queue_id)
        .bind(transition.from_status.map(|s| s.as_str()))
        .bind(transition.to_status.as_str())
        .bind(transition.retry_count)
        .bind(transition.worker_id)
        .bind(transition.metadata)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Lock one entry, apply `change`, and persist the row with its transition.
    async fn mutate_entry<F>(&self, queue_id: i64, now: DateTime<Utc>, change: F) -> Result<QueueEntry>
    where
        F: FnOnce(&QueueEntry) -> Result<(QueueEntry, NewQueueTransition)> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_entry(&mut tx, queue_id)
            .await?
            .ok_or(EventLoopError::QueueEntryNotFound(queue_id))?;

        // An error here drops `tx`, rolling back the row lock.
        let (next, transition) = change(&current)?;
        let stored = Self::write_entry(&mut tx, &next, now).await?;
        Self::insert_transition(&mut tx, transition, now).await?;
        tx.commit().await?;

        Ok(stored)
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn insert_event(&self, event: NewEvent, now: DateTime<Utc>) -> Result<Event> {
        let sql = format!(
            r#"
            INSERT INTO event_loop_events (event_type, source_agent, source_layer, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, Event>(&sql)
            .bind(&event.event_type)
            .bind(&event.source_agent)
            .bind(&event.source_layer)
            .bind(&event.payload)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn get_event(&self, event_id: i64) -> Result<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM event_loop_events WHERE event_id = $1");
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }
}

#[async_trait]
impl RuleStore for PostgresStore {
    async fn insert_rule(&self, rule: NewRule, now: DateTime<Utc>) -> Result<Rule> {
        let sql = format!(
            r#"
            INSERT INTO event_loop_rules
                (name, event_type, source_agent, source_layer, allowed_modes, severity_ceiling,
                 target_agent, target_action, priority, cooldown_seconds, max_retries, active,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING {RULE_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, Rule>(&sql)
            .bind(&rule.name)
            .bind(&rule.event_type)
            .bind(&rule.source_agent)
            .bind(&rule.source_layer)
            .bind(&rule.allowed_modes)
            .bind(rule.severity_ceiling)
            .bind(&rule.target_agent)
            .bind(&rule.target_action)
            .bind(rule.priority)
            .bind(rule.cooldown_seconds)
            .bind(rule.max_retries)
            .bind(rule.active)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn get_rule(&self, rule_id: i64) -> Result<Option<Rule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM event_loop_rules WHERE rule_id = $1");
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rule)
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM event_loop_rules ORDER BY rule_id");
        let rules = sqlx::query_as::<_, Rule>(&sql).fetch_all(&self.pool).await?;
        Ok(rules)
    }

    async fn find_matching(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
    ) -> Result<Vec<Rule>> {
        let sql = format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM event_loop_rules
            WHERE active
              AND event_type = $1
              AND (source_agent IS NULL OR source_agent = $2::VARCHAR)
              AND (source_layer IS NULL OR source_layer = $3::VARCHAR)
            ORDER BY priority ASC, rule_id ASC
            "#
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(event_type)
            .bind(source_agent)
            .bind(source_layer)
            .fetch_all(&self.pool)
            .await?;
        Ok(rules)
    }

    async fn mark_fired(&self, rule_id: i64, now: DateTime<Utc>) -> Result<Rule> {
        let sql = format!(
            r#"
            UPDATE event_loop_rules
            SET last_fired_at = $2, fire_count = fire_count + 1, updated_at = $2
            WHERE rule_id = $1
            RETURNING {RULE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Rule>(&sql)
            .bind(rule_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EventLoopError::RuleNotFound(rule_id))
    }

    async fn set_active(&self, rule_id: i64, active: bool, now: DateTime<Utc>) -> Result<Rule> {
        let sql = format!(
            r#"
            UPDATE event_loop_rules
            SET active = $2, updated_at = $3
            WHERE rule_id = $1
            RETURNING {RULE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Rule>(&sql)
            .bind(rule_id)
            .bind(active)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EventLoopError::RuleNotFound(rule_id))
    }
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn enqueue(&self, entry: NewQueueEntry, now: DateTime<Utc>) -> Result<QueueEntry> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_entry(&mut tx, entry, now).await?;
        tx.commit().await?;
        Ok(stored)
    }

    #[instrument(skip(self, entry))]
    async fn enqueue_for_rule(
        &self,
        rule_id: i64,
        entry: NewQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serializes firings of this rule for the rest of the transaction.
        let locked = sqlx::query_scalar::<_, i64>(
            "SELECT rule_id FROM event_loop_rules WHERE rule_id = $1 FOR UPDATE",
        )
        .bind(rule_id)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(EventLoopError::RuleNotFound(rule_id));
        }

        let existing_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM event_loop_queue_entries WHERE event_id = $1 AND rule_id = $2"
        );
        let existing = sqlx::query_as::<_, QueueEntryRow>(&existing_sql)
            .bind(entry.event_id)
            .bind(rule_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            tx.rollback().await?;
            debug!(rule_id = rule_id, "Rule already fired for event");
            return Ok(FireOutcome::AlreadyEnqueued {
                entry: QueueEntry::try_from(row)?,
            });
        }

        let fire_sql = format!(
            r#"
            UPDATE event_loop_rules
            SET last_fired_at = $2, fire_count = fire_count + 1, updated_at = $2
            WHERE rule_id = $1
              AND active
              AND (cooldown_seconds = 0
                   OR last_fired_at IS NULL
                   OR last_fired_at <= $2 - make_interval(secs => cooldown_seconds::double precision))
            RETURNING {RULE_COLUMNS}
            "#
        );
        let fired = sqlx::query_as::<_, Rule>(&fire_sql)
            .bind(rule_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        match fired {
            Some(rule) => {
                let entry = Self::insert_entry(&mut tx, entry, now).await?;
                tx.commit().await?;
                Ok(FireOutcome::Enqueued { rule, entry })
            }
            None => {
                tx.rollback().await?;
                let rule = self
                    .get_rule(rule_id)
                    .await?
                    .ok_or(EventLoopError::RuleNotFound(rule_id))?;
                debug!(rule_id = rule_id, "Rule firing rejected under row lock");
                Ok(lifecycle::check_fireable(&rule, now).unwrap_or(FireOutcome::CoolingDown {
                    remaining: Duration::zero(),
                }))
            }
        }
    }

    #[instrument(skip(self, request), fields(worker_id = %request.worker_id))]
    async fn claim(&self, request: &ClaimRequest, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);

        let sql = format!(
            r#"
            WITH candidates AS (
                SELECT queue_id
                FROM event_loop_queue_entries
                WHERE status = 'pending'
                  AND ($1::VARCHAR IS NULL OR target_agent = $1::VARCHAR)
                ORDER BY priority ASC, queued_at ASC, queue_id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ),
            claimed AS (
                UPDATE event_loop_queue_entries q
                SET status = 'processing', started_at = $3, claimed_by = $4, updated_at = $3
                FROM candidates c
                WHERE q.queue_id = c.queue_id AND q.status = 'pending'
                RETURNING q.*
            ),
            history AS (
                INSERT INTO event_loop_queue_transitions
                    (queue_id, from_status, to_status, retry_count, worker_id, created_at)
                SELECT queue_id, 'pending', 'processing', retry_count, $4, $3
                FROM claimed
            )
            SELECT {ENTRY_COLUMNS} FROM claimed
            "#
        );

        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(request.target_agent.as_deref())
            .bind(limit)
            .bind(now)
            .bind(&request.worker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to claim queue entries: {}", e);
                EventLoopError::Database(format!("Queue claim failed: {e}"))
            })?;

        let mut claimed = rows
            .into_iter()
            .map(QueueEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(QueueEntry::claim_order_key);
        Ok(claimed)
    }

    async fn complete(
        &self,
        queue_id: i64,
        worker_id: &str,
        attempt: ExecutionAttempt,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.mutate_entry(queue_id, now, move |entry| {
            lifecycle::apply_completion(entry, worker_id, attempt, now)
        })
        .await
    }

    async fn skip(
        &self,
        queue_id: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.mutate_entry(queue_id, now, move |entry| lifecycle::apply_skip(entry, reason, now))
            .await
    }

    async fn find_stale(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM event_loop_queue_entries
            WHERE status = 'processing' AND started_at <= $1
            ORDER BY started_at ASC, queue_id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(started_before)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn expire_claim(
        &self,
        queue_id: i64,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_entry(&mut tx, queue_id)
            .await?
            .ok_or(EventLoopError::QueueEntryNotFound(queue_id))?;

        if !lifecycle::is_stale(&current, started_before) {
            tx.rollback().await?;
            return Ok(None);
        }

        let (next, transition) = lifecycle::apply_failure(
            &current,
            serde_json::Value::String(lifecycle::CLAIM_EXPIRED_ERROR.to_string()),
            now,
        )?;
        let stored = Self::write_entry(&mut tx, &next, now).await?;
        Self::insert_transition(&mut tx, transition, now).await?;
        tx.commit().await?;

        Ok(Some(stored))
    }

    async fn get_entry(&self, queue_id: i64) -> Result<Option<QueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM event_loop_queue_entries WHERE queue_id = $1");
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn transitions(&self, queue_id: i64) -> Result<Vec<QueueTransition>> {
        let rows = sqlx::query_as::<_, QueueTransitionRow>(
            r#"
            SELECT transition_id, queue_id, from_status, to_status, retry_count,
                   worker_id, metadata, created_at
            FROM event_loop_queue_transitions
            WHERE queue_id = $1
            ORDER BY transition_id ASC
            "#,
        )
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueTransition::try_from).collect()
    }

    async fn status_counts(&self, target_agent: Option<&str>) -> Result<StatusCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)::BIGINT
            FROM event_loop_queue_entries
            WHERE ($1::VARCHAR IS NULL OR target_agent = $1::VARCHAR)
            GROUP BY status
            "#,
        )
        .bind(target_agent)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for status in QueueStatus::ALL {
            counts.counts.insert(status.to_string(), 0);
        }
        for (status, count) in rows {
            counts.counts.insert(status, count);
        }
        Ok(counts)
    }
}
