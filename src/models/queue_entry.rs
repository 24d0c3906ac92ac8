use crate::context::OperatingContext;
use crate::error::EventLoopError;
use crate::state_machine::QueueStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// One unit of routed work.
/// Maps to the `event_loop_queue_entries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: i64,
    pub event_id: i64,
    pub rule_id: Option<i64>,
    pub target_agent: String,
    pub target_action: String,
    pub priority: i32,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub execution_duration_ms: Option<i64>,
    pub context_snapshot: serde_json::Value,
}

impl QueueEntry {
    /// Claim ordering: priority ascending, then FIFO, then insertion order.
    pub fn claim_order_key(&self) -> (i32, DateTime<Utc>, i64) {
        (self.priority, self.queued_at, self.queue_id)
    }

    pub fn retries_remaining(&self) -> i32 {
        (self.max_retries - self.retry_count).max(0)
    }
}

/// Raw row shape; `status` is stored as text
#[derive(Debug, Clone, FromRow)]
pub struct QueueEntryRow {
    pub queue_id: i64,
    pub event_id: i64,
    pub rule_id: Option<i64>,
    pub target_agent: String,
    pub target_action: String,
    pub priority: i32,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub execution_duration_ms: Option<i64>,
    pub context_snapshot: serde_json::Value,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = EventLoopError;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<QueueStatus>()
            .map_err(EventLoopError::Database)?;

        Ok(QueueEntry {
            queue_id: row.queue_id,
            event_id: row.event_id,
            rule_id: row.rule_id,
            target_agent: row.target_agent,
            target_action: row.target_action,
            priority: row.priority,
            status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            claimed_by: row.claimed_by,
            result: row.result,
            error: row.error,
            execution_duration_ms: row.execution_duration_ms,
            context_snapshot: row.context_snapshot,
        })
    }
}

/// New QueueEntry for creation by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub event_id: i64,
    pub rule_id: Option<i64>,
    pub target_agent: String,
    pub target_action: String,
    pub priority: i32,
    pub max_retries: i32,
    pub context_snapshot: serde_json::Value,
}

impl NewQueueEntry {
    pub fn into_entry(self, queue_id: i64, queued_at: DateTime<Utc>) -> QueueEntry {
        QueueEntry {
            queue_id,
            event_id: self.event_id,
            rule_id: self.rule_id,
            target_agent: self.target_agent,
            target_action: self.target_action,
            priority: self.priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            queued_at,
            started_at: None,
            completed_at: None,
            claimed_by: None,
            result: None,
            error: None,
            execution_duration_ms: None,
            context_snapshot: self.context_snapshot,
        }
    }
}

/// Operating context captured when an entry is enqueued, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub mode: String,
    pub severity: i32,
    pub event_type: String,
    pub rule_name: String,
    pub captured_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn capture(
        context: &OperatingContext,
        event_type: &str,
        rule_name: &str,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: context.mode.clone(),
            severity: context.severity,
            event_type: event_type.to_string(),
            rule_name: rule_name.to_string(),
            captured_at,
        }
    }
}

/// Entry counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub counts: BTreeMap<String, i64>,
}

impl StatusCounts {
    pub fn get(&self, status: QueueStatus) -> i64 {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, status: QueueStatus) {
        *self.counts.entry(status.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_entry(priority: i32) -> NewQueueEntry {
        NewQueueEntry {
            event_id: 1,
            rule_id: Some(2),
            target_agent: "risk".to_string(),
            target_action: "tighten_limits".to_string(),
            priority,
            max_retries: 3,
            context_snapshot: serde_json::json!({"mode": "BULL"}),
        }
    }

    #[test]
    fn test_new_entry_starts_pending() {
        let entry = new_entry(5).into_entry(10, Utc::now());
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.retries_remaining(), 3);
        assert!(entry.started_at.is_none());
    }

    #[test]
    fn test_claim_order_key() {
        let t0 = Utc::now();
        let urgent = new_entry(1).into_entry(3, t0 + Duration::seconds(5));
        let early = new_entry(5).into_entry(1, t0);
        let late = new_entry(5).into_entry(2, t0 + Duration::seconds(1));

        let mut entries = vec![late.clone(), early.clone(), urgent.clone()];
        entries.sort_by_key(QueueEntry::claim_order_key);
        let ids: Vec<i64> = entries.iter().map(|e| e.queue_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_row_conversion_rejects_unknown_status() {
        let entry = new_entry(1).into_entry(1, Utc::now());
        let row = QueueEntryRow {
            queue_id: entry.queue_id,
            event_id: entry.event_id,
            rule_id: entry.rule_id,
            target_agent: entry.target_agent,
            target_action: entry.target_action,
            priority: entry.priority,
            status: "exploded".to_string(),
            retry_count: 0,
            max_retries: 3,
            queued_at: entry.queued_at,
            started_at: None,
            completed_at: None,
            claimed_by: None,
            result: None,
            error: None,
            execution_duration_ms: None,
            context_snapshot: serde_json::Value::Null,
        };
        assert!(QueueEntry::try_from(row).is_err());
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.increment(QueueStatus::Pending);
        counts.increment(QueueStatus::Pending);
        counts.increment(QueueStatus::Failed);
        assert_eq!(counts.get(QueueStatus::Pending), 2);
        assert_eq!(counts.get(QueueStatus::Completed), 0);
        assert_eq!(counts.total(), 3);
    }
}
