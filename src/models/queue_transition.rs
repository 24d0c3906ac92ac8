use crate::error::EventLoopError;
use crate::state_machine::QueueStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only audit record of one queue entry status change.
/// Maps to the `event_loop_queue_transitions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTransition {
    pub transition_id: i64,
    pub queue_id: i64,
    /// `None` for the initial enqueue
    pub from_status: Option<QueueStatus>,
    pub to_status: QueueStatus,
    pub retry_count: i32,
    pub worker_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// New QueueTransition for creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueTransition {
    pub queue_id: i64,
    pub from_status: Option<QueueStatus>,
    pub to_status: QueueStatus,
    pub retry_count: i32,
    pub worker_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewQueueTransition {
    pub fn into_transition(self, transition_id: i64, created_at: DateTime<Utc>) -> QueueTransition {
        QueueTransition {
            transition_id,
            queue_id: self.queue_id,
            from_status: self.from_status,
            to_status: self.to_status,
            retry_count: self.retry_count,
            worker_id: self.worker_id,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueTransitionRow {
    pub transition_id: i64,
    pub queue_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub retry_count: i32,
    pub worker_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<QueueTransitionRow> for QueueTransition {
    type Error = EventLoopError;

    fn try_from(row: QueueTransitionRow) -> Result<Self, Self::Error> {
        let from_status = row
            .from_status
            .map(|s| s.parse::<QueueStatus>())
            .transpose()
            .map_err(EventLoopError::Database)?;
        let to_status = row
            .to_status
            .parse::<QueueStatus>()
            .map_err(EventLoopError::Database)?;

        Ok(QueueTransition {
            transition_id: row.transition_id,
            queue_id: row.queue_id,
            from_status,
            to_status,
            retry_count: row.retry_count,
            worker_id: row.worker_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}
