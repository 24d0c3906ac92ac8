use crate::constants::events;
use serde::{Deserialize, Serialize};

/// A lifecycle change worth telling monitors about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    EventPublished {
        event_id: i64,
        event_type: String,
    },
    EntryEnqueued {
        queue_id: i64,
        event_id: i64,
        rule_id: Option<i64>,
        target_agent: String,
        target_action: String,
        priority: i32,
    },
    EntryClaimed {
        queue_id: i64,
        worker_id: String,
    },
    EntryCompleted {
        queue_id: i64,
        duration_ms: Option<i64>,
    },
    EntryRetrying {
        queue_id: i64,
        retry_count: i32,
        max_retries: i32,
    },
    EntryFailed {
        queue_id: i64,
        retry_count: i32,
        error: Option<serde_json::Value>,
    },
    EntrySkipped {
        queue_id: i64,
        reason: Option<String>,
    },
    RuleRegistered {
        rule_id: i64,
        name: String,
        event_type: String,
    },
    RuleActivated {
        rule_id: i64,
    },
    RuleDeactivated {
        rule_id: i64,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EventPublished { .. } => events::EVENT_PUBLISHED,
            Self::EntryEnqueued { .. } => events::ENTRY_ENQUEUED,
            Self::EntryClaimed { .. } => events::ENTRY_CLAIMED,
            Self::EntryCompleted { .. } => events::ENTRY_COMPLETED,
            Self::EntryRetrying { .. } => events::ENTRY_RETRYING,
            Self::EntryFailed { .. } => events::ENTRY_FAILED,
            Self::EntrySkipped { .. } => events::ENTRY_SKIPPED,
            Self::RuleRegistered { .. } => events::RULE_REGISTERED,
            Self::RuleActivated { .. } => events::RULE_ACTIVATED,
            Self::RuleDeactivated { .. } => events::RULE_DEACTIVATED,
        }
    }

    /// Queue entry the notification concerns, if any
    pub fn queue_id(&self) -> Option<i64> {
        match self {
            Self::EntryEnqueued { queue_id, .. }
            | Self::EntryClaimed { queue_id, .. }
            | Self::EntryCompleted { queue_id, .. }
            | Self::EntryRetrying { queue_id, .. }
            | Self::EntryFailed { queue_id, .. }
            | Self::EntrySkipped { queue_id, .. } => Some(*queue_id),
            _ => None,
        }
    }
}
