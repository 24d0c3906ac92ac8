use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An immutable occurrence reported by an external producer.
/// Maps to the `event_loop_events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub event_id: i64,
    pub event_type: String,
    pub source_agent: Option<String>,
    pub source_layer: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New Event for publishing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub source_agent: Option<String>,
    pub source_layer: Option<String>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_agent: None,
            source_layer: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_source_agent(mut self, agent: impl Into<String>) -> Self {
        self.source_agent = Some(agent.into());
        self
    }

    pub fn with_source_layer(mut self, layer: impl Into<String>) -> Self {
        self.source_layer = Some(layer.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn into_event(self, event_id: i64, created_at: DateTime<Utc>) -> Event {
        Event {
            event_id,
            event_type: self.event_type,
            source_agent: self.source_agent,
            source_layer: self.source_layer,
            payload: self.payload,
            created_at,
        }
    }
}
