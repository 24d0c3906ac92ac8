use crate::error::{EventLoopError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Routing rule mapping an event type to a target action under gating conditions.
/// Maps to the `event_loop_rules` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Rule {
    pub rule_id: i64,
    pub name: String,
    pub event_type: String,
    pub source_agent: Option<String>,
    pub source_layer: Option<String>,
    /// Modes under which the rule may fire; `None` means any mode
    pub allowed_modes: Option<Vec<String>>,
    /// Highest severity at which the rule may still fire
    pub severity_ceiling: Option<i32>,
    pub target_agent: String,
    pub target_action: String,
    /// Lower is more urgent
    pub priority: i32,
    pub cooldown_seconds: i64,
    /// Overrides the configured default when set
    pub max_retries: Option<i32>,
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Source filters pass when unset or equal to the event's value.
    pub fn matches_source(&self, source_agent: Option<&str>, source_layer: Option<&str>) -> bool {
        let agent_ok = match self.source_agent.as_deref() {
            None => true,
            Some(expected) => source_agent == Some(expected),
        };
        let layer_ok = match self.source_layer.as_deref() {
            None => true,
            Some(expected) => source_layer == Some(expected),
        };
        agent_ok && layer_ok
    }

    pub fn allows_mode(&self, mode: &str) -> bool {
        match &self.allowed_modes {
            None => true,
            Some(modes) => modes.iter().any(|m| m == mode),
        }
    }

    pub fn allows_severity(&self, severity: i32) -> bool {
        match self.severity_ceiling {
            None => true,
            Some(ceiling) => severity <= ceiling,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_seconds.max(0))
    }

    /// Time left before the rule may fire again, if it is cooling down at `now`.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.cooldown_seconds <= 0 {
            return None;
        }
        let last = self.last_fired_at?;
        let elapsed = now - last;
        if elapsed < self.cooldown() {
            Some(self.cooldown() - elapsed)
        } else {
            None
        }
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(now).is_some()
    }

    /// Record a firing; callers hold whatever row guard their backend uses.
    pub fn record_fired(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
        self.fire_count += 1;
        self.updated_at = now;
    }
}

/// Inclusive range a rule's priority must fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityBounds {
    pub min: i32,
    pub max: i32,
}

impl Default for PriorityBounds {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

impl PriorityBounds {
    pub fn contains(&self, priority: i32) -> bool {
        (self.min..=self.max).contains(&priority)
    }
}

/// New Rule for registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub event_type: String,
    pub source_agent: Option<String>,
    pub source_layer: Option<String>,
    pub allowed_modes: Option<Vec<String>>,
    pub severity_ceiling: Option<i32>,
    pub target_agent: String,
    pub target_action: String,
    pub priority: i32,
    pub cooldown_seconds: i64,
    pub max_retries: Option<i32>,
    pub active: bool,
}

impl NewRule {
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        target_agent: impl Into<String>,
        target_action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            source_agent: None,
            source_layer: None,
            allowed_modes: None,
            severity_ceiling: None,
            target_agent: target_agent.into(),
            target_action: target_action.into(),
            priority: 5,
            cooldown_seconds: 0,
            max_retries: None,
            active: true,
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

    pub fn with_allowed_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modes = Some(modes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_severity_ceiling(mut self, ceiling: i32) -> Self {
        self.severity_ceiling = Some(ceiling);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Reject definitions that could never be routed sensibly
    pub fn validate(&self, bounds: &PriorityBounds) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("event_type", &self.event_type),
            ("target_agent", &self.target_agent),
            ("target_action", &self.target_action),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EventLoopError::RuleValidation(format!(
                    "{field} must not be empty"
                )));
            }
        }

        if self.cooldown_seconds < 0 {
            return Err(EventLoopError::RuleValidation(format!(
                "cooldown_seconds must be >= 0, got {}",
                self.cooldown_seconds
            )));
        }

        if !bounds.contains(self.priority) {
            return Err(EventLoopError::RuleValidation(format!(
                "priority {} outside allowed range {}..={}",
                self.priority, bounds.min, bounds.max
            )));
        }

        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(EventLoopError::RuleValidation(format!(
                    "max_retries must be >= 0, got {max_retries}"
                )));
            }
        }

        if let Some(ceiling) = self.severity_ceiling {
            if ceiling < 0 {
                return Err(EventLoopError::RuleValidation(format!(
                    "severity_ceiling must be >= 0, got {ceiling}"
                )));
            }
        }

        if let Some(modes) = &self.allowed_modes {
            if modes.is_empty() {
                return Err(EventLoopError::RuleValidation(
                    "allowed_modes must not be an empty set; leave it unset to allow any mode"
                        .to_string(),
                ));
            }
            if modes.iter().any(|m| m.trim().is_empty()) {
                return Err(EventLoopError::RuleValidation(
                    "allowed_modes must not contain blank labels".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn into_rule(self, rule_id: i64, now: DateTime<Utc>) -> Rule {
        Rule {
            rule_id,
            name: self.name,
            event_type: self.event_type,
            source_agent: self.source_agent,
            source_layer: self.source_layer,
            allowed_modes: self.allowed_modes,
            severity_ceiling: self.severity_ceiling,
            target_agent: self.target_agent,
            target_action: self.target_action,
            priority: self.priority,
            cooldown_seconds: self.cooldown_seconds,
            max_retries: self.max_retries,
            active: self.active,
            last_fired_at: None,
            fire_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
