//! # Rule Registry
//!
//! Front door for routing rules. Definitions are validated before they reach
//! storage, so an invalid rule is never persisted. Lookups return only active
//! rules whose source filters accept the event.
//!
//! ## Usage
//!
//! ```rust
//! use event_loop_core::models::NewRule;
//! use event_loop_core::registry::RuleRegistry;
//! use event_loop_core::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = RuleRegistry::with_defaults(Arc::new(InMemoryStore::new()));
//!
//! let rule = registry
//!     .register_rule(
//!         NewRule::new("recalibrate_on_shift", "regime_shift", "strategist", "recalibrate")
//!             .with_cooldown_seconds(60)
//!             .with_allowed_modes(["BULL"]),
//!     )
//!     .await
//!     .unwrap();
//!
//! let matching = registry.find_matching("regime_shift", None, None).await.unwrap();
//! assert_eq!(matching[0].rule_id, rule.rule_id);
//! # });
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::{EventLoopError, Result};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::models::{NewRule, PriorityBounds, Rule};
use crate::store::EventLoopStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct RuleRegistry {
    store: Arc<dyn EventLoopStore>,
    clock: Arc<dyn Clock>,
    publisher: EventPublisher,
    bounds: PriorityBounds,
}

impl RuleRegistry {
    pub fn new(
        store: Arc<dyn EventLoopStore>,
        clock: Arc<dyn Clock>,
        publisher: EventPublisher,
        bounds: PriorityBounds,
    ) -> Self {
        Self {
            store,
            clock,
            publisher,
            bounds,
        }
    }

    pub fn with_defaults(store: Arc<dyn EventLoopStore>) -> Self {
        Self::new(
            store,
            Arc::new(SystemClock),
            EventPublisher::default(),
            PriorityBounds::default(),
        )
    }

    pub fn priority_bounds(&self) -> PriorityBounds {
        self.bounds
    }

    /// Validate and persist a rule definition
    #[instrument(skip(self, rule), fields(name = %rule.name, event_type = %rule.event_type))]
    pub async fn register_rule(&self, rule: NewRule) -> Result<Rule> {
        if let Err(e) = rule.validate(&self.bounds) {
            warn!(error = %e, "Rejected rule definition");
            return Err(e);
        }

        let stored = self.store.insert_rule(rule, self.clock.now()).await?;

        info!(
            rule_id = stored.rule_id,
            target_agent = %stored.target_agent,
            target_action = %stored.target_action,
            priority = stored.priority,
            cooldown_seconds = stored.cooldown_seconds,
            "Rule registered"
        );
        self.publisher.publish(LifecycleEvent::RuleRegistered {
            rule_id: stored.rule_id,
            name: stored.name.clone(),
            event_type: stored.event_type.clone(),
        });

        Ok(stored)
    }

    pub async fn deactivate_rule(&self, rule_id: i64) -> Result<Rule> {
        let rule = self.store.set_active(rule_id, false, self.clock.now()).await?;
        info!(rule_id = rule_id, name = %rule.name, "Rule deactivated");
        self.publisher
            .publish(LifecycleEvent::RuleDeactivated { rule_id });
        Ok(rule)
    }

    pub async fn activate_rule(&self, rule_id: i64) -> Result<Rule> {
        let rule = self.store.set_active(rule_id, true, self.clock.now()).await?;
        info!(rule_id = rule_id, name = %rule.name, "Rule activated");
        self.publisher.publish(LifecycleEvent::RuleActivated { rule_id });
        Ok(rule)
    }

    /// Active rules for `event_type` whose agent/layer filters are unset or
    /// equal to the given values
    pub async fn find_matching(
        &self,
        event_type: &str,
        source_agent: Option<&str>,
        source_layer: Option<&str>,
    ) -> Result<Vec<Rule>> {
        self.store
            .find_matching(event_type, source_agent, source_layer)
            .await
    }

    /// Record a firing outside the dispatcher's own enqueue path
    pub async fn mark_fired(&self, rule_id: i64, now: DateTime<Utc>) -> Result<Rule> {
        self.store.mark_fired(rule_id, now).await
    }

    pub async fn get_rule(&self, rule_id: i64) -> Result<Rule> {
        self.store
            .get_rule(rule_id)
            .await?
            .ok_or(EventLoopError::RuleNotFound(rule_id))
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        self.store.list_rules().await
    }
}
