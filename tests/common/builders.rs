//! Factories for test records

use chrono::{DateTime, Utc};
use event_loop_core::models::{NewQueueEntry, NewRule};
use serde_json::json;

/// Fixed instant every harness clock starts from
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).expect("valid timestamp")
}

pub fn entry_for(target_agent: &str, priority: i32, max_retries: i32) -> NewQueueEntry {
    NewQueueEntry {
        event_id: 1,
        rule_id: None,
        target_agent: target_agent.to_string(),
        target_action: "act".to_string(),
        priority,
        max_retries,
        context_snapshot: json!({}),
    }
}

pub fn pending_entry(priority: i32) -> NewQueueEntry {
    entry_for("risk", priority, 3)
}

/// 60s cooldown, BULL only, severity ceiling 5
pub fn bull_recalibration_rule() -> NewRule {
    NewRule::new("recalibrate_on_shift", "regime_shift", "strategist", "recalibrate")
        .with_cooldown_seconds(60)
        .with_allowed_modes(["BULL"])
        .with_severity_ceiling(5)
}

/// Hedges only in BEAR
pub fn bear_hedge_rule() -> NewRule {
    NewRule::new("hedge_in_bear", "regime_shift", "risk", "hedge").with_allowed_modes(["BEAR"])
}
