//! # Rule Matcher
//!
//! Pure fan-out decision for one event: which of the candidate rules fire
//! under the current operating context, and why the others do not.
//!
//! Gates run in a fixed order and the first failing gate names the rejection:
//!
//! 1. source filters (type, agent, layer)
//! 2. active flag
//! 3. severity ceiling
//! 4. allowed modes
//! 5. cooldown
//!
//! No storage is touched here. The cooldown verdict is advisory: the store
//! re-checks it atomically when the entry is written.

use crate::context::OperatingContext;
use crate::models::{Event, Rule};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a candidate rule did not fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateRejection {
    FilterMismatch,
    Inactive,
    SeverityCeiling { severity: i32, ceiling: i32 },
    ContextMismatch { mode: String },
    Cooldown { remaining_ms: i64 },
}

impl GateRejection {
    pub fn cooldown(remaining: Duration) -> Self {
        Self::Cooldown {
            remaining_ms: remaining.num_milliseconds(),
        }
    }
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FilterMismatch => write!(f, "source filter mismatch"),
            Self::Inactive => write!(f, "rule inactive"),
            Self::SeverityCeiling { severity, ceiling } => {
                write!(f, "severity {severity} above ceiling {ceiling}")
            }
            Self::ContextMismatch { mode } => write!(f, "mode {mode} not allowed"),
            Self::Cooldown { remaining_ms } => write!(f, "cooling down for {remaining_ms}ms"),
        }
    }
}

/// A candidate rule that did not fire, and the gate that stopped it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRejection {
    pub rule_id: i64,
    pub rule_name: String,
    pub rejection: GateRejection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSelection {
    pub firing: Vec<Rule>,
    pub rejected: Vec<RuleRejection>,
}

/// Run one rule through the gate pipeline
pub fn evaluate_rule(
    rule: &Rule,
    event: &Event,
    context: &OperatingContext,
    now: DateTime<Utc>,
) -> Result<(), GateRejection> {
    if rule.event_type != event.event_type
        || !rule.matches_source(event.source_agent.as_deref(), event.source_layer.as_deref())
    {
        return Err(GateRejection::FilterMismatch);
    }
    if !rule.active {
        return Err(GateRejection::Inactive);
    }
    if !rule.allows_severity(context.severity) {
        return Err(GateRejection::SeverityCeiling {
            severity: context.severity,
            ceiling: rule.severity_ceiling.unwrap_or_default(),
        });
    }
    if !rule.allows_mode(&context.mode) {
        return Err(GateRejection::ContextMismatch {
            mode: context.mode.clone(),
        });
    }
    if let Some(remaining) = rule.cooldown_remaining(now) {
        return Err(GateRejection::cooldown(remaining));
    }
    Ok(())
}

/// Partition candidate rules into those that fire and those rejected.
///
/// Firing rules keep the candidates' order, which the store returns most
/// urgent first.
pub fn select_rules(
    event: &Event,
    candidates: &[Rule],
    context: &OperatingContext,
    now: DateTime<Utc>,
) -> RuleSelection {
    let mut selection = RuleSelection::default();
    for rule in candidates {
        match evaluate_rule(rule, event, context, now) {
            Ok(()) => selection.firing.push(rule.clone()),
            Err(rejection) => selection.rejected.push(RuleRejection {
                rule_id: rule.rule_id,
                rule_name: rule.name.clone(),
                rejection,
            }),
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEvent, NewRule};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
    }

    fn event(event_type: &str) -> Event {
        NewEvent::new(event_type)
            .with_source_agent("scanner")
            .into_event(1, at(0))
    }

    fn bull(severity: i32) -> OperatingContext {
        OperatingContext::new("BULL", severity)
    }

    #[test]
    fn test_unfiltered_rule_fires() {
        let rule =
            NewRule::new("r", "regime_shift", "strategist", "recalibrate").into_rule(1, at(0));
        assert_eq!(
            evaluate_rule(&rule, &event("regime_shift"), &bull(3), at(0)),
            Ok(())
        );
    }

    #[test]
    fn test_filter_mismatch() {
        let wrong_type = NewRule::new("r", "other", "a", "b").into_rule(1, at(0));
        let wrong_agent = NewRule::new("r", "regime_shift", "a", "b")
            .with_source_agent("ledger")
            .into_rule(2, at(0));

        for rule in [wrong_type, wrong_agent] {
            assert_eq!(
                evaluate_rule(&rule, &event("regime_shift"), &bull(0), at(0)),
                Err(GateRejection::FilterMismatch)
            );
        }
    }

    #[test]
    fn test_severity_gate_runs_before_mode_gate() {
        let rule = NewRule::new("r", "regime_shift", "a", "b")
            .with_severity_ceiling(5)
            .with_allowed_modes(["BEAR"])
            .into_rule(1, at(0));

        assert_eq!(
            evaluate_rule(&rule, &event("regime_shift"), &bull(6), at(0)),
            Err(GateRejection::SeverityCeiling {
                severity: 6,
                ceiling: 5
            })
        );
        assert_eq!(
            evaluate_rule(&rule, &event("regime_shift"), &bull(5), at(0)),
            Err(GateRejection::ContextMismatch {
                mode: "BULL".to_string()
            })
        );
    }

    #[test]
    fn test_cooldown_gate() {
        let mut rule = NewRule::new("r", "regime_shift", "a", "b")
            .with_cooldown_seconds(60)
            .into_rule(1, at(0));
        rule.record_fired(at(0));

        assert_eq!(
            evaluate_rule(&rule, &event("regime_shift"), &bull(0), at(10)),
            Err(GateRejection::Cooldown {
                remaining_ms: 50_000
            })
        );
        assert_eq!(
            evaluate_rule(&rule, &event("regime_shift"), &bull(0), at(60)),
            Ok(())
        );
    }

    #[test]
    fn test_select_rules_fans_out() {
        let rules = vec![
            NewRule::new("first", "regime_shift", "strategist", "recalibrate").into_rule(1, at(0)),
            NewRule::new("second", "regime_shift", "risk", "tighten").into_rule(2, at(0)),
            NewRule::new("off", "regime_shift", "risk", "tighten")
                .inactive()
                .into_rule(3, at(0)),
        ];

        let selection = select_rules(&event("regime_shift"), &rules, &bull(0), at(0));
        assert_eq!(
            selection.firing.iter().map(|r| r.rule_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(selection.rejected.len(), 1);
        assert_eq!(selection.rejected[0].rejection, GateRejection::Inactive);
    }
}
