//! Backend-independent queue entry transitions.
//!
//! Each function takes the entry as currently stored and returns the entry to
//! write back plus the audit record to append. Backends call these while
//! holding their row guard.

use crate::error::{EventLoopError, Result};
use crate::models::{NewQueueTransition, QueueEntry, Rule};
use crate::state_machine::{QueueEvent, QueueStateMachine, QueueStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error recorded when a claim outlives the watchdog threshold
pub const CLAIM_EXPIRED_ERROR: &str = "claim expired";

/// Parameters for one claim call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
    pub target_agent: Option<String>,
    pub limit: usize,
}

/// What a worker reports after executing an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

impl ExecutionAttempt {
    pub fn succeeded(result: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<serde_json::Value>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Result of attempting to fire a rule
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Enqueued { rule: Rule, entry: QueueEntry },
    /// The rule already produced an entry for this event; nothing was written
    AlreadyEnqueued { entry: QueueEntry },
    CoolingDown { remaining: Duration },
    Inactive,
}

fn transition_error(entry: &QueueEntry, event: QueueEvent) -> Result<QueueStatus> {
    QueueStateMachine::determine_target_state(entry.status, event)
        .map_err(|e| EventLoopError::invalid_transition(entry.queue_id, e))
}

pub fn enqueued_transition(entry: &QueueEntry) -> NewQueueTransition {
    NewQueueTransition {
        queue_id: entry.queue_id,
        from_status: None,
        to_status: QueueStatus::Pending,
        retry_count: 0,
        worker_id: None,
        metadata: Some(json!({ "event_id": entry.event_id, "rule_id": entry.rule_id })),
    }
}

pub fn apply_claim(
    entry: &QueueEntry,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<(QueueEntry, NewQueueTransition)> {
    let target = transition_error(entry, QueueEvent::Claim)?;

    let mut next = entry.clone();
    next.status = target;
    next.started_at = Some(now);
    next.claimed_by = Some(worker_id.to_string());

    let transition = NewQueueTransition {
        queue_id: entry.queue_id,
        from_status: Some(entry.status),
        to_status: target,
        retry_count: entry.retry_count,
        worker_id: Some(worker_id.to_string()),
        metadata: None,
    };
    Ok((next, transition))
}

/// A `PROCESSING` entry may only be reported on by the worker holding its
/// claim. A claim the watchdog expired and another worker picked up belongs
/// to the new holder.
pub fn check_claim_owner(entry: &QueueEntry, worker_id: &str) -> Result<()> {
    if entry.status != QueueStatus::Processing || entry.claimed_by.as_deref() == Some(worker_id) {
        return Ok(());
    }
    Err(EventLoopError::ClaimNotOwned {
        queue_id: entry.queue_id,
        worker_id: worker_id.to_string(),
        claimed_by: entry.claimed_by.clone(),
    })
}

/// Record `worker_id`'s attempt. Entries no longer `PROCESSING` fail the
/// state machine; entries claimed by someone else fail the owner check.
pub fn apply_completion(
    entry: &QueueEntry,
    worker_id: &str,
    attempt: ExecutionAttempt,
    now: DateTime<Utc>,
) -> Result<(QueueEntry, NewQueueTransition)> {
    check_claim_owner(entry, worker_id)?;
    if !attempt.success {
        let error = attempt.error.unwrap_or(serde_json::Value::Null);
        return apply_failure(entry, error, now);
    }

    let target = transition_error(entry, QueueEvent::Complete)?;
    let duration_ms = execution_duration_ms(entry, now);

    let mut next = entry.clone();
    next.status = target;
    next.completed_at = Some(now);
    next.result = attempt.result;
    next.execution_duration_ms = duration_ms;

    let transition = NewQueueTransition {
        queue_id: entry.queue_id,
        from_status: Some(entry.status),
        to_status: target,
        retry_count: entry.retry_count,
        worker_id: entry.claimed_by.clone(),
        metadata: Some(json!({ "duration_ms": duration_ms })),
    };
    Ok((next, transition))
}

/// One failed attempt: reopen with the retry count bumped, or fail terminally
pub fn apply_failure(
    entry: &QueueEntry,
    error: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(QueueEntry, NewQueueTransition)> {
    let resolution = QueueStateMachine::resolve_failure(entry.retry_count, entry.max_retries);
    let target = transition_error(entry, resolution.event)?;
    let duration_ms = execution_duration_ms(entry, now);

    let mut next = entry.clone();
    next.status = target;
    next.retry_count = resolution.retry_count;
    next.error = Some(error.clone());
    next.execution_duration_ms = duration_ms;
    if resolution.will_retry() {
        next.started_at = None;
        next.claimed_by = None;
    } else {
        next.completed_at = Some(now);
    }

    let transition = NewQueueTransition {
        queue_id: entry.queue_id,
        from_status: Some(entry.status),
        to_status: target,
        retry_count: resolution.retry_count,
        worker_id: entry.claimed_by.clone(),
        metadata: Some(json!({ "error": error, "duration_ms": duration_ms })),
    };
    Ok((next, transition))
}

pub fn apply_skip(
    entry: &QueueEntry,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<(QueueEntry, NewQueueTransition)> {
    let target = transition_error(entry, QueueEvent::Skip)?;

    let mut next = entry.clone();
    next.status = target;
    next.completed_at = Some(now);
    if let Some(reason) = &reason {
        next.error = Some(json!({ "skipped": reason }));
    }

    let transition = NewQueueTransition {
        queue_id: entry.queue_id,
        from_status: Some(entry.status),
        to_status: target,
        retry_count: entry.retry_count,
        worker_id: None,
        metadata: reason.map(|r| json!({ "reason": r })),
    };
    Ok((next, transition))
}

/// Whether a claim started at or before the cutoff is still outstanding
pub fn is_stale(entry: &QueueEntry, started_before: DateTime<Utc>) -> bool {
    entry.status == QueueStatus::Processing
        && entry.started_at.is_some_and(|started| started <= started_before)
}

fn execution_duration_ms(entry: &QueueEntry, now: DateTime<Utc>) -> Option<i64> {
    entry
        .started_at
        .map(|started| (now - started).num_milliseconds().max(0))
}

/// Gate a rule firing against its current bookkeeping
pub fn check_fireable(rule: &Rule, now: DateTime<Utc>) -> Option<FireOutcome> {
    if !rule.active {
        return Some(FireOutcome::Inactive);
    }
    rule.cooldown_remaining(now)
        .map(|remaining| FireOutcome::CoolingDown { remaining })
}
