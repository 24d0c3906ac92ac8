//! Claim, completion, retry, skip and watchdog behaviour of the work queue

mod common;

use common::*;
use event_loop_core::config::EventLoopConfig;
use event_loop_core::orchestration::CompletionOutcome;
use event_loop_core::store::QueueStore;
use event_loop_core::{EventLoopError, QueueStatus};
use serde_json::json;

async fn seed(harness: &TestLoop, priorities: &[i32]) -> Vec<i64> {
    let mut ids = Vec::new();
    for priority in priorities {
        let entry = harness
            .store
            .enqueue(pending_entry(*priority), harness.now())
            .await
            .unwrap();
        ids.push(entry.queue_id);
        harness.clock.advance_secs(1);
    }
    ids
}

#[tokio::test]
async fn test_priority_then_fifo_claim_order() {
    let harness = TestLoop::new("BULL", 0);
    let ids = seed(&harness, &[1, 5, 5]).await;

    let claimed = harness.event_loop.claim(None, 2).await.unwrap();
    let claimed_ids: Vec<_> = claimed.iter().map(|e| e.queue_id).collect();
    assert_eq!(claimed_ids, vec![ids[0], ids[1]]);
    assert!(claimed
        .iter()
        .all(|e| e.status == QueueStatus::Processing && e.started_at.is_some()));

    let remaining = harness.event_loop.entry(ids[2]).await.unwrap();
    assert_eq!(remaining.status, QueueStatus::Pending);
}

#[tokio::test]
async fn test_claim_with_zero_limit_mutates_nothing() {
    let harness = TestLoop::new("BULL", 0);
    let ids = seed(&harness, &[1, 2]).await;

    assert!(harness.event_loop.claim(None, 0).await.unwrap().is_empty());
    for id in ids {
        assert_eq!(harness.event_loop.entry(id).await.unwrap().status, QueueStatus::Pending);
        assert_eq!(harness.event_loop.transitions(id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_claim_filters_by_target_agent() {
    let harness = TestLoop::new("BULL", 0);
    let now = harness.now();
    harness.store.enqueue(entry_for("risk", 1, 3), now).await.unwrap();
    let ledger = harness
        .store
        .enqueue(entry_for("ledger", 9, 3), now)
        .await
        .unwrap();

    let claimed = harness.event_loop.claim(Some("ledger"), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].queue_id, ledger.queue_id);

    let counts = harness.event_loop.status_counts(Some("risk")).await.unwrap();
    assert_eq!(counts.get(QueueStatus::Pending), 1);
    assert_eq!(counts.get(QueueStatus::Processing), 0);
}

#[tokio::test]
async fn test_retry_budget_of_three() {
    let harness = TestLoop::new("BULL", 0);
    let id = seed(&harness, &[3]).await[0];

    for expected_retry_count in 1..=2 {
        harness.event_loop.claim(None, 1).await.unwrap();
        let outcome = harness
            .event_loop
            .complete(id, false, None, Some(json!({"message": "upstream timeout"})))
            .await
            .unwrap();
        assert!(matches!(outcome, CompletionOutcome::Retrying(_)));
        let entry = outcome.entry();
        assert_eq!(entry.status, QueueStatus::Pending);
        assert_eq!(entry.retry_count, expected_retry_count);
        assert_eq!(entry.started_at, None);
        assert_eq!(entry.priority, 3);
    }

    harness.event_loop.claim(None, 1).await.unwrap();
    let outcome = harness
        .event_loop
        .complete(id, false, None, Some(json!({"message": "upstream timeout"})))
        .await
        .unwrap();
    assert!(matches!(outcome, CompletionOutcome::Failed(_)));
    assert_eq!(outcome.entry().status, QueueStatus::Failed);
    assert_eq!(outcome.retry_count(), 3);
    assert_eq!(
        outcome.entry().error,
        Some(json!({"message": "upstream timeout"}))
    );
}

#[tokio::test]
async fn test_exhausted_entries_stay_failed() {
    let harness = TestLoop::new("BULL", 0);
    let id = seed(&harness, &[3]).await[0];

    for _ in 0..3 {
        harness.event_loop.claim(None, 1).await.unwrap();
        harness.event_loop.complete(id, false, None, None).await.unwrap();
    }

    // The extra attempt finds nothing to claim and cannot be completed.
    assert!(harness.event_loop.claim(None, 1).await.unwrap().is_empty());
    let err = harness.event_loop.complete(id, false, None, None).await.unwrap_err();
    assert!(matches!(err, EventLoopError::InvalidTransition { .. }));

    let entry = harness.event_loop.entry(id).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.retry_count, entry.max_retries);
}

#[tokio::test]
async fn test_completed_entries_never_transition_again() {
    let harness = TestLoop::new("BULL", 0);
    let id = seed(&harness, &[3]).await[0];
    harness.event_loop.claim(None, 1).await.unwrap();
    harness.clock.advance_secs(3);
    let outcome = harness
        .event_loop
        .complete(id, true, Some(json!({"adjusted": 2})), None)
        .await
        .unwrap();
    assert_eq!(outcome.entry().execution_duration_ms, Some(3_000));

    assert!(harness.event_loop.complete(id, true, None, None).await.is_err());
    assert!(harness.event_loop.complete(id, false, None, None).await.is_err());
    assert!(harness.event_loop.skip(id, None).await.is_err());
    assert!(harness.event_loop.claim(None, 10).await.unwrap().is_empty());

    let entry = harness.event_loop.entry(id).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
    assert_eq!(entry.result, Some(json!({"adjusted": 2})));
}

#[tokio::test]
async fn test_processing_entries_cannot_be_skipped() {
    let harness = TestLoop::new("BULL", 0);
    let id = seed(&harness, &[3]).await[0];
    harness.event_loop.claim(None, 1).await.unwrap();

    let err = harness
        .event_loop
        .skip(id, Some("too late".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, EventLoopError::InvalidTransition { .. }));
    assert_eq!(
        harness.event_loop.entry(id).await.unwrap().status,
        QueueStatus::Processing
    );
}

#[tokio::test]
async fn test_full_history_is_kept() {
    let harness = TestLoop::new("BULL", 0);
    let id = seed(&harness, &[3]).await[0];

    harness.event_loop.claim(None, 1).await.unwrap();
    harness.event_loop.complete(id, false, None, None).await.unwrap();
    harness.event_loop.claim(None, 1).await.unwrap();
    harness.event_loop.complete(id, true, None, None).await.unwrap();

    let statuses: Vec<_> = harness
        .event_loop
        .transitions(id)
        .await
        .unwrap()
        .iter()
        .map(|t| (t.from_status, t.to_status, t.retry_count))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (None, QueueStatus::Pending, 0),
            (Some(QueueStatus::Pending), QueueStatus::Processing, 0),
            (Some(QueueStatus::Processing), QueueStatus::Pending, 1),
            (Some(QueueStatus::Pending), QueueStatus::Processing, 1),
            (Some(QueueStatus::Processing), QueueStatus::Completed, 1),
        ]
    );
}

#[tokio::test]
async fn test_watchdog_recovers_abandoned_claims() {
    let mut config = EventLoopConfig::default();
    config.watchdog.stale_after_seconds = 300;
    let harness = TestLoop::with_config("BULL", 0, config);
    let ids = seed(&harness, &[1, 2]).await;

    let crashed = harness.event_loop.worker("crashed");
    crashed.claim(None, 1).await.unwrap();
    harness.clock.advance_secs(200);
    harness.event_loop.claim(None, 1).await.unwrap();

    harness.clock.advance_secs(150);
    let report = harness.event_loop.sweep_stale().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.requeued, vec![ids[0]]);

    let recovered = harness.event_loop.entry(ids[0]).await.unwrap();
    assert_eq!(recovered.status, QueueStatus::Pending);
    assert_eq!(recovered.retry_count, 1);
    assert_eq!(recovered.error, Some(json!("claim expired")));

    let still_running = harness.event_loop.entry(ids[1]).await.unwrap();
    assert_eq!(still_running.status, QueueStatus::Processing);
    assert_eq!(still_running.claimed_by.as_deref(), Some("test-worker"));
}

#[tokio::test]
async fn test_late_report_after_expiry_cannot_touch_the_new_claim() {
    let mut config = EventLoopConfig::default();
    config.watchdog.stale_after_seconds = 60;
    let harness = TestLoop::with_config("BULL", 0, config);
    let id = seed(&harness, &[3]).await[0];

    let slow = harness.event_loop.worker("slow");
    let fresh = harness.event_loop.worker("fresh");
    slow.claim(None, 1).await.unwrap();
    harness.clock.advance_secs(61);
    assert_eq!(harness.event_loop.sweep_stale().await.unwrap().requeued, vec![id]);
    assert_eq!(fresh.claim(None, 1).await.unwrap()[0].queue_id, id);

    let err = slow.complete(id, false, None, Some(json!("gave up"))).await.unwrap_err();
    assert_eq!(
        err,
        EventLoopError::ClaimNotOwned {
            queue_id: id,
            worker_id: "slow".to_string(),
            claimed_by: Some("fresh".to_string()),
        }
    );

    let held = harness.event_loop.entry(id).await.unwrap();
    assert_eq!(held.status, QueueStatus::Processing);
    assert_eq!(held.retry_count, 1);
    assert_eq!(held.claimed_by.as_deref(), Some("fresh"));

    let outcome = fresh.complete(id, true, None, None).await.unwrap();
    assert!(matches!(outcome, CompletionOutcome::Completed(_)));
    assert_eq!(outcome.retry_count(), 1);
}

#[tokio::test]
async fn test_late_report_on_reopened_entry_is_rejected() {
    let mut config = EventLoopConfig::default();
    config.watchdog.stale_after_seconds = 60;
    let harness = TestLoop::with_config("BULL", 0, config);
    let id = seed(&harness, &[3]).await[0];

    let slow = harness.event_loop.worker("slow");
    slow.claim(None, 1).await.unwrap();
    harness.clock.advance_secs(61);
    harness.event_loop.sweep_stale().await.unwrap();

    let err = slow.complete(id, true, None, None).await.unwrap_err();
    assert!(matches!(err, EventLoopError::InvalidTransition { .. }));

    let entry = harness.event_loop.entry(id).await.unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.retry_count, 1);
}

#[tokio::test]
async fn test_unknown_entry_is_reported() {
    let harness = TestLoop::new("BULL", 0);
    let err = harness.event_loop.complete(77, true, None, None).await.unwrap_err();
    assert_eq!(err, EventLoopError::QueueEntryNotFound(77));
    assert!(!err.is_retryable());
}
