//! Behaviour every `TaskStore` implementation must share
//!
//! Each store's test module runs these against its own backend.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reportgen_core::{
    AuditKind, AuditNote, HealthPolicy, NewAuditRecord, NewTask, ProviderHealth,
    ProviderRegistration, QuotaWindow, SkipReason, SlotDecision, TaskStatus,
};

use crate::{ApprovalOutcome, RetryPolicy, StoreError, TaskStore};
use tokio_test::{assert_err, assert_ok};

pub(crate) fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_secs(10),
        multiplier: 2.0,
        max_jitter: Duration::ZERO,
    }
}

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

pub(crate) fn new_task(n: u32) -> NewTask {
    NewTask::new(
        format!("reports/{n}.json"),
        format!("Write the summary for report {n}"),
        format!("fp-{n}"),
    )
}

fn notes(n: usize) -> Vec<AuditNote> {
    (0..n)
        .map(|i| AuditNote::new(format!("field_{i}"), "1.00", "2.00"))
        .collect()
}

pub(crate) async fn enqueue_and_claim_fifo<S: TaskStore>(store: &S) {
    let first = store.enqueue(new_task(1), t0()).await.unwrap();
    let second = store.enqueue(new_task(2), t0() + secs(1)).await.unwrap();
    assert_eq!(first.status, TaskStatus::Pending);
    assert_eq!(store.queue_length().await.unwrap(), 2);

    let claimed = store.claim_next(t0() + secs(2)).await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, TaskStatus::InProgress);
    let claimed = store.claim_next(t0() + secs(2)).await.unwrap().unwrap();
    assert_eq!(claimed.id, second.id);
    assert!(store.claim_next(t0() + secs(2)).await.unwrap().is_none());

    assert_eq!(store.queue_length().await.unwrap(), 0);
    let in_progress = store.list_tasks(Some(TaskStatus::InProgress)).await.unwrap();
    assert_eq!(in_progress.len(), 2);
}

pub(crate) async fn duplicate_fingerprint<S: TaskStore>(store: &S) {
    let first = store.enqueue(new_task(1), t0()).await.unwrap();
    let err = store.enqueue(new_task(1), t0()).await.unwrap_err();
    assert!(
        matches!(err, StoreError::DuplicateFingerprint { existing, .. } if existing == first.id)
    );
    assert_eq!(store.list_tasks(None).await.unwrap().len(), 1);

    store.claim_next(t0()).await.unwrap().unwrap();
    assert_err!(store.enqueue(new_task(1), t0()).await);

    store
        .complete(
            first.id,
            "done".into(),
            "anthropic".into(),
            NewAuditRecord::sanitization(vec![]),
            t0(),
        )
        .await
        .unwrap();
    let again = store.enqueue(new_task(1), t0() + secs(5)).await.unwrap();
    assert_ne!(again.id, first.id);
}

pub(crate) async fn backoff_hides_task_until_due<S: TaskStore>(store: &S) {
    let task = store.enqueue(new_task(1), t0()).await.unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();

    let retried = store
        .retry_or_fail(task.id, "all providers exhausted".into(), t0())
        .await
        .unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.next_attempt_at, t0() + secs(20));

    assert!(store.claim_next(t0() + secs(19)).await.unwrap().is_none());
    let claimed = store.claim_next(t0() + secs(20)).await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.attempts, 1);
}

pub(crate) async fn retries_exhaust_to_failed<S: TaskStore>(store: &S) {
    let task = store.enqueue(new_task(1), t0()).await.unwrap();
    let mut now = t0();
    let mut last = task.clone();
    for _ in 0..3 {
        store.claim_next(now).await.unwrap().unwrap();
        last = store.retry_or_fail(task.id, "timeout".into(), now).await.unwrap();
        now = last.next_attempt_at.max(now) + secs(1);
    }
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.attempts, 3);
    assert_eq!(last.last_error.as_deref(), Some("timeout"));
    assert!(store.claim_next(now + secs(3600)).await.unwrap().is_none());

    let err = store
        .retry_or_fail(task.id, "again".into(), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

pub(crate) async fn complete_writes_audit_once<S: TaskStore>(store: &S) {
    let task = store.enqueue(new_task(1), t0()).await.unwrap();
    let err = store
        .complete(task.id, "x".into(), "a".into(), NewAuditRecord::sanitization(vec![]), t0())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            status: TaskStatus::Pending,
            ..
        }
    ));

    store.claim_next(t0()).await.unwrap().unwrap();
    let done = store
        .complete(
            task.id,
            "Close was $101.20".into(),
            "anthropic".into(),
            NewAuditRecord::sanitization(notes(1)),
            t0() + secs(3),
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Complete);
    assert_eq!(done.provider_used.as_deref(), Some("anthropic"));
    assert_eq!(done.response.as_deref(), Some("Close was $101.20"));

    let again = store
        .complete(task.id, "x".into(), "a".into(), NewAuditRecord::sanitization(vec![]), t0())
        .await;
    assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));

    let audit = store.audit_for_task(task.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].corrections_count, 1);
    assert_eq!(audit[0].kind, AuditKind::Sanitization);
    assert_eq!(audit[0].notes, notes(1));
    assert_eq!(audit[0].created_at, t0() + secs(3));
}

pub(crate) async fn approval_gate<S: TaskStore>(store: &S) {
    let task = store.enqueue(new_task(1), t0()).await.unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();
    let flagged = store
        .flag(
            task.id,
            "draft".into(),
            "openai".into(),
            NewAuditRecord::sanitization(notes(2)),
            t0(),
        )
        .await
        .unwrap();
    assert_eq!(flagged.status, TaskStatus::Flagged);

    match store.approve(task.id, t0() + secs(60)).await.unwrap() {
        ApprovalOutcome::Rejected {
            task: rejected,
            outstanding,
            record,
        } => {
            assert_eq!(rejected.status, TaskStatus::Flagged);
            assert_eq!(outstanding, 2);
            assert_eq!(record.kind, AuditKind::ApprovalRejected);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(store.get_task(task.id).await.unwrap().status, TaskStatus::Flagged);

    store
        .revise(task.id, "fixed draft".into(), NewAuditRecord::revision(vec![]), t0() + secs(120))
        .await
        .unwrap();
    match store.approve(task.id, t0() + secs(180)).await.unwrap() {
        ApprovalOutcome::Approved { task: approved, .. } => {
            assert_eq!(approved.status, TaskStatus::Complete);
            assert_eq!(approved.response.as_deref(), Some("fixed draft"));
        }
        other => panic!("expected approval, got {other:?}"),
    }

    let kinds: Vec<AuditKind> = store
        .audit_for_task(task.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Sanitization,
            AuditKind::ApprovalRejected,
            AuditKind::Revision,
            AuditKind::Approved
        ]
    );

    assert!(matches!(
        store.approve(task.id, t0()).await,
        Err(StoreError::InvalidTransition { .. })
    ));
}

pub(crate) async fn rerun_and_fingerprint_reuse<S: TaskStore>(store: &S) {
    let first = store.enqueue(new_task(1), t0()).await.unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();
    store
        .complete(first.id, "r".into(), "a".into(), NewAuditRecord::sanitization(vec![]), t0())
        .await
        .unwrap();

    let second = store.enqueue(new_task(1), t0() + secs(1)).await.unwrap();
    let err = store.rerun(first.id, t0() + secs(2)).await.unwrap_err();
    assert!(
        matches!(err, StoreError::DuplicateFingerprint { existing, .. } if existing == second.id)
    );

    store.claim_next(t0() + secs(2)).await.unwrap().unwrap();
    store
        .complete(second.id, "r".into(), "a".into(), NewAuditRecord::sanitization(vec![]), t0())
        .await
        .unwrap();

    let rerun = store.rerun(first.id, t0() + secs(3)).await.unwrap();
    assert_eq!(rerun.status, TaskStatus::Pending);
    assert_eq!(rerun.attempts, 0);
    assert_eq!(rerun.response, None);
    assert_eq!(rerun.next_attempt_at, t0() + secs(3));

    assert!(matches!(
        store.rerun(first.id, t0()).await,
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.get_task(reportgen_core::TaskId::new(999)).await,
        Err(StoreError::TaskNotFound(_))
    ));
}

pub(crate) async fn provider_bookkeeping<S: TaskStore>(store: &S) {
    let policy = HealthPolicy {
        failure_threshold: 3,
        cooldown: chrono::Duration::seconds(60),
    };
    store
        .register_provider(
            &ProviderRegistration::new("primary", 0).with_quota(2, QuotaWindow::Hourly),
            t0(),
        )
        .await
        .unwrap();
    store
        .register_provider(&ProviderRegistration::new("backup", 1), t0())
        .await
        .unwrap();

    let names = |states: Vec<reportgen_core::ProviderState>| {
        states.into_iter().map(|s| s.name).collect::<Vec<_>>()
    };
    assert_eq!(names(store.provider_states().await.unwrap()), ["primary", "backup"]);

    assert_eq!(
        store.acquire_provider_slot("primary", t0()).await.unwrap(),
        SlotDecision::Granted
    );
    assert_eq!(
        store.acquire_provider_slot("primary", t0()).await.unwrap(),
        SlotDecision::Granted
    );
    assert!(matches!(
        store.acquire_provider_slot("primary", t0()).await.unwrap(),
        SlotDecision::Unavailable(SkipReason::QuotaExhausted { used: 2, quota: 2, .. })
    ));

    let mut state = None;
    for _ in 0..6 {
        state = Some(
            store
                .record_provider_failure("backup", &policy, t0())
                .await
                .unwrap(),
        );
    }
    let state = state.unwrap();
    assert_eq!(state.health, ProviderHealth::Down);
    assert_eq!(state.consecutive_failures, 6);
    assert!(matches!(
        store.acquire_provider_slot("backup", t0() + secs(30)).await.unwrap(),
        SlotDecision::Unavailable(SkipReason::Down { .. })
    ));
    assert_eq!(
        store.acquire_provider_slot("backup", t0() + secs(60)).await.unwrap(),
        SlotDecision::Granted
    );
    let recovered = store
        .record_provider_success("backup", Duration::from_millis(400), t0() + secs(61))
        .await
        .unwrap();
    assert_eq!(recovered.health, ProviderHealth::Healthy);
    assert_eq!(recovered.avg_latency_ms, Some(400.0));

    store
        .set_provider_priority("backup", -1, t0())
        .await
        .unwrap();
    assert_eq!(names(store.provider_states().await.unwrap()), ["backup", "primary"]);

    let reregistered = store
        .register_provider(
            &ProviderRegistration::new("primary", 5).with_quota(2, QuotaWindow::Hourly),
            t0() + secs(1),
        )
        .await
        .unwrap();
    assert_eq!(reregistered.calls_used, 2);
    assert_eq!(reregistered.priority, 5);

    assert_eq!(
        store.acquire_provider_slot("ghost", t0()).await.unwrap(),
        SlotDecision::Unavailable(SkipReason::Unregistered)
    );
    assert!(matches!(
        store
            .record_provider_success("ghost", Duration::ZERO, t0())
            .await,
        Err(StoreError::ProviderNotFound(_))
    ));
}

pub(crate) async fn pause_flag<S: TaskStore>(store: &S) {
    assert!(!store.is_paused().await.unwrap());
    assert_ok!(store.set_paused(true, t0()).await);
    assert!(store.is_paused().await.unwrap());
    assert_ok!(store.set_paused(false, t0()).await);
    assert!(!store.is_paused().await.unwrap());
}

pub(crate) async fn audit_queries<S: TaskStore>(store: &S) {
    let a = store.enqueue(new_task(1), t0()).await.unwrap();
    let b = store.enqueue(new_task(2), t0()).await.unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();
    store
        .complete(a.id, "a".into(), "p".into(), NewAuditRecord::sanitization(vec![]), t0() + secs(60))
        .await
        .unwrap();
    store
        .complete(b.id, "b".into(), "p".into(), NewAuditRecord::sanitization(notes(1)), t0() + secs(600))
        .await
        .unwrap();

    let early = store
        .audit_between(t0(), t0() + secs(300))
        .await
        .unwrap();
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].task_id, a.id);
    assert_eq!(early[0].corrections_count, 0);

    let all = store
        .audit_between(t0(), t0() + secs(600))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let for_b = store.audit_for_task(b.id).await.unwrap();
    assert_eq!(for_b.len(), 1);
    assert_eq!(for_b[0].corrections_count, 1);
}

pub(crate) async fn stale_claims_requeue<S: TaskStore>(store: &S) {
    let old = store.enqueue(new_task(1), t0()).await.unwrap();
    let fresh = store.enqueue(new_task(2), t0()).await.unwrap();
    let waiting = store.enqueue(new_task(3), t0()).await.unwrap();
    store.claim_next(t0()).await.unwrap().unwrap();
    store.claim_next(t0() + secs(600)).await.unwrap().unwrap();

    let now = t0() + secs(900);
    let requeued = store.requeue_stale(t0() + secs(300), now).await.unwrap();
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].id, old.id);
    assert_eq!(requeued[0].status, TaskStatus::Pending);
    assert_eq!(requeued[0].next_attempt_at, now);
    assert!(requeued[0].last_error.is_some());

    assert_eq!(store.get_task(fresh.id).await.unwrap().status, TaskStatus::InProgress);
    assert_eq!(store.get_task(waiting.id).await.unwrap().status, TaskStatus::Pending);

    let reclaimed = store.claim_next(now).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, old.id);
    assert_eq!(reclaimed.attempts, 0);
    assert!(store.requeue_stale(t0() + secs(300), now).await.unwrap().is_empty());
}

pub(crate) async fn concurrent_claims_are_exclusive<S: TaskStore>(store: &S) {
    store.enqueue(new_task(1), t0()).await.unwrap();
    let (a, b) = tokio::join!(store.claim_next(t0()), store.claim_next(t0()));
    let claimed = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(claimed, 1);
}
