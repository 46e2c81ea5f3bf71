//! Task store port

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportgen_core::{
    HealthPolicy, NewAuditRecord, NewTask, ProviderRegistration, ProviderState,
    SanitizerAuditRecord, SlotDecision, Task, TaskId, TaskStatus,
};

use crate::Result;

/// Result of an approval request on a FLAGGED task
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// The task is now COMPLETE
    Approved {
        task: Task,
        record: SanitizerAuditRecord,
    },
    /// The latest sanitizer pass still shows corrections; the task stays FLAGGED
    Rejected {
        task: Task,
        outstanding: u32,
        record: SanitizerAuditRecord,
    },
}

/// Durable task queue, provider bookkeeping, audit log and control flags
///
/// Every mutating call takes `now` explicitly so callers decide the clock.
/// Each call is atomic: a task transition and the audit record that goes with
/// it are committed together or not at all.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING task, refusing a fingerprint held by a non-terminal task.
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task>;

    /// Atomically move the oldest eligible PENDING task to IN_PROGRESS.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>>;

    /// IN_PROGRESS → COMPLETE, appending `audit`.
    async fn complete(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    /// IN_PROGRESS → FLAGGED, appending `audit`.
    async fn flag(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    /// IN_PROGRESS → PENDING with backoff, or FAILED once retries run out.
    async fn retry_or_fail(&self, id: TaskId, error: String, now: DateTime<Utc>) -> Result<Task>;

    /// Store a reviewer's edited response on a FLAGGED task with its sanitizer record.
    async fn revise(
        &self,
        id: TaskId,
        response: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    /// FLAGGED → COMPLETE if the latest sanitizer pass has no corrections.
    /// Either way an audit record is appended.
    async fn approve(&self, id: TaskId, now: DateTime<Utc>) -> Result<ApprovalOutcome>;

    /// Terminal → fresh PENDING with attempts reset.
    async fn rerun(&self, id: TaskId, now: DateTime<Utc>) -> Result<Task>;

    /// IN_PROGRESS tasks last touched at or before `claimed_before` go back to
    /// PENDING, due at `now`. Returns the requeued tasks, oldest first.
    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>>;

    async fn get_task(&self, id: TaskId) -> Result<Task>;

    /// Tasks oldest first, optionally filtered by status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    /// Number of PENDING tasks, including those still backing off.
    async fn queue_length(&self) -> Result<u64>;

    async fn audit_for_task(&self, id: TaskId) -> Result<Vec<SanitizerAuditRecord>>;

    /// Records with `since <= created_at <= until`, oldest first.
    async fn audit_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SanitizerAuditRecord>>;

    /// Insert or update a provider row; health and counters survive re-registration.
    async fn register_provider(
        &self,
        registration: &ProviderRegistration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState>;

    /// Check health, cool-off and quota, and count the call if it may proceed.
    async fn acquire_provider_slot(&self, name: &str, now: DateTime<Utc>) -> Result<SlotDecision>;

    async fn record_provider_success(
        &self,
        name: &str,
        latency: Duration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState>;

    async fn record_provider_failure(
        &self,
        name: &str,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) -> Result<ProviderState>;

    async fn set_provider_priority(
        &self,
        name: &str,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<ProviderState>;

    /// All provider rows by ascending priority.
    async fn provider_states(&self) -> Result<Vec<ProviderState>>;

    async fn set_paused(&self, paused: bool, now: DateTime<Utc>) -> Result<()>;

    async fn is_paused(&self) -> Result<bool>;
}
