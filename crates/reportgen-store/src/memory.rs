//! In-memory task store
//!
//! One async mutex guards the whole state, which gives every operation the
//! same all-or-nothing behaviour as a database transaction.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reportgen_core::{
    AuditId, HealthPolicy, NewAuditRecord, NewTask, ProviderRegistration, ProviderState,
    SanitizerAuditRecord, SlotDecision, Task, TaskId, TaskStatus,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{ApprovalOutcome, TaskStore};
use crate::{Result, RetryPolicy, StoreError, transition};

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    next_task_id: i64,
    audit: Vec<SanitizerAuditRecord>,
    providers: BTreeMap<String, ProviderState>,
    paused: bool,
}

impl Inner {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))
    }

    fn provider_mut(&mut self, name: &str) -> Result<&mut ProviderState> {
        self.providers
            .get_mut(name)
            .ok_or_else(|| StoreError::ProviderNotFound(name.to_string()))
    }

    fn active_holder(&self, task: &Task) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|other| {
                other.id != task.id
                    && other.fingerprint == task.fingerprint
                    && !other.status.is_terminal()
            })
            .map(|other| other.id)
    }

    fn append_audit(
        &mut self,
        task_id: TaskId,
        record: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> SanitizerAuditRecord {
        let id = AuditId::new(self.audit.len() as i64 + 1);
        let record = SanitizerAuditRecord::from_new(id, task_id, record, now);
        self.audit.push(record.clone());
        record
    }

    fn latest_pass(&self, task_id: TaskId) -> Option<&SanitizerAuditRecord> {
        self.audit
            .iter()
            .rev()
            .find(|record| record.task_id == task_id && record.kind.is_sanitizer_pass())
    }
}

/// Task store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
    retry_policy: RetryPolicy,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .tasks
            .values()
            .find(|t| t.fingerprint == task.fingerprint && !t.status.is_terminal())
        {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint: task.fingerprint,
                existing: existing.id,
            });
        }
        inner.next_task_id += 1;
        let task = Task::pending(TaskId::new(inner.next_task_id), task, now);
        inner.tasks.insert(task.id, task.clone());
        debug!(task_id = %task.id, "task enqueued");
        Ok(task)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .tasks
            .values_mut()
            .filter(|task| task.is_claimable(now))
            .min_by_key(|task| (task.created_at, task.id));
        Ok(next.map(|task| {
            transition::claim(task, now);
            task.clone()
        }))
    }

    async fn complete(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.task_mut(id)?;
        transition::complete(task, response, provider_used, now)?;
        let task = task.clone();
        inner.append_audit(id, audit, now);
        Ok(task)
    }

    async fn flag(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.task_mut(id)?;
        transition::flag(task, response, provider_used, now)?;
        let task = task.clone();
        inner.append_audit(id, audit, now);
        Ok(task)
    }

    async fn retry_or_fail(&self, id: TaskId, error: String, now: DateTime<Utc>) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.task_mut(id)?;
        transition::retry_or_fail(task, error, &self.retry_policy, now)?;
        Ok(task.clone())
    }

    async fn revise(
        &self,
        id: TaskId,
        response: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.task_mut(id)?;
        transition::revise(task, response, now)?;
        let task = task.clone();
        inner.append_audit(id, audit, now);
        Ok(task)
    }

    async fn approve(&self, id: TaskId, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get(&id).ok_or(StoreError::TaskNotFound(id))?;
        let blocker = transition::approval_blocker(task, inner.latest_pass(id))?;

        if let Some(outstanding) = blocker {
            let task = task.clone();
            let record = inner.append_audit(id, NewAuditRecord::approval_rejected(outstanding), now);
            return Ok(ApprovalOutcome::Rejected {
                task,
                outstanding,
                record,
            });
        }

        let task = inner.task_mut(id)?;
        transition::approve(task, now);
        let task = task.clone();
        let record = inner.append_audit(id, NewAuditRecord::approved(), now);
        Ok(ApprovalOutcome::Approved { task, record })
    }

    async fn rerun(&self, id: TaskId, now: DateTime<Utc>) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = inner.tasks.get(&id).ok_or(StoreError::TaskNotFound(id))?;
        if let Some(existing) = inner.active_holder(task) {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint: task.fingerprint.clone(),
                existing,
            });
        }
        let task = inner.task_mut(id)?;
        transition::rerun(task, now)?;
        Ok(task.clone())
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let mut inner = self.inner.lock().await;
        let mut requeued = Vec::new();
        for task in inner.tasks.values_mut().filter(|task| {
            task.status == TaskStatus::InProgress && task.updated_at <= claimed_before
        }) {
            transition::requeue(task, now)?;
            requeued.push(task.clone());
        }
        requeued.sort_by_key(|task| (task.created_at, task.id));
        Ok(requeued)
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let inner = self.inner.lock().await;
        inner.tasks.get(&id).cloned().ok_or(StoreError::TaskNotFound(id))
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| status.is_none_or(|s| task.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| (task.created_at, task.id));
        Ok(tasks)
    }

    async fn queue_length(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .count() as u64)
    }

    async fn audit_for_task(&self, id: TaskId) -> Result<Vec<SanitizerAuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|record| record.task_id == id)
            .cloned()
            .collect())
    }

    async fn audit_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SanitizerAuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|record| record.created_at >= since && record.created_at <= until)
            .cloned()
            .collect())
    }

    async fn register_provider(
        &self,
        registration: &ProviderRegistration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .providers
            .entry(registration.name.clone())
            .and_modify(|state| state.apply_registration(registration, now))
            .or_insert_with(|| ProviderState::new(registration, now));
        Ok(state.clone())
    }

    async fn acquire_provider_slot(&self, name: &str, now: DateTime<Utc>) -> Result<SlotDecision> {
        let mut inner = self.inner.lock().await;
        match inner.providers.get_mut(name) {
            Some(state) => Ok(state.try_acquire(now)),
            None => Ok(SlotDecision::Unavailable(
                reportgen_core::SkipReason::Unregistered,
            )),
        }
    }

    async fn record_provider_success(
        &self,
        name: &str,
        latency: Duration,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let mut inner = self.inner.lock().await;
        let state = inner.provider_mut(name)?;
        state.record_success(latency, now);
        Ok(state.clone())
    }

    async fn record_provider_failure(
        &self,
        name: &str,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let mut inner = self.inner.lock().await;
        let state = inner.provider_mut(name)?;
        state.record_failure(now, policy);
        Ok(state.clone())
    }

    async fn set_provider_priority(
        &self,
        name: &str,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<ProviderState> {
        let mut inner = self.inner.lock().await;
        let state = inner.provider_mut(name)?;
        state.priority = priority;
        state.updated_at = now;
        Ok(state.clone())
    }

    async fn provider_states(&self) -> Result<Vec<ProviderState>> {
        let inner = self.inner.lock().await;
        let mut states: Vec<ProviderState> = inner.providers.values().cloned().collect();
        states.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(states)
    }

    async fn set_paused(&self, paused: bool, _now: DateTime<Utc>) -> Result<()> {
        self.inner.lock().await.paused = paused;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.inner.lock().await.paused)
    }
}
