//! Test doubles shared by the pipeline tests

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reportgen_core::{
    HealthPolicy, NewAuditRecord, NewTask, ProviderRegistration, ProviderState,
    SanitizerAuditRecord, SlotDecision, Task, TaskId, TaskStatus,
};
use reportgen_llm::{Generation, GenerationProvider, ProviderError};
use reportgen_store::{ApprovalOutcome, MemoryTaskStore, StoreError, TaskStore};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

/// What a [`ScriptedProvider`] does once its script runs out
enum Fallback {
    Reply(String),
    Timeout,
}

/// Provider that plays back a fixed list of outcomes
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Fallback,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Always answers with `text`
    pub fn replying(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Reply(text.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always reports a timeout
    pub fn timing_out(name: &str) -> Self {
        Self {
            fallback: Fallback::Timeout,
            ..Self::replying(name, "")
        }
    }

    /// Plays `script` first, then falls back to replying `text`
    pub fn scripted(name: &str, script: Vec<Result<String, ProviderError>>, text: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::replying(name, text)
        }
    }

    /// Sleeps before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, _prompt: &str, timeout: Duration) -> reportgen_llm::Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome.map(Generation::new),
            None => match &self.fallback {
                Fallback::Reply(text) => Ok(Generation::new(text.clone())),
                Fallback::Timeout => Err(ProviderError::Timeout(timeout)),
            },
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Write a fact sheet for one ticker into `dir` and return its path.
pub fn write_fact_sheet(dir: &Path) -> PathBuf {
    let path = dir.join("AAPL.json");
    std::fs::write(
        &path,
        r#"{"facts": {
            "close_price": {"value": 231.40, "kind": "price", "aliases": ["close"]},
            "change_pct": {"value": 1.25, "kind": "percent", "aliases": ["change"]},
            "trend": {"value": "bullish", "kind": "label"}
        }}"#,
    )
    .unwrap();
    path
}

/// One wrong price: corrected, below the default flag threshold
pub const ONE_MISTAKE: &str = "The close was $230.00 and the change was 1.25%.";

/// Three wrong claims: flagged with the default threshold
pub const THREE_MISTAKES: &str = "The close was $210.00, a change of 4.1%, trend is bearish.";

/// Memory store whose next `complete` calls report a busy database
pub struct BusyStore {
    inner: Arc<MemoryTaskStore>,
    busy_completes: AtomicU32,
}

impl BusyStore {
    pub fn new(inner: Arc<MemoryTaskStore>, busy_completes: u32) -> Self {
        Self {
            inner,
            busy_completes: AtomicU32::new(busy_completes),
        }
    }

    pub fn set_busy_completes(&self, n: u32) {
        self.busy_completes.store(n, Ordering::SeqCst);
    }

    fn take_busy(&self) -> bool {
        self.busy_completes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskStore for BusyStore {
    async fn enqueue(&self, task: NewTask, now: DateTime<Utc>) -> reportgen_store::Result<Task> {
        self.inner.enqueue(task, now).await
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> reportgen_store::Result<Option<Task>> {
        self.inner.claim_next(now).await
    }

    async fn complete(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<Task> {
        if self.take_busy() {
            return Err(StoreError::Contention);
        }
        self.inner.complete(id, response, provider_used, audit, now).await
    }

    async fn flag(
        &self,
        id: TaskId,
        response: String,
        provider_used: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<Task> {
        self.inner.flag(id, response, provider_used, audit, now).await
    }

    async fn retry_or_fail(
        &self,
        id: TaskId,
        error: String,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<Task> {
        self.inner.retry_or_fail(id, error, now).await
    }

    async fn revise(
        &self,
        id: TaskId,
        response: String,
        audit: NewAuditRecord,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<Task> {
        self.inner.revise(id, response, audit, now).await
    }

    async fn approve(&self, id: TaskId, now: DateTime<Utc>) -> reportgen_store::Result<ApprovalOutcome> {
        self.inner.approve(id, now).await
    }

    async fn rerun(&self, id: TaskId, now: DateTime<Utc>) -> reportgen_store::Result<Task> {
        self.inner.rerun(id, now).await
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<Vec<Task>> {
        self.inner.requeue_stale(claimed_before, now).await
    }

    async fn get_task(&self, id: TaskId) -> reportgen_store::Result<Task> {
        self.inner.get_task(id).await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> reportgen_store::Result<Vec<Task>> {
        self.inner.list_tasks(status).await
    }

    async fn queue_length(&self) -> reportgen_store::Result<u64> {
        self.inner.queue_length().await
    }

    async fn audit_for_task(&self, id: TaskId) -> reportgen_store::Result<Vec<SanitizerAuditRecord>> {
        self.inner.audit_for_task(id).await
    }

    async fn audit_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> reportgen_store::Result<Vec<SanitizerAuditRecord>> {
        self.inner.audit_between(since, until).await
    }

    async fn register_provider(
        &self,
        registration: &ProviderRegistration,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<ProviderState> {
        self.inner.register_provider(registration, now).await
    }

    async fn acquire_provider_slot(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<SlotDecision> {
        self.inner.acquire_provider_slot(name, now).await
    }

    async fn record_provider_success(
        &self,
        name: &str,
        latency: Duration,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<ProviderState> {
        self.inner.record_provider_success(name, latency, now).await
    }

    async fn record_provider_failure(
        &self,
        name: &str,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<ProviderState> {
        self.inner.record_provider_failure(name, policy, now).await
    }

    async fn set_provider_priority(
        &self,
        name: &str,
        priority: i32,
        now: DateTime<Utc>,
    ) -> reportgen_store::Result<ProviderState> {
        self.inner.set_provider_priority(name, priority, now).await
    }

    async fn provider_states(&self) -> reportgen_store::Result<Vec<ProviderState>> {
        self.inner.provider_states().await
    }

    async fn set_paused(&self, paused: bool, now: DateTime<Utc>) -> reportgen_store::Result<()> {
        self.inner.set_paused(paused, now).await
    }

    async fn is_paused(&self) -> reportgen_store::Result<bool> {
        self.inner.is_paused().await
    }
}
