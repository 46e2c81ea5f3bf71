//! Control and query operations for producers, operators and reviewers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reportgen_core::{
    Clock, NewTask, ProviderState, SanitizerAuditRecord, Task, TaskId, TaskStatus,
};
use reportgen_sanitizer::{FactCache, SanitizationReport, Sanitizer};
use reportgen_store::{ApprovalOutcome, StoreError, TaskStore};
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::marker::{DocumentMark, DocumentMarker, NoopMarker, SidecarMarker};

/// A reviewer's edit after sanitization
#[derive(Debug, Clone)]
pub struct Revision {
    pub task: Task,
    pub report: SanitizationReport,
}

/// Enqueue, inspect and review tasks
pub struct ControlService {
    store: Arc<dyn TaskStore>,
    sanitizer: Sanitizer,
    facts: Arc<FactCache>,
    marker: Arc<dyn DocumentMarker>,
    clock: Arc<dyn Clock>,
}

impl ControlService {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            sanitizer: Sanitizer::default(),
            facts: Arc::new(FactCache::default()),
            marker: Arc::new(NoopMarker),
            clock,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(store, clock)
            .with_sanitizer(Sanitizer::new(config.sanitizer_config()))
            .with_fact_cache(Arc::new(FactCache::new(config.facts_cache_ttl)))
            .with_marker(Arc::new(SidecarMarker))
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_fact_cache(mut self, facts: Arc<FactCache>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_marker(mut self, marker: Arc<dyn DocumentMarker>) -> Self {
        self.marker = marker;
        self
    }

    #[instrument(skip(self, task), fields(document = %task.document_path.display()))]
    pub async fn enqueue(&self, task: NewTask) -> Result<Task> {
        let task = self.store.enqueue(task, self.clock.now()).await?;
        info!(task_id = %task.id, "task enqueued");
        Ok(task)
    }

    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks(status).await?)
    }

    pub async fn task(&self, id: TaskId) -> Result<Task> {
        Ok(self.store.get_task(id).await?)
    }

    pub async fn queue_length(&self) -> Result<u64> {
        Ok(self.store.queue_length().await?)
    }

    pub async fn audit_for_task(&self, id: TaskId) -> Result<Vec<SanitizerAuditRecord>> {
        // surface a missing task instead of an empty trail
        self.store.get_task(id).await?;
        Ok(self.store.audit_for_task(id).await?)
    }

    /// Audit records created in `[since, until]`.
    pub async fn audit_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SanitizerAuditRecord>> {
        if since > until {
            return Err(PipelineError::Config(format!(
                "audit range start {since} is after its end {until}"
            )));
        }
        Ok(self.store.audit_between(since, until).await?)
    }

    /// Provider health and quota snapshot, by priority
    pub async fn providers(&self) -> Result<Vec<ProviderState>> {
        Ok(self.store.provider_states().await?)
    }

    /// Move a FLAGGED task to COMPLETE.
    ///
    /// Refused with [`PipelineError::ApprovalBlocked`] while the latest
    /// sanitizer pass shows corrections; the refusal is audited.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: TaskId) -> Result<Task> {
        match self.store.approve(id, self.clock.now()).await? {
            ApprovalOutcome::Approved { task, .. } => {
                info!("task approved");
                self.mark(&task, 0).await;
                Ok(task)
            }
            ApprovalOutcome::Rejected { outstanding, .. } => {
                warn!(outstanding, "approval refused");
                Err(PipelineError::ApprovalBlocked {
                    task_id: id,
                    corrections: outstanding,
                })
            }
        }
    }

    /// Sanitize a reviewer's edit of a FLAGGED task and store it.
    ///
    /// The task stays FLAGGED; a clean revision lets `approve` succeed.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn revise(&self, id: TaskId, text: &str) -> Result<Revision> {
        let task = self.store.get_task(id).await?;
        if task.status != TaskStatus::Flagged {
            return Err(StoreError::InvalidTransition {
                task_id: id,
                status: task.status,
                operation: "revise",
            }
            .into());
        }

        // reviewers may have fixed the source document as well
        self.facts.invalidate(&task.document_path).await;
        let facts = self.facts.load(&task.document_path).await?;
        let report = self.sanitizer.sanitize(text, &facts);

        let task = self
            .store
            .revise(id, report.text.clone(), report.revision_record(), self.clock.now())
            .await?;
        info!(corrections = report.corrections_count(), "revision stored");
        self.mark(&task, report.corrections_count()).await;
        Ok(Revision { task, report })
    }

    /// Send a terminal task back to the queue with a fresh retry budget.
    #[instrument(skip(self))]
    pub async fn rerun(&self, id: TaskId) -> Result<Task> {
        let task = self.store.rerun(id, self.clock.now()).await?;
        info!("task re-queued");
        Ok(task)
    }

    /// Return tasks stuck IN_PROGRESS for at least `older_than` to the queue.
    ///
    /// For claims whose worker died or could not record an outcome. Only use an
    /// age longer than any worker can legitimately spend on one task.
    #[instrument(skip(self))]
    pub async fn requeue_stale(&self, older_than: std::time::Duration) -> Result<Vec<Task>> {
        let now = self.clock.now();
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| PipelineError::Config(format!("stale claim age out of range: {e}")))?;
        let requeued = self.store.requeue_stale(now - age, now).await?;
        if !requeued.is_empty() {
            warn!(count = requeued.len(), "stale claims requeued");
        }
        Ok(requeued)
    }

    pub async fn pause(&self) -> Result<()> {
        self.store.set_paused(true, self.clock.now()).await?;
        info!("claims paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.store.set_paused(false, self.clock.now()).await?;
        info!("claims resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self.store.is_paused().await?)
    }

    async fn mark(&self, task: &Task, corrections: u32) {
        let mark = DocumentMark {
            status: task.status,
            task_id: task.id,
            corrections,
            updated_at: task.updated_at,
        };
        if let Err(e) = self.marker.mark(&task.document_path, &mark).await {
            warn!(error = %e, document = %task.document_path.display(), "failed to mark document");
        }
    }
}
