//! Workers: claim a task, generate, sanitize, record the outcome
//!
//! A [`Worker`] processes one task per [`Worker::run_once`]. [`WorkerGroup`]
//! runs several worker loops and stops them through a shared `watch` channel;
//! shutdown lets an in-flight task finish before the loop exits.
//!
//! Once a task is claimed its outcome write is retried with a bounded backoff.
//! If every attempt fails the task stays IN_PROGRESS until an operator runs
//! [`ControlService::requeue_stale`](crate::ControlService::requeue_stale).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reportgen_core::{Clock, Task, TaskId, TaskStatus};
use reportgen_sanitizer::{FactCache, Sanitizer};
use reportgen_store::{StoreError, TaskStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::gateway::ProviderGateway;
use crate::marker::{DocumentMark, DocumentMarker, NoopMarker, SidecarMarker};
use crate::metrics::PipelineMetrics;

/// What one poll of the queue did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Claims are paused
    Paused,
    /// Nothing eligible, or another worker won the claim
    Idle,
    /// A task was claimed and moved to its next state
    Processed(Task),
}

/// Bounded backoff for recording the outcome of a claimed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRetry {
    /// Total tries, the first included
    pub attempts: u32,
    /// Delay before the second try; doubles after each failure
    pub base_delay: Duration,
}

impl Default for WriteRetry {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Processes tasks from the store one at a time
pub struct Worker {
    store: Arc<dyn TaskStore>,
    gateway: Arc<ProviderGateway>,
    sanitizer: Sanitizer,
    facts: Arc<FactCache>,
    marker: Arc<dyn DocumentMarker>,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    write_retry: WriteRetry,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<ProviderGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::clone(gateway.metrics());
        Self {
            store,
            gateway,
            sanitizer: Sanitizer::default(),
            facts: Arc::new(FactCache::default()),
            marker: Arc::new(NoopMarker),
            metrics,
            clock,
            poll_interval: Duration::from_secs(5),
            write_retry: WriteRetry::default(),
        }
    }

    /// Worker with configured providers, sanitizer settings and sidecar marking.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let gateway = ProviderGateway::from_config(config, Arc::clone(&store), Arc::clone(&clock))?;
        Ok(Self::new(store, Arc::new(gateway), clock)
            .with_sanitizer(Sanitizer::new(config.sanitizer_config()))
            .with_fact_cache(Arc::new(FactCache::new(config.facts_cache_ttl)))
            .with_marker(Arc::new(SidecarMarker))
            .with_poll_interval(config.poll_interval))
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

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_write_retry(mut self, write_retry: WriteRetry) -> Self {
        self.write_retry = write_retry;
        self
    }

    pub fn gateway(&self) -> &Arc<ProviderGateway> {
        &self.gateway
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Claim and process at most one task.
    pub async fn run_once(&self) -> Result<Tick> {
        self.metrics.set_queue_length(self.store.queue_length().await?);

        if self.store.is_paused().await? {
            debug!("claims paused");
            return Ok(Tick::Paused);
        }

        let task = match self.store.claim_next(self.clock.now()).await {
            Ok(Some(task)) => task,
            Ok(None) => return Ok(Tick::Idle),
            Err(e) if e.is_contention() => {
                debug!("claim contended, treating as empty poll");
                return Ok(Tick::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        self.process(task).await.map(Tick::Processed)
    }

    #[instrument(skip_all, fields(task_id = %task.id, attempt = task.attempts + 1))]
    async fn process(&self, task: Task) -> Result<Task> {
        debug!(document = %task.document_path.display(), "task claimed");

        let facts = match self.facts.load(&task.document_path).await {
            Ok(facts) => facts,
            Err(e) => {
                return self
                    .reschedule(task.id, format!("canonical facts unavailable: {e}"))
                    .await;
            }
        };

        let dispatch = match self.gateway.dispatch(&task.payload).await {
            Ok(dispatch) => dispatch,
            Err(e) => return self.reschedule(task.id, e.to_string()).await,
        };

        let report = self.sanitizer.sanitize(&dispatch.generation.text, &facts);
        let corrections = report.corrections_count();
        self.metrics.add_corrections(corrections);
        let id = task.id;
        let audit = report.audit_record();
        let flagged = report.is_flagged();
        let (text, provider) = (report.text, dispatch.provider);
        let now = self.clock.now();

        let task = if flagged {
            let task = self
                .persist(id, "flag", || {
                    self.store
                        .flag(id, text.clone(), provider.clone(), audit.clone(), now)
                })
                .await?;
            self.metrics.task_flagged();
            warn!(corrections, provider = ?task.provider_used, "response flagged for review");
            task
        } else {
            let task = self
                .persist(id, "complete", || {
                    self.store
                        .complete(id, text.clone(), provider.clone(), audit.clone(), now)
                })
                .await?;
            self.metrics.task_completed();
            info!(corrections, provider = ?task.provider_used, "task complete");
            task
        };

        self.mark(&task, corrections).await;
        Ok(task)
    }

    async fn reschedule(&self, id: TaskId, error: String) -> Result<Task> {
        let now = self.clock.now();
        let task = self
            .persist(id, "retry", || self.store.retry_or_fail(id, error.clone(), now))
            .await?;
        if task.status == TaskStatus::Failed {
            self.metrics.task_failed();
            error!(
                attempts = task.attempts,
                last_error = ?task.last_error,
                "task failed, retries exhausted"
            );
        } else {
            self.metrics.task_retried();
            warn!(
                attempts = task.attempts,
                next_attempt_at = %task.next_attempt_at,
                last_error = ?task.last_error,
                "task rescheduled"
            );
        }
        Ok(task)
    }

    /// Run one outcome write, retrying transient store failures.
    async fn persist<F, Fut>(&self, id: TaskId, operation: &'static str, mut write: F) -> Result<Task>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = reportgen_store::Result<Task>>,
    {
        let mut delay = self.write_retry.base_delay;
        let mut attempt = 1;
        loop {
            match write().await {
                Ok(task) => return Ok(task),
                Err(e) if e.is_retryable() && attempt < self.write_retry.attempts => {
                    warn!(error = %e, attempt, operation, "store write failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(stranded(id, operation, e)),
            }
        }
    }

    /// Marking is best effort; the task state is already committed.
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

    /// Poll until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.metrics.worker_started();
        info!("worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Tick::Processed(_)) => false,
                Ok(Tick::Idle | Tick::Paused) => true,
                Err(e) => {
                    error!(error = %e, "worker iteration failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.worker_stopped();
        info!("worker stopped");
    }
}

fn stranded(id: TaskId, operation: &'static str, e: StoreError) -> PipelineError {
    error!(
        task_id = %id,
        error = %e,
        operation,
        "could not record task outcome, task stays in progress until requeued"
    );
    e.into()
}

/// A set of worker loops sharing one [`Worker`]
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` worker loops.
    pub fn spawn(n: usize, worker: Arc<Worker>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Arc::clone(&worker);
            let rx = shutdown_rx.clone();
            let join = tokio::spawn(
                async move { worker.run(rx).await }.instrument(info_span!("worker", worker_id)),
            );
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new tasks. In-flight tasks still finish.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for result in futures::future::join_all(self.joins).await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}
