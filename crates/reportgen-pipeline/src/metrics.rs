//! In-process pipeline counters
//!
//! Cheap atomics updated by workers and the gateway. An external collector
//! reads them through [`PipelineMetrics::snapshot`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Gauges and counters shared by all workers of a process
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    queue_length: AtomicU64,
    workers_alive: AtomicU64,
    corrections_total: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_flagged: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_failed: AtomicU64,
    provider_failures: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_length: u64,
    pub workers_alive: u64,
    pub corrections_total: u64,
    pub tasks_completed: u64,
    pub tasks_flagged: u64,
    pub tasks_retried: u64,
    pub tasks_failed: u64,
    pub provider_failures: BTreeMap<String, u64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queue_length(&self, length: u64) {
        self.queue_length.store(length, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers_alive.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        let _ = self
            .workers_alive
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn add_corrections(&self, count: u32) {
        self.corrections_total.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_flagged(&self) {
        self.tasks_flagged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_failed(&self, provider: &str) {
        let mut failures = self
            .provider_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *failures.entry(provider.to_string()).or_default() += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_length: self.queue_length.load(Ordering::Relaxed),
            workers_alive: self.workers_alive.load(Ordering::Relaxed),
            corrections_total: self.corrections_total.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_flagged: self.tasks_flagged.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            provider_failures: self
                .provider_failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        }
    }
}
