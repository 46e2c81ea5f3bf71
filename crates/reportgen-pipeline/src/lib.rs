//! Generation task pipeline for reportgen
//!
//! Ties the store, providers and sanitizer together:
//!
//! - [`ProviderGateway`]: ordered failover across generation providers with
//!   persisted health, cool-off and quota bookkeeping
//! - [`Worker`] / [`WorkerGroup`]: claim → generate → sanitize → record loops
//! - [`ControlService`]: enqueue, inspection, approval, revision, rerun, pause
//! - [`PipelineConfig`]: environment-driven configuration
//!
//! ```no_run
//! use std::sync::Arc;
//! use reportgen_core::SystemClock;
//! use reportgen_pipeline::{PipelineConfig, Worker, WorkerGroup};
//! use reportgen_store::SqliteTaskStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env()?;
//! let store = Arc::new(SqliteTaskStore::open(&config.db_path)?.with_retry_policy(config.retry_policy()));
//! let worker = Worker::from_config(&config, store, Arc::new(SystemClock))?;
//! worker.gateway().register().await?;
//!
//! let group = WorkerGroup::spawn(config.workers, Arc::new(worker));
//! tokio::signal::ctrl_c().await?;
//! group.shutdown_and_join().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod marker;
pub mod metrics;
pub mod ranking;
pub mod service;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{PipelineConfig, PipelineConfigBuilder, ProviderKind, ProviderSettings};
pub use error::{AttemptOutcome, GatewayError, PipelineError, ProviderAttempt, Result};
pub use gateway::{Dispatch, GatewayProvider, ProviderGateway};
pub use marker::{DocumentMark, DocumentMarker, NoopMarker, SidecarMarker};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use ranking::RankingPolicy;
pub use service::{ControlService, Revision};
pub use worker::{Tick, Worker, WorkerGroup, WriteRetry};
