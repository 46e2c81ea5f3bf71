//! Error types for the pipeline

use std::fmt::Write as _;
use std::path::PathBuf;

use reportgen_core::{SkipReason, TaskId};
use reportgen_llm::ProviderError;
use reportgen_sanitizer::SanitizerError;
use reportgen_store::StoreError;
use reportgen_utils::EnvError;
use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// What happened to one provider during a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Not called: down, cooling off, over quota or unregistered
    Skipped { reason: SkipReason },
    /// Called and failed
    Failed { error: String, transient: bool },
}

/// One provider's part in a failed dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

fn summarize(attempts: &[ProviderAttempt]) -> String {
    let mut out = String::new();
    for (i, attempt) in attempts.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        let _ = match &attempt.outcome {
            AttemptOutcome::Skipped { reason } => write!(out, "{} skipped ({reason})", attempt.provider),
            AttemptOutcome::Failed { error, .. } => write!(out, "{} failed ({error})", attempt.provider),
        };
    }
    out
}

/// Errors from the provider gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Every provider was skipped or failed
    #[error("All providers exhausted: {}", summarize(.attempts))]
    AllProvidersExhausted { attempts: Vec<ProviderAttempt> },

    #[error("No providers configured")]
    NoProviders,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Sanitizer(#[from] SanitizerError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The latest sanitizer pass still shows corrections
    #[error("Approval of {task_id} blocked: {corrections} unresolved correction(s)")]
    ApprovalBlocked { task_id: TaskId, corrections: u32 },

    #[error("Failed to write document marker {path}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
