//! Error types for store operations

use reportgen_core::{Fingerprint, ModelError, TaskId, TaskStatus};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the task store
#[derive(Error, Debug)]
pub enum StoreError {
    /// A non-terminal task already carries this fingerprint
    #[error("Duplicate fingerprint {fingerprint}: already held by {existing}")]
    DuplicateFingerprint {
        fingerprint: Fingerprint,
        existing: TaskId,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Provider not registered: {0}")]
    ProviderNotFound(String),

    /// The task is not in a status the operation accepts
    #[error("Cannot {operation} {task_id}: task is {status}")]
    InvalidTransition {
        task_id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },

    /// Another connection holds the write lock; the caller should poll again
    #[error("Store is busy")]
    Contention,

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Benign races a worker should treat as "nothing claimed".
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention)
    }

    /// Failures worth retrying the same write for; rule violations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Contention | StoreError::Database(_) | StoreError::Join(_)
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Contention
            }
            _ => StoreError::Database(err),
        }
    }
}
