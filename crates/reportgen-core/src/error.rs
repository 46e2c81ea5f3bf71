//! Error types for reportgen-core

use thiserror::Error;

/// Result type alias for reportgen-core
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while decoding persisted model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Unknown task status string
    #[error("unknown task status: {0}")]
    UnknownStatus(String),

    /// Unknown provider health string
    #[error("unknown provider health: {0}")]
    UnknownHealth(String),

    /// Unknown quota window string
    #[error("unknown quota window: {0} (expected hourly or daily)")]
    UnknownWindow(String),

    /// Unknown audit kind string
    #[error("unknown audit kind: {0}")]
    UnknownAuditKind(String),
}
