//! Error types for the sanitizer

use std::path::PathBuf;
use thiserror::Error;

/// Result type for sanitizer operations
pub type Result<T> = std::result::Result<T, SanitizerError>;

/// Errors raised while loading canonical facts
///
/// Sanitizing itself never fails; only obtaining the facts can.
#[derive(Error, Debug)]
pub enum SanitizerError {
    #[error("Failed to read fact sheet {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fact sheet: {0}")]
    InvalidFacts(String),

    #[error("Invalid JSON in fact sheet: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to build claim pattern: {0}")]
    Pattern(#[from] regex::Error),
}
