//! Error types for provider calls

use std::time::Duration;
use thiserror::Error;

/// Result type for provider calls
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors a generation backend can produce
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The call did not finish within its timeout
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or process-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP error
    #[cfg(any(feature = "anthropic", feature = "openai"))]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Upstream answered with a server-side failure
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Invalid API key or authentication failed
    #[error("Invalid API key or authentication failed")]
    AuthenticationFailed,

    /// Upstream quota or rate limit hit
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Empty or unparsable body
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ProviderError {
    /// Whether retrying the same call later could succeed.
    ///
    /// Authentication, bad requests, unknown models and misconfiguration
    /// will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_)
            | ProviderError::Transport(_)
            | ProviderError::RequestFailed(_)
            | ProviderError::RateLimited(_)
            | ProviderError::MalformedResponse(_)
            | ProviderError::SerializationError(_) => true,
            #[cfg(any(feature = "anthropic", feature = "openai"))]
            ProviderError::HttpError(_) => true,
            ProviderError::AuthenticationFailed
            | ProviderError::InvalidRequest(_)
            | ProviderError::ModelNotFound(_)
            | ProviderError::ConfigurationError(_) => false,
        }
    }
}

/// Map a non-success HTTP status to an error.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn from_status(status: reqwest::StatusCode, body: String, model: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationFailed,
        429 => ProviderError::RateLimited(body),
        400 => ProviderError::InvalidRequest(body),
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ => ProviderError::RequestFailed(format!("HTTP {status}: {body}")),
    }
}

/// Normalise reqwest failures so client-side timeouts read as timeouts.
#[cfg(any(feature = "anthropic", feature = "openai"))]
pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() {
        ProviderError::Transport(err.to_string())
    } else {
        ProviderError::HttpError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::MalformedResponse("empty".into()).is_transient());
        assert!(ProviderError::RateLimited("slow down".into()).is_transient());
        assert!(!ProviderError::AuthenticationFailed.is_transient());
        assert!(!ProviderError::ModelNotFound("x".into()).is_transient());
    }
}
