//! Generation provider trait definition

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{Generation, ProviderError, Result};

/// A backend that turns a prompt into text
///
/// Implementations should respect `timeout` themselves where the transport
/// allows it; [`generate_bounded`] enforces it regardless.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate text for `prompt`
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Generation>;

    /// Provider name used in logs, provider state and `provider_used`
    fn name(&self) -> &str;
}

/// Call `provider` under a hard timeout and reject blank output.
#[instrument(skip(provider, prompt), fields(provider = provider.name(), prompt_len = prompt.len()))]
pub async fn generate_bounded(
    provider: &dyn GenerationProvider,
    prompt: &str,
    timeout: Duration,
) -> Result<Generation> {
    let generation = tokio::time::timeout(timeout, provider.generate(prompt, timeout))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

    if generation.is_blank() {
        return Err(ProviderError::MalformedResponse(
            "provider returned empty output".to_string(),
        ));
    }

    debug!(chars = generation.text.len(), "generation received");
    Ok(generation)
}
