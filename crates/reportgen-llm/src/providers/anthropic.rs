//! Anthropic Claude backend
//!
//! Sends the prompt as a single user message to the Messages API.
//! See: https://docs.anthropic.com/en/api/messages

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::limiter::{self, SharedRateLimiter};
use crate::error::{from_reqwest, from_status};
use crate::{Generation, GenerationProvider, ProviderError, Result};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_MAX_TOKENS: usize = 4096;

/// Configuration for the Anthropic backend
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: usize,
    /// Client-side requests per minute; `None` disables pacing
    pub requests_per_minute: Option<u32>,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: ANTHROPIC_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            requests_per_minute: None,
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ProviderError::ConfigurationError(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::new(api_key))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: Option<u32>) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

/// Anthropic Claude provider
pub struct AnthropicProvider {
    name: String,
    client: Client,
    config: AnthropicConfig,
    rate_limiter: Option<SharedRateLimiter>,
}

impl AnthropicProvider {
    pub fn with_config(name: impl Into<String>, config: AnthropicConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::ConfigurationError(
                "Anthropic API key is empty".to_string(),
            ));
        }
        let client = Client::builder().build()?;
        let rate_limiter = limiter::per_minute(config.requests_per_minute);
        Ok(Self {
            name: name.into(),
            client,
            config,
            rate_limiter,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::with_config("anthropic", AnthropicConfig::from_env()?)
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    #[instrument(skip(self, prompt), fields(provider = %self.name, model = %self.config.model))]
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Generation> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let request = AnthropicRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Sending request to Anthropic API");
        let response = self
            .client
            .post(format!("{}/messages", self.config.api_base))
            .timeout(timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.map_err(|e| from_reqwest(e, timeout))?;
            return Err(from_status(status, body, &self.config.model));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;

        let text = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        debug!(
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Received response"
        );

        Ok(Generation::new(text)
            .with_model(parsed.model.unwrap_or_else(|| self.config.model.clone()))
            .with_usage(parsed.usage.input_tokens, parsed.usage.output_tokens))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: UsageResponse,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    input_tokens: usize,
    output_tokens: usize,
}
