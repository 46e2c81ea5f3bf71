//! OpenAI-compatible chat-completions backend
//!
//! Works against api.openai.com as well as local servers that speak the same
//! protocol (LM Studio, Ollama, vLLM, llama.cpp).
//! See: https://platform.openai.com/docs/api-reference/chat

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::limiter::{self, SharedRateLimiter};
use crate::error::{from_reqwest, from_status};
use crate::{Generation, GenerationProvider, ProviderError, Result};

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for an OpenAI-compatible backend
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key; local servers usually accept any value
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub requests_per_minute: Option<u32>,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            requests_per_minute: None,
        }
    }

    /// Read `OPENAI_API_KEY` and, if set, `OPENAI_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::ConfigurationError(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_OPENAI_API_BASE.to_string());
        Ok(Self::new(api_key).with_api_base(api_base))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: Option<u32>) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    name: String,
    client: Client,
    config: OpenAIConfig,
    rate_limiter: Option<SharedRateLimiter>,
}

impl OpenAIProvider {
    pub fn with_config(name: impl Into<String>, config: OpenAIConfig) -> Result<Self> {
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
        Self::with_config("openai", OpenAIConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationProvider for OpenAIProvider {
    #[instrument(skip(self, prompt), fields(provider = %self.name, model = %self.config.model, api_base = %self.config.api_base))]
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Generation> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let request = OpenAIRequest {
            model: &self.config.model,
            messages: vec![OpenAIMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending request to OpenAI-compatible API");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.map_err(|e| from_reqwest(e, timeout))?;
            return Err(from_status(status, body, &self.config.model));
        }

        let parsed: OpenAIResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;
        into_generation(parsed, &self.config.model)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn into_generation(parsed: OpenAIResponse, requested_model: &str) -> Result<Generation> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".to_string()))?;

    debug!(
        finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
        "Received response"
    );

    let mut generation = Generation::new(choice.message.content.unwrap_or_default())
        .with_model(parsed.model.unwrap_or_else(|| requested_model.to_string()));
    if let Some(usage) = parsed.usage {
        generation = generation.with_usage(usage.prompt_tokens, usage.completion_tokens);
    }
    Ok(generation)
}

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let config = OpenAIConfig::new("k").with_api_base("http://localhost:1234/v1/");
        assert_eq!(config.api_base, "http://localhost:1234/v1");
    }

    #[test]
    fn test_first_choice_becomes_generation() {
        let body = r#"{
            "model": "local-model",
            "choices": [{"message": {"role": "assistant", "content": "RSI is 61.2"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 4, "total_tokens": 11}
        }"#;
        let parsed: OpenAIResponse = serde_json::from_str(body).unwrap();
        let generation = into_generation(parsed, "requested").unwrap();
        assert_eq!(generation.text, "RSI is 61.2");
        assert_eq!(generation.model.as_deref(), Some("local-model"));
        assert_eq!(generation.usage.map(|u| u.total()), Some(11));
    }

    #[test]
    fn test_no_choices_is_malformed() {
        let parsed: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = into_generation(parsed, "m").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn test_provider_name_is_configurable() {
        let provider =
            OpenAIProvider::with_config("lmstudio", OpenAIConfig::new("not-needed")).unwrap();
        assert_eq!(provider.name(), "lmstudio");
    }
}
