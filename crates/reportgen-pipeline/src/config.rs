//! Configuration for the generation pipeline

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reportgen_core::{HealthPolicy, QuotaWindow};
use reportgen_sanitizer::{CorrectionStyle, SanitizerConfig};
use reportgen_store::RetryPolicy;
use reportgen_utils::{env_opt, env_or};
use url::Url;

use crate::error::{PipelineError, Result};
use crate::ranking::RankingPolicy;

/// Backend implementation behind a configured provider name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// Any OpenAI-compatible chat-completions endpoint
    OpenAI,
    /// Local process reading the prompt on stdin
    Command,
}

impl ProviderKind {
    /// Guess the kind from a provider name when none is configured.
    ///
    /// `anthropic`/`claude*` are Anthropic, a configured command line makes a
    /// command provider, and everything else is treated as OpenAI-compatible.
    pub fn infer(name: &str, has_command: bool) -> Self {
        if name == "anthropic" || name.starts_with("claude") {
            Self::Anthropic
        } else if has_command {
            Self::Command
        } else {
            Self::OpenAI
        }
    }

    /// Shared credential variable used when no per-provider key is set
    pub fn default_key_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Command => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Command => "command",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "openai-compatible" => Ok(Self::OpenAI),
            "command" | "cmd" => Ok(Self::Command),
            other => Err(format!(
                "unknown provider kind '{other}' (expected anthropic, openai or command)"
            )),
        }
    }
}

/// Settings for one named provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub name: String,
    pub kind: ProviderKind,
    /// Per-call timeout enforced by the gateway
    pub timeout: Duration,
    /// Calls allowed per window; `None` is unlimited
    pub calls_quota: Option<u32>,
    pub quota_window: QuotaWindow,
    pub model: Option<String>,
    /// Client-side requests-per-minute limit for HTTP backends
    pub requests_per_minute: Option<u32>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Command line for `ProviderKind::Command`
    pub command: Option<String>,
}

impl ProviderSettings {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout: Self::DEFAULT_TIMEOUT,
            calls_quota: None,
            quota_window: QuotaWindow::default(),
            model: None,
            requests_per_minute: None,
            api_base: None,
            api_key: None,
            command: None,
        }
    }

    /// Local command provider
    pub fn command(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        let mut settings = Self::new(name, ProviderKind::Command);
        settings.command = Some(command_line.into());
        settings
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quota(mut self, calls: u32, window: QuotaWindow) -> Self {
        self.calls_quota = Some(calls);
        self.quota_window = window;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    /// Load `REPORTGEN_<NAME>_*` settings for `name`.
    pub fn from_env(name: &str) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        let prefix = format!("REPORTGEN_{}_", name.to_ascii_uppercase().replace(['-', '.'], "_"));
        let var = |suffix: &str| format!("{prefix}{suffix}");

        let command: Option<String> = env_opt(&var("COMMAND"))?;
        let kind = match env_opt::<ProviderKind>(&var("KIND"))? {
            Some(kind) => kind,
            None => ProviderKind::infer(&name, command.is_some()),
        };
        let api_key = match env_opt::<String>(&var("API_KEY"))? {
            Some(key) => Some(key),
            None => match kind.default_key_var() {
                Some(shared) => env_opt(shared)?,
                None => None,
            },
        };

        Ok(Self {
            timeout: Duration::from_secs(env_or(
                &var("TIMEOUT_SECS"),
                Self::DEFAULT_TIMEOUT.as_secs(),
            )?),
            calls_quota: env_opt(&var("QUOTA"))?,
            quota_window: env_or(&var("QUOTA_WINDOW"), QuotaWindow::default())?,
            model: env_opt(&var("MODEL"))?,
            requests_per_minute: env_opt(&var("RPM"))?,
            api_base: env_opt(&var("API_BASE"))?,
            api_key,
            command,
            ..Self::new(name, kind)
        })
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::Config(format!("provider '{}': {msg}", self.name)));

        if self.name.is_empty() {
            return Err(PipelineError::Config("provider name must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be greater than 0".to_string());
        }
        if self.calls_quota == Some(0) {
            return invalid("quota must be greater than 0 (leave unset for unlimited)".to_string());
        }
        if self.requests_per_minute == Some(0) {
            return invalid("requests per minute must be greater than 0".to_string());
        }
        if let Some(api_base) = &self.api_base {
            if let Err(e) = Url::parse(api_base) {
                return invalid(format!("invalid api base '{api_base}': {e}"));
            }
        }
        if self.kind == ProviderKind::Command
            && self.command.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            return invalid("command providers need a command line".to_string());
        }
        Ok(())
    }
}

/// Configuration for the generation pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Corrections at or above this count flag a response
    pub flag_threshold: u32,

    /// Failed attempts before a task becomes FAILED
    pub max_retries: u32,

    /// Retry delay is `retry_base * retry_multiplier^attempts + jitter`
    pub retry_base: Duration,
    pub retry_multiplier: f64,
    pub retry_jitter: Duration,

    /// Sleep between polls that found nothing to do
    pub poll_interval: Duration,

    /// Relative tolerance for numeric fact comparisons
    pub tolerance: f64,
    pub correction_style: CorrectionStyle,

    /// Consecutive failures before DEGRADED; DOWN at twice this
    pub failure_threshold: u32,
    pub provider_cooldown: Duration,

    pub db_path: PathBuf,
    pub workers: usize,
    pub ranking: RankingPolicy,
    pub facts_cache_ttl: Duration,

    /// Providers in initial priority order
    pub providers: Vec<ProviderSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 2,
            max_retries: 3,
            retry_base: Duration::from_secs(30),
            retry_multiplier: 2.0,
            retry_jitter: Duration::from_millis(5000),
            poll_interval: Duration::from_secs(5),
            tolerance: 0.005,
            correction_style: CorrectionStyle::Substitute,
            failure_threshold: 3,
            provider_cooldown: Duration::from_secs(300), // 5 minutes
            db_path: PathBuf::from("reportgen.db"),
            workers: 1,
            ranking: RankingPolicy::Static,
            facts_cache_ttl: Duration::from_secs(300),
            providers: vec![ProviderSettings::new("anthropic", ProviderKind::Anthropic)],
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load the configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let names: String = env_or("REPORTGEN_PROVIDERS", "anthropic".to_string())?;
        let providers = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ProviderSettings::from_env)
            .collect::<Result<Vec<_>>>()?;

        let config = Self {
            flag_threshold: env_or("LLM_SANITIZER_FLAG_THRESHOLD", defaults.flag_threshold)?,
            max_retries: env_or("MAX_RETRIES", defaults.max_retries)?,
            retry_base: Duration::from_secs(env_or(
                "REPORTGEN_RETRY_BASE_SECS",
                defaults.retry_base.as_secs(),
            )?),
            retry_multiplier: env_or("REPORTGEN_RETRY_MULTIPLIER", defaults.retry_multiplier)?,
            retry_jitter: Duration::from_millis(env_or(
                "REPORTGEN_RETRY_JITTER_MS",
                defaults.retry_jitter.as_millis() as u64,
            )?),
            poll_interval: Duration::from_secs(env_or(
                "REPORTGEN_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            tolerance: env_or("REPORTGEN_SANITIZER_TOLERANCE", defaults.tolerance)?,
            correction_style: env_or("REPORTGEN_CORRECTION_STYLE", defaults.correction_style)?,
            failure_threshold: env_or("REPORTGEN_FAILURE_THRESHOLD", defaults.failure_threshold)?,
            provider_cooldown: Duration::from_secs(env_or(
                "REPORTGEN_PROVIDER_COOLDOWN_SECS",
                defaults.provider_cooldown.as_secs(),
            )?),
            db_path: env_or("REPORTGEN_DB_PATH", defaults.db_path)?,
            workers: env_or("REPORTGEN_WORKERS", defaults.workers)?,
            ranking: env_or("REPORTGEN_RANKING", defaults.ranking)?,
            facts_cache_ttl: Duration::from_secs(env_or(
                "REPORTGEN_FACTS_CACHE_SECS",
                defaults.facts_cache_ttl.as_secs(),
            )?),
            providers,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PipelineError::Config(msg.to_string()));

        if self.flag_threshold == 0 {
            return invalid("flag threshold must be greater than 0");
        }
        if self.max_retries == 0 {
            return invalid("max_retries must be greater than 0");
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return invalid("retry multiplier must be a finite number >= 1.0");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll interval must be greater than 0");
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return invalid("sanitizer tolerance must be a non-negative number");
        }
        if self.failure_threshold == 0 {
            return invalid("failure threshold must be greater than 0");
        }
        if self.workers == 0 {
            return invalid("at least one worker is required");
        }
        if self.providers.is_empty() {
            return invalid("at least one provider must be configured");
        }
        self.ranking.validate()?;

        let mut seen = BTreeSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "provider '{}' is configured twice",
                    provider.name
                )));
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base,
            multiplier: self.retry_multiplier,
            max_jitter: self.retry_jitter,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.failure_threshold,
            cooldown: chrono::Duration::from_std(self.provider_cooldown)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn sanitizer_config(&self) -> SanitizerConfig {
        SanitizerConfig {
            flag_threshold: self.flag_threshold,
            tolerance: self.tolerance,
            style: self.correction_style,
        }
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    flag_threshold: Option<u32>,
    max_retries: Option<u32>,
    retry_base: Option<Duration>,
    retry_multiplier: Option<f64>,
    retry_jitter: Option<Duration>,
    poll_interval: Option<Duration>,
    tolerance: Option<f64>,
    correction_style: Option<CorrectionStyle>,
    failure_threshold: Option<u32>,
    provider_cooldown: Option<Duration>,
    db_path: Option<PathBuf>,
    workers: Option<usize>,
    ranking: Option<RankingPolicy>,
    facts_cache_ttl: Option<Duration>,
    providers: Vec<ProviderSettings>,
}

impl PipelineConfigBuilder {
    pub fn flag_threshold(mut self, threshold: u32) -> Self {
        self.flag_threshold = Some(threshold);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set base delay and multiplier of the retry backoff
    pub fn retry_backoff(mut self, base: Duration, multiplier: f64) -> Self {
        self.retry_base = Some(base);
        self.retry_multiplier = Some(multiplier);
        self
    }

    pub fn retry_jitter(mut self, jitter: Duration) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn correction_style(mut self, style: CorrectionStyle) -> Self {
        self.correction_style = Some(style);
        self
    }

    /// Set provider failure threshold and DOWN cool-off
    pub fn provider_health(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.failure_threshold = Some(failure_threshold);
        self.provider_cooldown = Some(cooldown);
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn ranking(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = Some(ranking);
        self
    }

    pub fn facts_cache_ttl(mut self, ttl: Duration) -> Self {
        self.facts_cache_ttl = Some(ttl);
        self
    }

    /// Append a provider; order of calls is the initial priority order
    pub fn provider(mut self, provider: ProviderSettings) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let config = PipelineConfig {
            flag_threshold: self.flag_threshold.unwrap_or(defaults.flag_threshold),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_base: self.retry_base.unwrap_or(defaults.retry_base),
            retry_multiplier: self.retry_multiplier.unwrap_or(defaults.retry_multiplier),
            retry_jitter: self.retry_jitter.unwrap_or(defaults.retry_jitter),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            correction_style: self.correction_style.unwrap_or(defaults.correction_style),
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            provider_cooldown: self.provider_cooldown.unwrap_or(defaults.provider_cooldown),
            db_path: self.db_path.unwrap_or(defaults.db_path),
            workers: self.workers.unwrap_or(defaults.workers),
            ranking: self.ranking.unwrap_or(defaults.ranking),
            facts_cache_ttl: self.facts_cache_ttl.unwrap_or(defaults.facts_cache_ttl),
            providers: if self.providers.is_empty() {
                defaults.providers
            } else {
                self.providers
            },
        };

        config.validate()?;
        Ok(config)
    }
}
