//! Provider gateway: ordered failover with health and quota bookkeeping
//!
//! Provider state lives in the [`TaskStore`], so every worker process sees
//! the same health, cool-offs and quota counters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reportgen_core::{
    Clock, HealthPolicy, ProviderHealth, ProviderRegistration, ProviderState, QuotaWindow,
    SlotDecision,
};
use reportgen_llm::providers::CommandProvider;
use reportgen_llm::{Generation, GenerationProvider, generate_bounded};
use reportgen_store::TaskStore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PipelineConfig, ProviderKind, ProviderSettings};
use crate::error::{AttemptOutcome, GatewayError, PipelineError, ProviderAttempt};
use crate::metrics::PipelineMetrics;
use crate::ranking::RankingPolicy;

/// A backend plus the limits the gateway applies to it
pub struct GatewayProvider {
    provider: Arc<dyn GenerationProvider>,
    timeout: Duration,
    calls_quota: Option<u32>,
    quota_window: QuotaWindow,
}

impl GatewayProvider {
    pub fn new(provider: Arc<dyn GenerationProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            calls_quota: None,
            quota_window: QuotaWindow::default(),
        }
    }

    pub fn with_quota(mut self, calls: u32, window: QuotaWindow) -> Self {
        self.calls_quota = Some(calls);
        self.quota_window = window;
        self
    }

    /// Build the backend described by `settings`.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, PipelineError> {
        let provider = build_backend(settings)?;
        let gateway_provider = Self::new(provider, settings.timeout);
        Ok(match settings.calls_quota {
            Some(calls) => gateway_provider.with_quota(calls, settings.quota_window),
            None => gateway_provider,
        })
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn registration(&self, priority: i32) -> ProviderRegistration {
        let registration = ProviderRegistration::new(self.name(), priority);
        match self.calls_quota {
            Some(calls) => registration.with_quota(calls, self.quota_window),
            None => registration,
        }
    }
}

#[cfg(any(feature = "anthropic", feature = "openai"))]
fn missing_key(settings: &ProviderSettings) -> PipelineError {
    let shared = settings
        .kind
        .default_key_var()
        .map(|var| format!(" or {var}"))
        .unwrap_or_default();
    PipelineError::Config(format!(
        "provider '{}': no API key (set REPORTGEN_{}_API_KEY{shared})",
        settings.name,
        settings.name.to_ascii_uppercase().replace(['-', '.'], "_"),
    ))
}

fn build_backend(settings: &ProviderSettings) -> Result<Arc<dyn GenerationProvider>, PipelineError> {
    match settings.kind {
        ProviderKind::Command => {
            let command_line = settings.command.as_deref().unwrap_or_default();
            Ok(Arc::new(CommandProvider::from_command_line(
                settings.name.clone(),
                command_line,
            )?))
        }
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => {
            use reportgen_llm::providers::{AnthropicConfig, AnthropicProvider};

            let api_key = settings.api_key.clone().ok_or_else(|| missing_key(settings))?;
            let mut config = AnthropicConfig::new(api_key)
                .with_requests_per_minute(settings.requests_per_minute);
            if let Some(model) = &settings.model {
                config = config.with_model(model.clone());
            }
            if let Some(api_base) = &settings.api_base {
                config = config.with_api_base(api_base.clone());
            }
            Ok(Arc::new(AnthropicProvider::with_config(settings.name.clone(), config)?))
        }
        #[cfg(feature = "openai")]
        ProviderKind::OpenAI => {
            use reportgen_llm::providers::{OpenAIConfig, OpenAIProvider};

            // Local OpenAI-compatible servers ignore the key
            let api_key = match (&settings.api_key, &settings.api_base) {
                (Some(key), _) => key.clone(),
                (None, Some(_)) => String::new(),
                (None, None) => return Err(missing_key(settings)),
            };
            let mut config = OpenAIConfig::new(api_key)
                .with_requests_per_minute(settings.requests_per_minute);
            if let Some(model) = &settings.model {
                config = config.with_model(model.clone());
            }
            if let Some(api_base) = &settings.api_base {
                config = config.with_api_base(api_base.clone());
            }
            Ok(Arc::new(OpenAIProvider::with_config(settings.name.clone(), config)?))
        }
        #[allow(unreachable_patterns)]
        kind => Err(PipelineError::Config(format!(
            "provider '{}': {kind} support is not compiled in",
            settings.name
        ))),
    }
}

/// A successful dispatch
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Name of the provider that answered
    pub provider: String,
    pub generation: Generation,
    pub latency: Duration,
    /// Providers skipped or failed before the one that answered
    pub attempts: Vec<ProviderAttempt>,
}

/// Routes prompts to the highest-priority available provider
pub struct ProviderGateway {
    providers: Vec<GatewayProvider>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    health: HealthPolicy,
    ranking: RankingPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl ProviderGateway {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        providers: Vec<GatewayProvider>,
    ) -> Self {
        Self {
            providers,
            store,
            clock,
            health: HealthPolicy::default(),
            ranking: RankingPolicy::Static,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build every configured backend.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let providers = config
            .providers
            .iter()
            .map(GatewayProvider::from_settings)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(store, clock, providers)
            .with_health_policy(config.health_policy())
            .with_ranking(config.ranking))
    }

    pub fn with_health_policy(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(GatewayProvider::name)
    }

    /// Upsert a state row for every provider, in configured priority order.
    pub async fn register(&self) -> Result<Vec<ProviderState>, GatewayError> {
        let now = self.clock.now();
        let mut states = Vec::with_capacity(self.providers.len());
        for (priority, provider) in self.providers.iter().enumerate() {
            let registration = provider.registration(priority as i32);
            let state = self.store.register_provider(&registration, now).await?;
            debug!(provider = %state.name, priority = state.priority, health = %state.health, "provider registered");
            states.push(state);
        }
        Ok(states)
    }

    /// Providers by persisted priority; unregistered ones go last.
    async fn ordered(&self) -> Result<Vec<&GatewayProvider>, GatewayError> {
        let states = self.store.provider_states().await?;
        let priority_of = |name: &str| {
            states
                .iter()
                .find(|state| state.name == name)
                .map_or(i32::MAX, |state| state.priority)
        };
        let mut ordered: Vec<&GatewayProvider> = self.providers.iter().collect();
        ordered.sort_by_key(|provider| priority_of(provider.name()));
        Ok(ordered)
    }

    /// Generate text with the first provider that is available and answers.
    ///
    /// Each provider is tried at most once. Skips and failures are collected
    /// into [`GatewayError::AllProvidersExhausted`] when nothing answers.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn dispatch(&self, prompt: &str) -> Result<Dispatch, GatewayError> {
        if self.providers.is_empty() {
            return Err(GatewayError::NoProviders);
        }

        let mut attempts = Vec::new();
        for candidate in self.ordered().await? {
            let name = candidate.name();

            if let SlotDecision::Unavailable(reason) =
                self.store.acquire_provider_slot(name, self.clock.now()).await?
            {
                debug!(provider = name, %reason, "provider skipped");
                attempts.push(ProviderAttempt {
                    provider: name.to_string(),
                    outcome: AttemptOutcome::Skipped { reason },
                });
                continue;
            }

            let started = Instant::now();
            match generate_bounded(candidate.provider.as_ref(), prompt, candidate.timeout).await {
                Ok(generation) => {
                    let latency = started.elapsed();
                    self.store
                        .record_provider_success(name, latency, self.clock.now())
                        .await?;
                    info!(provider = name, latency_ms = latency.as_millis() as u64, "generation succeeded");
                    self.rerank().await;
                    return Ok(Dispatch {
                        provider: name.to_string(),
                        generation,
                        latency,
                        attempts,
                    });
                }
                Err(e) => {
                    let transient = e.is_transient();
                    if transient {
                        warn!(provider = name, error = %e, "provider call failed");
                    } else {
                        error!(provider = name, error = %e, "provider call failed permanently");
                    }

                    let state = self
                        .store
                        .record_provider_failure(name, &self.health, self.clock.now())
                        .await?;
                    if state.health != ProviderHealth::Healthy {
                        warn!(
                            provider = name,
                            health = %state.health,
                            consecutive_failures = state.consecutive_failures,
                            "provider demoted"
                        );
                    }
                    self.metrics.provider_failed(name);
                    attempts.push(ProviderAttempt {
                        provider: name.to_string(),
                        outcome: AttemptOutcome::Failed {
                            error: e.to_string(),
                            transient,
                        },
                    });
                }
            }
        }

        self.rerank().await;
        Err(GatewayError::AllProvidersExhausted { attempts })
    }

    /// Apply the ranking policy; failures here never fail the dispatch.
    async fn rerank(&self) {
        if self.ranking == RankingPolicy::Static {
            return;
        }
        let states = match self.store.provider_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "could not load provider states for re-ranking");
                return;
            }
        };
        for (name, priority) in self.ranking.rerank(&states) {
            match self
                .store
                .set_provider_priority(&name, priority, self.clock.now())
                .await
            {
                Ok(_) => info!(provider = %name, priority, "provider re-ranked"),
                Err(e) => warn!(provider = %name, error = %e, "failed to re-rank provider"),
            }
        }
    }
}
