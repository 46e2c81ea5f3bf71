//! Provider re-ranking
//!
//! Priorities start as the configured order. With [`RankingPolicy::Adaptive`]
//! the gateway reorders providers after each dispatch by their observed
//! success rate and latency.

use std::str::FromStr;

use reportgen_core::ProviderState;

use crate::error::{PipelineError, Result};

/// How provider priorities evolve at runtime
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RankingPolicy {
    /// Keep the configured order
    #[default]
    Static,
    /// Reorder by `(1 - success_rate) + latency_weight * avg_latency_secs`, lowest first
    Adaptive {
        /// Calls a provider needs before it takes part in reordering
        min_samples: u64,
        /// Score penalty per second of average latency
        latency_weight: f64,
    },
}

impl RankingPolicy {
    pub const DEFAULT_MIN_SAMPLES: u64 = 20;
    pub const DEFAULT_LATENCY_WEIGHT: f64 = 0.02;

    pub fn adaptive() -> Self {
        Self::Adaptive {
            min_samples: Self::DEFAULT_MIN_SAMPLES,
            latency_weight: Self::DEFAULT_LATENCY_WEIGHT,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match *self {
            Self::Adaptive { latency_weight, .. }
                if !latency_weight.is_finite() || latency_weight < 0.0 =>
            {
                Err(PipelineError::Config(
                    "latency weight must be a non-negative number".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// New priorities for the providers whose position changes.
    ///
    /// Providers with too few samples keep their priority; the rest swap
    /// among the priority values they already hold.
    pub fn rerank(&self, states: &[ProviderState]) -> Vec<(String, i32)> {
        let Self::Adaptive {
            min_samples,
            latency_weight,
        } = *self
        else {
            return Vec::new();
        };

        let mut eligible: Vec<&ProviderState> = states
            .iter()
            .filter(|state| state.total_calls >= min_samples)
            .collect();
        if eligible.len() < 2 {
            return Vec::new();
        }

        let mut slots: Vec<i32> = eligible.iter().map(|state| state.priority).collect();
        slots.sort_unstable();

        let score = |state: &ProviderState| {
            let latency_secs = state.avg_latency_ms.unwrap_or(0.0) / 1000.0;
            (1.0 - state.success_rate) + latency_weight * latency_secs
        };
        eligible.sort_by(|a, b| {
            score(a)
                .total_cmp(&score(b))
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });

        eligible
            .into_iter()
            .zip(slots)
            .filter(|(state, slot)| state.priority != *slot)
            .map(|(state, slot)| (state.name.clone(), slot))
            .collect()
    }
}

impl FromStr for RankingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "adaptive" => Ok(Self::adaptive()),
            other => Err(format!(
                "unknown ranking policy '{other}' (expected static or adaptive)"
            )),
        }
    }
}
