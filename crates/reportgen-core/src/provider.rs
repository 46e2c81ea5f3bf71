//! Provider health and quota bookkeeping
//!
//! A [`ProviderState`] is a persisted row, not a process-wide singleton: the
//! store loads it, applies one of the transitions below and writes it back
//! inside a single transaction, so concurrent workers never lose updates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Smoothing factor for latency and success-rate averages
const EWMA_ALPHA: f64 = 0.2;

/// Provider health as seen by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealth {
    Healthy,
    Degraded,
    Down,
}

impl ProviderHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderHealth::Healthy => "healthy",
            ProviderHealth::Degraded => "degraded",
            ProviderHealth::Down => "down",
        }
    }
}

impl fmt::Display for ProviderHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderHealth {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(ProviderHealth::Healthy),
            "degraded" => Ok(ProviderHealth::Degraded),
            "down" => Ok(ProviderHealth::Down),
            other => Err(ModelError::UnknownHealth(other.to_string())),
        }
    }
}

/// Length of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    Hourly,
    #[default]
    Daily,
}

impl QuotaWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaWindow::Hourly => "hourly",
            QuotaWindow::Daily => "daily",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            QuotaWindow::Hourly => Duration::hours(1),
            QuotaWindow::Daily => Duration::days(1),
        }
    }
}

impl fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaWindow {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(QuotaWindow::Hourly),
            "daily" | "day" => Ok(QuotaWindow::Daily),
            other => Err(ModelError::UnknownWindow(other.to_string())),
        }
    }
}

/// Thresholds for demoting a failing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// N: DEGRADED after N consecutive failures, DOWN after 2N
    pub failure_threshold: u32,
    /// How long a DOWN provider is skipped before it may be tried again
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::minutes(5),
        }
    }
}

/// Static settings a provider is registered with at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub name: String,
    /// Lower is preferred
    pub priority: i32,
    /// Calls allowed per window; `None` is unlimited
    pub calls_quota: Option<u32>,
    pub quota_window: QuotaWindow,
}

impl ProviderRegistration {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            calls_quota: None,
            quota_window: QuotaWindow::default(),
        }
    }

    pub fn with_quota(mut self, calls: u32, window: QuotaWindow) -> Self {
        self.calls_quota = Some(calls);
        self.quota_window = window;
        self
    }
}

/// Why a provider was not called during a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Marked DOWN and still cooling off
    Down { until: DateTime<Utc> },
    /// Backing off after failures without being DOWN
    CoolingOff { until: DateTime<Utc> },
    /// Rolling window quota used up
    QuotaExhausted {
        used: u32,
        quota: u32,
        resets_at: DateTime<Utc>,
    },
    /// Configured locally but has no state row
    Unregistered,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Down { until } => write!(f, "down until {until}"),
            SkipReason::CoolingOff { until } => write!(f, "cooling off until {until}"),
            SkipReason::QuotaExhausted {
                used,
                quota,
                resets_at,
            } => write!(f, "quota exhausted ({used}/{quota}, resets {resets_at})"),
            SkipReason::Unregistered => f.write_str("not registered"),
        }
    }
}

/// Result of trying to reserve one call against a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// The call was counted against the quota and may proceed
    Granted,
    Unavailable(SkipReason),
}

/// Persisted health and usage of one generation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    pub name: String,
    pub priority: i32,
    pub health: ProviderHealth,
    pub consecutive_failures: u32,
    pub calls_used: u32,
    pub calls_quota: Option<u32>,
    pub quota_window: QuotaWindow,
    pub window_started_at: DateTime<Utc>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Moving average of successful call latency
    pub avg_latency_ms: Option<f64>,
    /// Moving average of call outcomes, 1.0 = always succeeds
    pub success_rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl ProviderState {
    pub fn new(registration: &ProviderRegistration, now: DateTime<Utc>) -> Self {
        Self {
            name: registration.name.clone(),
            priority: registration.priority,
            health: ProviderHealth::Healthy,
            consecutive_failures: 0,
            calls_used: 0,
            calls_quota: registration.calls_quota,
            quota_window: registration.quota_window,
            window_started_at: now,
            backoff_until: None,
            total_calls: 0,
            total_failures: 0,
            avg_latency_ms: None,
            success_rate: 1.0,
            updated_at: now,
        }
    }

    /// Re-apply configuration to an existing row; usage counters and health survive.
    pub fn apply_registration(&mut self, registration: &ProviderRegistration, now: DateTime<Utc>) {
        self.priority = registration.priority;
        self.calls_quota = registration.calls_quota;
        self.quota_window = registration.quota_window;
        self.updated_at = now;
    }

    pub fn window_resets_at(&self) -> DateTime<Utc> {
        self.window_started_at + self.quota_window.duration()
    }

    /// Start a fresh window once the current one has elapsed.
    pub fn roll_window(&mut self, now: DateTime<Utc>) {
        if now >= self.window_resets_at() {
            self.calls_used = 0;
            self.window_started_at = now;
        }
    }

    pub fn quota_exhausted(&self) -> bool {
        self.calls_quota.is_some_and(|quota| self.calls_used >= quota)
    }

    /// Whether a call could be made at `now`, without reserving it.
    ///
    /// A DOWN provider whose cool-off has elapsed is available for a trial call.
    pub fn availability(&self, now: DateTime<Utc>) -> SlotDecision {
        if let Some(until) = self.backoff_until.filter(|until| *until > now) {
            return SlotDecision::Unavailable(if self.health == ProviderHealth::Down {
                SkipReason::Down { until }
            } else {
                SkipReason::CoolingOff { until }
            });
        }

        let resets_at = self.window_resets_at();
        match self.calls_quota {
            Some(quota) if now < resets_at && self.calls_used >= quota => {
                SlotDecision::Unavailable(SkipReason::QuotaExhausted {
                    used: self.calls_used,
                    quota,
                    resets_at,
                })
            }
            _ => SlotDecision::Granted,
        }
    }

    /// Roll the window, check availability and count the call if granted.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> SlotDecision {
        self.roll_window(now);
        let decision = self.availability(now);
        if decision == SlotDecision::Granted {
            self.calls_used += 1;
            self.total_calls += 1;
            self.updated_at = now;
        }
        decision
    }

    pub fn record_success(&mut self, latency: std::time::Duration, now: DateTime<Utc>) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.consecutive_failures = 0;
        self.health = ProviderHealth::Healthy;
        self.backoff_until = None;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => avg + EWMA_ALPHA * (latency_ms - avg),
            None => latency_ms,
        });
        self.success_rate += EWMA_ALPHA * (1.0 - self.success_rate);
        self.updated_at = now;
    }

    /// Count a failure and demote per `policy`.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &HealthPolicy) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.success_rate += EWMA_ALPHA * (0.0 - self.success_rate);

        let threshold = policy.failure_threshold.max(1);
        if self.consecutive_failures >= threshold * 2 {
            self.health = ProviderHealth::Down;
            self.backoff_until = Some(now + policy.cooldown);
        } else if self.consecutive_failures >= threshold {
            self.health = ProviderHealth::Degraded;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_failures_degrade_then_take_down() {
        let policy = HealthPolicy {
            failure_threshold: 2,
            cooldown: Duration::minutes(10),
        };
        let mut state = ProviderState::new(&ProviderRegistration::new("anthropic", 0), t0());

        state.record_failure(t0(), &policy);
        assert_eq!(state.health, ProviderHealth::Healthy);
        state.record_failure(t0(), &policy);
        assert_eq!(state.health, ProviderHealth::Degraded);
        assert_eq!(state.backoff_until, None);
        state.record_failure(t0(), &policy);
        state.record_failure(t0(), &policy);
        assert_eq!(state.health, ProviderHealth::Down);
        assert_eq!(state.backoff_until, Some(t0() + Duration::minutes(10)));

        assert_eq!(
            state.availability(t0() + Duration::minutes(9)),
            SlotDecision::Unavailable(SkipReason::Down {
                until: t0() + Duration::minutes(10)
            })
        );
        // cool-off elapsed: one trial call is allowed
        assert_eq!(state.availability(t0() + Duration::minutes(10)), SlotDecision::Granted);
    }

    #[test]
    fn test_success_resets_failures_and_health() {
        let policy = HealthPolicy::default();
        let mut state = ProviderState::new(&ProviderRegistration::new("openai", 1), t0());
        for _ in 0..6 {
            state.record_failure(t0(), &policy);
        }
        assert_eq!(state.health, ProviderHealth::Down);

        state.record_success(std::time::Duration::from_millis(800), t0());
        assert_eq!(state.health, ProviderHealth::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.backoff_until, None);
        assert_eq!(state.avg_latency_ms, Some(800.0));
        assert_eq!(state.total_failures, 6);
    }

    #[test]
    fn test_quota_exhausts_and_resets_with_window() {
        let registration =
            ProviderRegistration::new("local", 2).with_quota(2, QuotaWindow::Hourly);
        let mut state = ProviderState::new(&registration, t0());

        assert_eq!(state.try_acquire(t0()), SlotDecision::Granted);
        assert_eq!(state.try_acquire(t0()), SlotDecision::Granted);
        assert!(state.quota_exhausted());
        assert!(matches!(
            state.try_acquire(t0() + Duration::minutes(30)),
            SlotDecision::Unavailable(SkipReason::QuotaExhausted { used: 2, quota: 2, .. })
        ));
        assert_eq!(state.calls_used, 2);

        assert_eq!(state.try_acquire(t0() + Duration::hours(1)), SlotDecision::Granted);
        assert_eq!(state.calls_used, 1);
        assert_eq!(state.total_calls, 3);
    }

    #[test]
    fn test_quota_is_independent_of_health() {
        let registration =
            ProviderRegistration::new("local", 2).with_quota(1, QuotaWindow::Daily);
        let mut state = ProviderState::new(&registration, t0());
        assert_eq!(state.try_acquire(t0()), SlotDecision::Granted);
        state.record_success(std::time::Duration::from_millis(10), t0());
        assert_eq!(state.health, ProviderHealth::Healthy);
        assert!(matches!(
            state.try_acquire(t0()),
            SlotDecision::Unavailable(SkipReason::QuotaExhausted { .. })
        ));
    }

    #[test]
    fn test_registration_keeps_counters() {
        let mut state = ProviderState::new(&ProviderRegistration::new("anthropic", 0), t0());
        state.try_acquire(t0());
        state.apply_registration(
            &ProviderRegistration::new("anthropic", 3).with_quota(100, QuotaWindow::Hourly),
            t0(),
        );
        assert_eq!(state.priority, 3);
        assert_eq!(state.calls_used, 1);
        assert_eq!(state.calls_quota, Some(100));
    }
}
