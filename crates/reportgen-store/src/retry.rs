//! Retry policy: bounded attempts with exponential backoff and jitter.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// How failed tasks are re-scheduled
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after which a task becomes FAILED
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the uniform random delay added to every backoff
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_jitter: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether `attempts` failures use up the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }

    /// Deterministic part of the delay: `base * multiplier^attempts`.
    ///
    /// `attempts` is the count after the failure being scheduled, so the first
    /// retry waits `base * multiplier`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// `now + backoff(attempts) + jitter`.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = self.backoff(attempts).saturating_add(self.jitter());
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(240));
    }

    #[test]
    fn test_exhausted_at_max_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_jitter: Duration::from_millis(250),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            assert!(policy.jitter() <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_next_attempt_window() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_jitter: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        let at = policy.next_attempt_at(now, 1);
        assert!(at >= now + chrono::Duration::seconds(20));
        assert!(at <= now + chrono::Duration::seconds(21));
    }

    #[test]
    fn test_huge_backoff_saturates() {
        let policy = RetryPolicy {
            multiplier: 1e12,
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        assert!(policy.next_attempt_at(now, 30) > now);
    }
}
