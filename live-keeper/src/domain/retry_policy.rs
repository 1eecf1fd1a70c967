//! Retry policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy applied after a capture crash.
///
/// Delays grow as `initial * multiplier^(n-1)` for the n-th consecutive crash
/// and are capped at `max_delay_ms`. Without jitter the sequence never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of respawns before the crashed kind is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first respawn, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    #[serde(default)]
    pub use_jitter: bool,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Delay before respawning after the `crash`-th consecutive crash (1-indexed).
    pub fn delay_for_crash(&self, crash: u32) -> Duration {
        let exponent = crash.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis(delay_ms + jitter)
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Whether the `crash`-th consecutive crash may still be retried.
    pub fn should_retry(&self, crash: u32) -> bool {
        crash <= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay_ms, 5_000);
        assert!(!policy.use_jitter);
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_crash(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_crash(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_crash(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_crash(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_crash(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_crash(50), Duration::from_secs(10));
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=20).map(|n| policy.delay_for_crash(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_should_retry_up_to_cap() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));

        let never = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert!(!never.should_retry(1));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            use_jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for_crash(1);
            assert!(delay >= Duration::from_millis(5_000));
            assert!(delay <= Duration::from_millis(6_250));
        }
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 2}"#).unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_delay_ms, 300_000);
    }
}
