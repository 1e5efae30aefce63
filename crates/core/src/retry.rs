//! Backoff policy shared by job-level retries and external-call retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included.
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Upper bound for any single delay, hints included.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0): computed delays are spread by up to this fraction
    /// either way, retry-after hints only upwards.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after failed attempt `attempt` (1-indexed), before jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                base_ms * exp
            }
            BackoffStrategy::Linear => base_ms * (attempt as f64),
        };

        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Jittered delay for attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.base_delay_for_attempt(attempt))
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), but a server-provided
    /// retry-after hint replaces the computed delay. Jitter only lengthens a hint,
    /// and the result never exceeds `max_delay`.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => {
                let hint = hint.min(self.max_delay);
                let spread = hint.as_millis() as f64 * self.jitter * unit_random();
                (hint + Duration::from_millis(spread as u64)).min(self.max_delay)
            }
            None => self.delay_for_attempt(attempt),
        }
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as f64;
        let jitter_range = delay_ms * self.jitter;
        if jitter_range <= 0.0 {
            return delay;
        }
        let offset = jitter_range * (unit_random() * 2.0 - 1.0);
        Duration::from_millis((delay_ms + offset).max(0.0) as u64)
    }
}

/// Uniform sample in `[0, 1)` from the random bits of a v4 UUID.
fn unit_random() -> f64 {
    // The low 53 bits of a v4 UUID are all random (version and variant live higher up).
    let bits = Uuid::new_v4().as_u128() & ((1u128 << 53) - 1);
    bits as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(50, Duration::from_millis(500), Duration::from_secs(2))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_hint_overrides_computed_delay() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
        assert_eq!(policy.delay_with_hint(2, None), Duration::from_millis(200));
    }

    #[test]
    fn should_retry_counts_total_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(1))
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn jitter_never_retries_before_the_hint() {
        let policy = RetryPolicy::default();
        let hint = Duration::from_secs(5);
        for _ in 0..500 {
            let delay = policy.delay_with_hint(1, Some(hint));
            assert!(delay >= hint, "{delay:?} is earlier than the {hint:?} hint");
            assert!(delay <= policy.max_delay);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, ..ProptestConfig::default() })]

        #[test]
        fn hinted_delay_stays_between_hint_and_cap(hint_ms in 0u64..20_000, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy::default().with_jitter(jitter);
            let hint = Duration::from_millis(hint_ms);
            let delay = policy.delay_with_hint(3, Some(hint));
            prop_assert!(delay >= hint.min(policy.max_delay));
            prop_assert!(delay <= policy.max_delay);
        }

        #[test]
        fn jitter_stays_within_its_band(attempt in 1u32..12, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy::exponential(20, Duration::from_millis(50), Duration::from_secs(5))
                .with_jitter(jitter);
            let base = policy.base_delay_for_attempt(attempt).as_millis() as f64;
            let delay = policy.delay_for_attempt(attempt).as_millis() as f64;
            let band = base * jitter + 1.0;
            prop_assert!(delay >= base - band && delay <= base + band);
        }
    }
}
