//! Exponential backoff between delivery attempts.

use crate::config::RetryConfig;
use std::time::Duration;

/// Bounded exponential backoff without jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Cap for a single delay
    pub max_delay: Duration,
    /// Total attempts, first included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with an uncapped delay.
    pub fn new(initial_delay: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay: Duration::MAX,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after failed attempt `attempt` (1-based) before the next one.
    ///
    /// `min(max_delay, initial_delay * multiplier^(attempt - 1))`. Never
    /// decreases as `attempt` grows.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_nanos = (self.initial_delay.as_nanos() as f64 * factor).round();

        if !delay_nanos.is_finite() || delay_nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        // Saturates at u64::MAX nanoseconds.
        Duration::from_nanos(delay_nanos as u64).min(self.max_delay)
    }

    /// Whether another attempt follows attempt `attempt`.
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_attempts, 3);

        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 3.0, 10)
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(300));
        assert_eq!(policy.delay_after(3), Duration::from_millis(500));
        assert_eq!(policy.delay_after(60), Duration::from_millis(500));
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy::new(Duration::from_millis(7), 1.5, 64)
            .with_max_delay(Duration::from_secs(30));
        let delays: Vec<_> = (1..64).map(|k| policy.delay_after(k)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_uncapped_overflow_saturates() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 10.0, 400);
        assert_eq!(policy.delay_after(400), Duration::MAX);
    }

    #[test]
    fn test_attempt_bound() {
        let policy = RetryPolicy::new(Duration::from_millis(1), 2.0, 3);
        assert!(policy.has_attempt_after(1));
        assert!(policy.has_attempt_after(2));
        assert!(!policy.has_attempt_after(3));

        let single = RetryPolicy::new(Duration::from_millis(1), 2.0, 0);
        assert_eq!(single.max_attempts, 1);
        assert!(!single.has_attempt_after(1));
    }
}
