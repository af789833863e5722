//! Backoff policy for transient pipeline failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with a failure ceiling.
///
/// `max_retries` bounds consecutive transient failures: the failure that
/// pushes the counter past it marks the channel `Failed`, so a channel gets
/// `max_retries + 1` attempts in a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);

        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        let final_delay = if self.use_jitter {
            // Add up to 25% jitter
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter
        } else {
            delay_ms
        };

        // The cap also bounds the jittered delay.
        Duration::from_millis(final_delay.min(self.max_delay_ms))
    }

    /// Check if another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_ceiling() {
        let config = RetryConfig {
            max_retries: 3,
            ..RetryConfig::default()
        };
        assert!(config.should_retry(1));
        assert!(config.should_retry(3));
        assert!(!config.should_retry(4));

        let none = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        assert!(!none.should_retry(1));
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(10000)); // Capped at max
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            use_jitter: true,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_jitter_respects_max_delay() {
        let config = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 2000,
            use_jitter: true,
            ..RetryConfig::default()
        };
        for attempt in 1..10 {
            assert!(config.delay_for_attempt(attempt) <= Duration::from_millis(2000));
        }
    }
}
