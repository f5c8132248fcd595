//! Exponential backoff retry policy with jitter.
//!
//! Used from two places with different configurations: the connector's
//! reconnect path (typically unlimited attempts) and the processing
//! loop's persistence retries (bounded, escalating on exhaustion). The
//! policy is a plain value object, independent of any concurrency
//! primitives.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts. `None` = unlimited.
    pub max_retries: Option<u32>,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
    /// Add ±`jitter_fraction * backoff` jitter (0.0 = no jitter).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(5),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    /// Retry forever — an acceptable configuration for the reconnect path.
    pub fn unlimited() -> Self {
        Self {
            max_retries: None,
            ..Default::default()
        }
    }
}

/// Stateless retry policy — computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` once `attempt` exceeds the configured maximum.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);

        // Deterministic jitter spread over the golden ratio so successive
        // attempts land on different offsets without a RNG.
        let total_ms = if self.config.jitter_fraction > 0.0 {
            let phase = (attempt as f64 * 0.618_033_988_749_895) % 1.0;
            let offset = capped * self.config.jitter_fraction * (phase * 2.0 - 1.0);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Some(Duration::from_millis(total_ms as u64))
    }

    /// Returns `true` if the `attempt`-th retry is permitted.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.config.max_retries {
            None => true,
            Some(max) => attempt <= max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: Option<u32>, jitter: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: jitter,
        })
    }

    #[test]
    fn exponential_growth() {
        let p = policy(Some(3), 0.0);
        assert_eq!(p.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(p.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(p.next_delay(3).unwrap().as_millis(), 400);
        assert!(p.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let p = RetryPolicy::new(RetryConfig {
            max_retries: Some(20),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
        });
        assert!(p.next_delay(10).unwrap() <= Duration::from_millis(500));
    }

    #[test]
    fn unlimited_always_retries() {
        let p = policy(None, 0.0);
        assert!(p.should_retry(1_000_000));
        assert!(p.next_delay(1_000_000).is_some());
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let p = policy(Some(50), 0.25);
        for attempt in 1..=10 {
            let jittered = p.next_delay(attempt).unwrap().as_millis() as f64;
            let base = (100.0 * 2.0f64.powi(attempt as i32 - 1)).min(10_000.0);
            assert!(jittered >= base * 0.75 - 1.0, "attempt {attempt}: {jittered} < lower bound");
            assert!(jittered <= base * 1.25 + 1.0, "attempt {attempt}: {jittered} > upper bound");
        }
    }

    #[test]
    fn should_retry_boundary() {
        let p = policy(Some(2), 0.0);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }
}
