//! Reconnection Policy
//!
//! Delay schedule between reconnect attempts. The default is a fixed
//! interval; a multiplier above 1.0 turns it into capped exponential
//! backoff, and a jitter factor spreads attempts from many clients.

use std::time::Duration;

use rand::Rng;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt (the only delay when fixed).
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt; 1.0 keeps the interval fixed.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = +/-10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectConfig {
    /// Fixed-interval schedule without jitter.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Exponential schedule capped at `max_delay`.
    #[must_use]
    pub const fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Set the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Set the attempt limit (0 = unlimited).
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check if the delay never grows.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.multiplier <= 1.0
    }
}

/// Tracks consecutive attempts and hands out delays.
///
/// ```rust
/// use price_stream_client::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay for the next attempt, or `None` once the attempt limit is hit.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let base = self.base_delay(self.attempt_count);
        self.attempt_count += 1;
        Some(self.apply_jitter(base))
    }

    /// Reset after a successful handshake.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consecutive attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.initial_delay;
        let cap = self.config.max_delay.max(initial);

        if self.config.is_fixed() {
            return initial;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let millis = initial.as_millis() as f64 * factor;
        #[allow(clippy::cast_precision_loss)]
        let cap_millis = cap.as_millis() as f64;

        if !millis.is_finite() || millis >= cap_millis {
            return cap;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = millis.round() as u64;
        Duration::from_millis(rounded)
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let range = base_millis * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + offset).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fixed_five_seconds() {
        let config = ReconnectConfig::default();
        assert!(config.is_fixed());
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 0);

        let mut policy = ReconnectPolicy::new(config);
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn exponential_grows_until_cap() {
        let config = ReconnectConfig::exponential(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        );
        let mut policy = ReconnectPolicy::new(config);

        let delays: Vec<u128> = (0..5)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn cap_below_initial_keeps_initial() {
        let config = ReconnectConfig::exponential(
            Duration::from_millis(1000),
            Duration::from_millis(10),
            3.0,
        );
        let mut policy = ReconnectPolicy::new(config);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn attempt_limit_stops_retries() {
        let config = ReconnectConfig::fixed(Duration::from_millis(10)).with_max_attempts(2);
        let mut policy = ReconnectPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert!(policy.should_retry());
        assert!(policy.next_delay().is_some());
    }

    #[test]
    fn reset_restarts_schedule() {
        let config =
            ReconnectConfig::exponential(Duration::from_millis(50), Duration::from_secs(10), 2.0);
        let mut policy = ReconnectPolicy::new(config);

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = ReconnectConfig::fixed(Duration::from_millis(1000)).with_jitter(0.1);

        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(config.clone());
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let config = ReconnectConfig::exponential(Duration::from_secs(1), Duration::from_secs(60), 10.0);
        let mut policy = ReconnectPolicy::new(config);
        for _ in 0..1000 {
            assert!(policy.next_delay().unwrap() <= Duration::from_secs(60));
        }
    }
}
