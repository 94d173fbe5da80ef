//! Reconnection Policy
//!
//! Bounded exponential backoff for the quote stream. The delay for a
//! scheduled reconnect is `min(initial * multiplier^attempts, max)`, where
//! `attempts` counts timers that have already fired since the last
//! successful open. Scheduling does not advance the counter; only a fired
//! timer does.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
            max_attempts,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter_factor,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing exponential backoff.
///
/// # Example
///
/// ```rust
/// use quote_stream_client::infrastructure::realtime::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // Nothing has fired yet: first delay is the base delay
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
///
/// // The timer fires
/// policy.record_attempt();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Transport opened
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay to schedule for the next reconnect.
    ///
    /// Returns `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        Some(self.apply_jitter(self.base_delay(self.attempt_count)))
    }

    /// Backoff delay for a given attempt count, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let max_millis = self.config.max_delay.as_millis();
        #[allow(clippy::cast_precision_loss)]
        let initial_millis = self.config.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let scaled = (initial_millis * self.config.multiplier.powi(exponent)).round();

        let millis = if scaled.is_finite() && scaled >= 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled as u128).min(max_millis)
            }
        } else {
            max_millis
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Record that a scheduled reconnect fired. Returns the new count.
    pub const fn record_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt budget (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor: 0.0,
            max_attempts,
            ..Default::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn policy_exponential_backoff() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let mut delays = Vec::new();

        while let Some(delay) = policy.next_delay() {
            delays.push(delay.as_millis());
            policy.record_attempt();
        }

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn scheduling_does_not_advance_counter() {
        let policy = ReconnectPolicy::new(ReconnectConfig::default());
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn policy_max_delay_cap() {
        let policy = ReconnectPolicy::new(no_jitter(0));
        assert_eq!(policy.base_delay(4), Duration::from_secs(16));
        assert_eq!(policy.base_delay(5), Duration::from_secs(30));
        assert_eq!(policy.base_delay(40), Duration::from_secs(30));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));

        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.record_attempt(), expected);
        }

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(3));
        policy.record_attempt();
        policy.record_attempt();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..Default::default()
            });

            let millis = policy.next_delay().unwrap().as_millis();

            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
            policy.record_attempt();
        }
    }

    #[test]
    fn max_attempts_error_message() {
        assert_eq!(
            ReconnectError::MaxAttemptsExceeded(5).to_string(),
            "maximum reconnection attempts (5) exceeded"
        );
    }

    proptest! {
        #[test]
        fn delay_is_capped_doubling(attempts in 0u32..64) {
            let policy = ReconnectPolicy::new(no_jitter(0));
            let expected = 1000u64
                .checked_mul(1u64 << attempts.min(40))
                .map_or(30_000, |ms| ms.min(30_000));
            prop_assert_eq!(policy.base_delay(attempts), Duration::from_millis(expected));
        }

        #[test]
        fn delay_never_decreases(attempts in 0u32..63) {
            let policy = ReconnectPolicy::new(no_jitter(0));
            prop_assert!(policy.base_delay(attempts) <= policy.base_delay(attempts + 1));
        }
    }
}
