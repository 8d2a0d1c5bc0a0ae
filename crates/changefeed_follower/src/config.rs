//! Configuration for the changes follower.

use crate::error::{FollowerError, FollowerResult};
use changefeed_protocol::{ChangesFilter, BATCH_SIZE, SINCE_NOW};
use std::time::Duration;

/// How a follower run terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowMode {
    /// Keep polling indefinitely as new changes arrive.
    #[default]
    Listen,
    /// Stop once the server reports nothing pending.
    Finite,
}

/// Configuration for a follower.
///
/// Created once by the caller and never mutated by the follower.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Target database.
    pub db: String,
    /// Starting position token.
    pub since: String,
    /// Maximum number of records to emit before stopping.
    pub limit: Option<u64>,
    /// Termination mode.
    pub mode: FollowMode,
    /// Server-side filter, passed through untouched.
    pub filter: ChangesFilter,
    /// Whether document bodies are requested.
    pub include_docs: bool,
    /// Per-request row limit hint.
    pub batch_size: u64,
    /// Server-side long-poll timeout used in listen mode.
    pub long_poll_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl FollowerConfig {
    /// Creates a listen-mode configuration starting from "now".
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            since: SINCE_NOW.to_string(),
            limit: None,
            mode: FollowMode::Listen,
            filter: ChangesFilter::None,
            include_docs: false,
            batch_size: BATCH_SIZE,
            long_poll_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the starting position.
    pub fn with_since(mut self, since: impl Into<String>) -> Self {
        self.since = since.into();
        self
    }

    /// Sets the maximum number of records to emit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the termination mode.
    pub fn with_mode(mut self, mode: FollowMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the server-side filter.
    pub fn with_filter(mut self, filter: ChangesFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets whether document bodies are requested.
    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    /// Sets the per-request row limit hint.
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the long-poll timeout.
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the configuration for values no run could use.
    pub fn validate(&self) -> FollowerResult<()> {
        if self.db.is_empty() {
            return Err(FollowerError::InvalidConfig("database name is empty".into()));
        }
        if self.since.is_empty() {
            return Err(FollowerError::InvalidConfig("since token is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(FollowerError::InvalidConfig(
                "batch size must be positive".into(),
            ));
        }
        self.retry.validate()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive transient failures that are retried.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Checks the backoff parameters.
    pub fn validate(&self) -> FollowerResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(FollowerError::InvalidConfig(format!(
                "backoff multiplier must be finite and at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(FollowerError::InvalidConfig(
                "initial retry delay exceeds max delay".into(),
            ));
        }
        Ok(())
    }

    /// Calculates the delay before retry number `attempt` (1-indexed).
    ///
    /// Never exceeds `max_delay` plus jitter; falls back to `max_delay` when
    /// the computed value is not a representable duration.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        let delay_secs = if self.add_jitter {
            // Up to 25% extra
            delay_secs + delay_secs * 0.25 * rand::random::<f64>()
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follower_config_defaults() {
        let config = FollowerConfig::new("orders");
        assert_eq!(config.db, "orders");
        assert_eq!(config.since, "now");
        assert_eq!(config.limit, None);
        assert_eq!(config.mode, FollowMode::Listen);
        assert_eq!(config.batch_size, BATCH_SIZE);
        assert!(!config.include_docs);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn follower_config_builder() {
        let config = FollowerConfig::new("orders")
            .with_since("42-abc")
            .with_limit(10)
            .with_mode(FollowMode::Finite)
            .with_batch_size(50)
            .with_include_docs(true)
            .with_long_poll_timeout(Duration::from_secs(5))
            .with_filter(ChangesFilter::DocIds(vec!["a".into()]));

        assert_eq!(config.since, "42-abc");
        assert_eq!(config.limit, Some(10));
        assert_eq!(config.mode, FollowMode::Finite);
        assert_eq!(config.batch_size, 50);
        assert!(config.include_docs);
        assert_eq!(config.long_poll_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(matches!(
            FollowerConfig::new("").validate(),
            Err(FollowerError::InvalidConfig(_))
        ));
        assert!(FollowerConfig::new("db").with_since("").validate().is_err());
        assert!(FollowerConfig::new("db").with_batch_size(0).validate().is_err());
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_jitter_bounds() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn validate_rejects_bad_backoff() {
        for multiplier in [-1.0, 0.5, f64::NAN, f64::INFINITY] {
            let config = FollowerConfig::new("db")
                .with_retry(RetryConfig::new(5).with_backoff_multiplier(multiplier));
            assert!(
                matches!(config.validate(), Err(FollowerError::InvalidConfig(_))),
                "multiplier {multiplier}"
            );
        }

        let inverted = RetryConfig::new(5)
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(inverted.validate().is_err());
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::no_retry().validate().is_ok());
    }

    #[test]
    fn retry_delay_never_panics() {
        let negative = RetryConfig::new(5)
            .with_backoff_multiplier(-1.0)
            .with_jitter(false);
        assert_eq!(negative.delay_for_attempt(2), Duration::ZERO);

        let huge = RetryConfig::new(5)
            .with_initial_delay(Duration::MAX)
            .with_max_delay(Duration::MAX);
        assert_eq!(huge.delay_for_attempt(3), Duration::MAX);
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }
}
