//! Retry scheduling for transient fetch failures.

use crate::classify::ErrorClass;
use crate::config::RetryConfig;
use crate::follower::StopSignal;
use std::time::Duration;

/// Mutable retry bookkeeping of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Transient failures since the last successful fetch.
    pub consecutive_failures: u32,
    /// Delay chosen for the most recent retry.
    pub next_delay: Duration,
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then fetch the same position again.
    Retry(Duration),
    /// Stop retrying.
    GiveUp,
}

/// Exponential backoff with a budget of consecutive transient failures.
///
/// The budget bounds runs of bad luck, not lifetime failures: every
/// successful fetch resets it.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
    state: RetryState,
}

impl RetryScheduler {
    /// Creates a scheduler with a fresh state.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: RetryState::default(),
        }
    }

    /// Returns the current retry state.
    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Records a failure and decides whether to retry.
    ///
    /// Terminal failures always give up, regardless of the budget.
    pub fn should_retry(&mut self, class: ErrorClass) -> RetryDecision {
        if class == ErrorClass::Terminal {
            return RetryDecision::GiveUp;
        }

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        if self.state.consecutive_failures > self.config.max_retries {
            return RetryDecision::GiveUp;
        }

        let delay = self
            .config
            .delay_for_attempt(self.state.consecutive_failures);
        self.state.next_delay = delay;
        RetryDecision::Retry(delay)
    }

    /// Resets the state after a successful fetch.
    pub fn reset(&mut self) {
        self.state = RetryState::default();
    }

    /// Suspends for `delay`. Returns false if the run was stopped first.
    pub(crate) async fn backoff(&self, delay: Duration, stop: &mut StopSignal) -> bool {
        tokio::select! {
            biased;
            _ = stop.stopped() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
