//! The caller-facing change stream that drives a follower run.

use crate::classify::{classify, ErrorClass};
use crate::config::{FollowMode, FollowerConfig};
use crate::error::{FetchError, FollowerError, FollowerResult};
use crate::fetcher::{BatchFetcher, ChangesClient};
use crate::follower::{FollowerState, Shared, StopReason, StopSignal};
use crate::retry::{RetryDecision, RetryScheduler};
use crate::tracker::{BatchReceipt, FeedPosition, SequenceTracker};
use changefeed_protocol::ChangeRecord;
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one fetch cycle.
enum Cycle {
    /// Records were buffered, or an empty batch was confirmed.
    Fetched,
    /// A transient failure was waited out; fetch the same position again.
    Retry,
    /// The run ended without an error to report.
    Ended,
    /// The run failed.
    Failed(FollowerError),
}

/// An ordered, lazy sequence of change records for one follower run.
///
/// Nothing is fetched until the caller asks for a record, and the next batch
/// is fetched only after every record of the current one was taken, so at
/// most one batch is held in memory. The checkpoint moves when the last
/// record of a batch is handed out.
///
/// Dropping the stream while the run is active stops it.
pub struct ChangeStream<C: ChangesClient> {
    config: FollowerConfig,
    fetcher: BatchFetcher<C>,
    tracker: SequenceTracker,
    retry: RetryScheduler,
    shared: Arc<Shared>,
    stop: StopSignal,
    buffer: VecDeque<ChangeRecord>,
    receipt: Option<BatchReceipt>,
}

impl<C: ChangesClient> std::fmt::Debug for ChangeStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}

impl<C: ChangesClient> ChangeStream<C> {
    pub(crate) fn new(config: FollowerConfig, client: Arc<C>, shared: Arc<Shared>) -> Self {
        let stop = shared.stop_signal();
        Self {
            tracker: SequenceTracker::new(config.since.clone()),
            retry: RetryScheduler::new(config.retry.clone()),
            fetcher: BatchFetcher::new(client),
            config,
            shared,
            stop,
            buffer: VecDeque::new(),
            receipt: None,
        }
    }

    /// Returns the run's current position.
    pub fn position(&self) -> FeedPosition {
        self.tracker.current()
    }

    /// Returns the run's current state.
    pub fn state(&self) -> FollowerState {
        self.shared.state()
    }

    /// Returns the number of records fetched but not yet taken.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next change record.
    ///
    /// Yields `Some(Err(_))` exactly once if the run fails and `None` once
    /// the run has ended.
    pub async fn next(&mut self) -> Option<FollowerResult<ChangeRecord>> {
        loop {
            if !self.shared.is_running() || self.stop.is_stopped() {
                self.buffer.clear();
                return None;
            }

            if let Some(record) = self.buffer.pop_front() {
                self.shared.update_stats(|s| s.records_emitted += 1);
                if self.buffer.is_empty() {
                    self.confirm_batch();
                }
                return Some(Ok(record));
            }

            if self.tracker.position().limit_reached(self.config.limit) {
                self.end(StopReason::LimitReached);
                return None;
            }

            match self.cycle().await {
                Cycle::Fetched | Cycle::Retry => continue,
                Cycle::Ended => return None,
                Cycle::Failed(err) => return Some(Err(err)),
            }
        }
    }

    /// Skips the rest of the current batch.
    ///
    /// The skipped records count as accepted: the checkpoint moves past
    /// them. Returns the number of records skipped.
    pub fn skip_batch(&mut self) -> usize {
        let skipped = self.buffer.len();
        if skipped > 0 && self.shared.is_running() {
            self.buffer.clear();
            self.shared.update_stats(|s| s.records_emitted += skipped as u64);
            self.confirm_batch();
        }
        skipped
    }

    /// Collects every remaining record until the run ends.
    ///
    /// Only useful for runs that end on their own (finite mode or a limit).
    pub async fn collect_all(&mut self) -> FollowerResult<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record?);
        }
        Ok(records)
    }

    /// Converts into a [`Stream`] of records.
    pub fn into_stream(self) -> impl Stream<Item = FollowerResult<ChangeRecord>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }

    /// Runs one fetch and handles its outcome.
    async fn cycle(&mut self) -> Cycle {
        let position = self.tracker.current();

        let result = tokio::select! {
            biased;
            _ = self.stop.stopped() => return Cycle::Ended,
            result = self.fetcher.fetch(&position, &self.config) => result,
        };

        match result {
            Ok(mut batch) => {
                self.retry.reset();
                self.shared.update_stats(|s| s.batches_fetched += 1);

                if batch.records.is_empty() {
                    let caught_up = batch.is_caught_up();
                    let (_, receipt) = batch.into_parts();
                    self.tracker.advance(&receipt);
                    self.shared.publish_checkpoint(&receipt.end_token);

                    if caught_up && self.config.mode == FollowMode::Finite {
                        self.end(StopReason::CaughtUp);
                        return Cycle::Ended;
                    }
                    return Cycle::Fetched;
                }

                if let Some(remaining) = position.remaining(self.config.limit) {
                    let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
                    batch.truncate(remaining);
                }

                let (records, receipt) = batch.into_parts();
                self.buffer = records.into();
                self.receipt = Some(receipt);
                Cycle::Fetched
            }
            Err(err) => self.handle_failure(err).await,
        }
    }

    async fn handle_failure(&mut self, err: FetchError) -> Cycle {
        let class = classify(&err);
        self.shared.update_stats(|s| {
            s.last_error = Some(err.to_string());
            if class.is_transient() {
                s.transient_failures += 1;
            }
        });

        match self.retry.should_retry(class) {
            RetryDecision::Retry(delay) => {
                let attempt = self.retry.state().consecutive_failures;
                warn!(
                    error = %err,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    since = %self.tracker.position().since,
                    "transient changes fetch failure, retrying"
                );
                self.shared.update_stats(|s| s.retries += 1);

                if self.retry.backoff(delay, &mut self.stop).await {
                    Cycle::Retry
                } else {
                    Cycle::Ended
                }
            }
            RetryDecision::GiveUp => {
                let failure = match class {
                    ErrorClass::Terminal => FollowerError::Terminal { source: err },
                    ErrorClass::Transient => FollowerError::RetriesExhausted {
                        attempts: self.retry.state().consecutive_failures,
                        source: err,
                    },
                };
                self.fail(failure)
            }
        }
    }

    /// Confirms the batch whose last record was just handed out.
    fn confirm_batch(&mut self) {
        let Some(receipt) = self.receipt.take() else {
            return;
        };

        self.tracker.advance(&receipt);
        self.shared.publish_checkpoint(&receipt.end_token);

        if self.tracker.position().limit_reached(self.config.limit) {
            self.end(StopReason::LimitReached);
        }
    }

    fn end(&self, reason: StopReason) {
        if self.shared.finish(FollowerState::Stopped(reason)) {
            let position = self.tracker.position();
            info!(
                reason = ?reason,
                checkpoint = %position.since,
                emitted = position.emitted,
                "changes follower stopped"
            );
        }
    }

    fn fail(&self, failure: FollowerError) -> Cycle {
        let message = failure.to_string();
        if self.shared.finish(FollowerState::Errored(message.clone())) {
            error!(
                error = %message,
                checkpoint = %self.tracker.position().since,
                "changes follower failed"
            );
            Cycle::Failed(failure)
        } else {
            Cycle::Ended
        }
    }
}

impl<C: ChangesClient> Drop for ChangeStream<C> {
    fn drop(&mut self) {
        if self
            .shared
            .finish(FollowerState::Stopped(StopReason::Cancelled))
        {
            info!(
                checkpoint = %self.tracker.position().since,
                "change stream dropped, follower stopped"
            );
        }
    }
}
