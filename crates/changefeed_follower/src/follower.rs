//! Follower state machine and caller-facing handle.

use crate::config::FollowerConfig;
use crate::emitter::ChangeStream;
use crate::error::{FollowerError, FollowerResult};
use crate::fetcher::ChangesClient;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Finite mode reached the end of the feed.
    CaughtUp,
    /// The configured record limit was emitted.
    LimitReached,
    /// The caller stopped the run or dropped its stream.
    Cancelled,
}

/// The lifecycle state of a follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowerState {
    /// Constructed but not started.
    Idle,
    /// Fetching and emitting changes.
    Running,
    /// Completed normally.
    Stopped(StopReason),
    /// Failed; carries the message of the error that ended the run.
    Errored(String),
}

impl FollowerState {
    /// Returns true while the run is active.
    pub fn is_running(&self) -> bool {
        matches!(self, FollowerState::Running)
    }

    /// Returns true once the run has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FollowerState::Stopped(_) | FollowerState::Errored(_))
    }
}

impl fmt::Display for FollowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowerState::Idle => write!(f, "idle"),
            FollowerState::Running => write!(f, "running"),
            FollowerState::Stopped(reason) => write!(f, "stopped ({reason:?})"),
            FollowerState::Errored(message) => write!(f, "errored ({message})"),
        }
    }
}

/// Statistics about a follower run.
#[derive(Debug, Clone, Default)]
pub struct FollowerStats {
    /// Successful fetches.
    pub batches_fetched: u64,
    /// Records handed to the caller.
    pub records_emitted: u64,
    /// Transient failures observed.
    pub transient_failures: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// When the run started.
    pub started_at: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// State shared between a follower handle and its running stream.
pub(crate) struct Shared {
    state: RwLock<FollowerState>,
    stats: RwLock<FollowerStats>,
    checkpoint: RwLock<String>,
    stop_tx: watch::Sender<bool>,
}

impl Shared {
    fn new(since: &str) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(FollowerState::Idle),
            stats: RwLock::new(FollowerStats::default()),
            checkpoint: RwLock::new(since.to_string()),
            stop_tx,
        }
    }

    pub(crate) fn state(&self) -> FollowerState {
        self.state.read().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.read().is_running()
    }

    /// Idle → Running.
    fn begin(&self) -> FollowerResult<()> {
        let mut state = self.state.write();
        if *state != FollowerState::Idle {
            return Err(FollowerError::AlreadyStarted {
                state: state.to_string(),
            });
        }
        *state = FollowerState::Running;
        self.stats.write().started_at = Some(Instant::now());
        Ok(())
    }

    /// Running → `next`. Returns false if the run had already ended.
    pub(crate) fn finish(&self, next: FollowerState) -> bool {
        let mut state = self.state.write();
        if !state.is_running() {
            return false;
        }
        *state = next;
        true
    }

    /// Caller-requested stop. Only the first call of a run transitions.
    fn request_stop(&self) -> bool {
        if !self.finish(FollowerState::Stopped(StopReason::Cancelled)) {
            return false;
        }
        self.stop_tx.send_replace(true);
        info!(
            checkpoint = %self.checkpoint(),
            "changes follower stopped by caller"
        );
        true
    }

    pub(crate) fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.stop_tx.subscribe(),
        }
    }

    pub(crate) fn checkpoint(&self) -> String {
        self.checkpoint.read().clone()
    }

    pub(crate) fn publish_checkpoint(&self, since: &str) {
        *self.checkpoint.write() = since.to_string();
    }

    pub(crate) fn stats(&self) -> FollowerStats {
        self.stats.read().clone()
    }

    pub(crate) fn update_stats(&self, update: impl FnOnce(&mut FollowerStats)) {
        update(&mut self.stats.write());
    }
}

/// Receiving side of a run's stop request.
pub(crate) struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub(crate) fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once a stop has been requested.
    pub(crate) async fn stopped(&mut self) {
        loop {
            let stopped = *self.rx.borrow_and_update();
            if stopped {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone: no stop can arrive anymore.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A cheap, clonable handle that stops a follower from anywhere.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Requests a graceful stop. Idempotent.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Returns the follower's current state.
    pub fn state(&self) -> FollowerState {
        self.shared.state()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Follows a database's changes feed.
///
/// A follower supports exactly one run: [`start`](Self::start) moves it from
/// `Idle` to `Running` and hands out the [`ChangeStream`] that drives the run.
/// The run ends `Stopped` (caught up, limit reached, or stopped by the caller)
/// or `Errored` (terminal failure or exhausted retry budget), never both.
/// To resume after a run ended, build a new follower from
/// [`checkpoint`](Self::checkpoint).
pub struct ChangesFollower<C: ChangesClient> {
    config: FollowerConfig,
    client: Arc<C>,
    shared: Arc<Shared>,
}

impl<C: ChangesClient> ChangesFollower<C> {
    /// Creates an idle follower.
    pub fn new(client: C, config: FollowerConfig) -> Self {
        let shared = Arc::new(Shared::new(&config.since));
        Self {
            config,
            client: Arc::new(client),
            shared,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    /// Returns the changes client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Gets the current state.
    pub fn state(&self) -> FollowerState {
        self.shared.state()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> FollowerStats {
        self.shared.stats()
    }

    /// Returns the last confirmed checkpoint.
    ///
    /// Before the first confirmed batch this is the configured `since`.
    pub fn checkpoint(&self) -> String {
        self.shared.checkpoint()
    }

    /// Returns a handle that can stop the run from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Starts the run.
    ///
    /// Fails with [`FollowerError::AlreadyStarted`] unless the follower is
    /// idle, and with [`FollowerError::InvalidConfig`] if the configuration
    /// is unusable.
    pub fn start(&self) -> FollowerResult<ChangeStream<C>> {
        self.config.validate()?;
        self.shared.begin()?;

        info!(
            db = %self.config.db,
            since = %self.config.since,
            mode = ?self.config.mode,
            limit = ?self.config.limit,
            "starting changes follower"
        );

        Ok(ChangeStream::new(
            self.config.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.shared),
        ))
    }

    /// Requests a graceful stop. Idempotent; a no-op unless running.
    ///
    /// Any in-flight fetch or backoff wait is abandoned and the checkpoint
    /// stays at the last fully delivered batch.
    pub fn stop(&self) {
        self.shared.request_stop();
    }
}
