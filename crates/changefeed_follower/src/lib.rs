//! # Changefeed Follower
//!
//! A resilient, resumable consumer for a document store's changes feed.
//!
//! This crate provides:
//! - Follower state machine (idle → running → stopped / errored)
//! - Checkpoint tracking that never moves past undelivered records
//! - Classification of failures into transient and terminal
//! - Retry with exponential backoff and a consecutive-failure budget
//! - A lazy, backpressured, cancellable stream of change records
//! - Changes client abstraction with HTTP, in-memory and scripted clients
//!
//! ## Architecture
//!
//! Each call to [`ChangeStream::next`] drives the run:
//! 1. Hand out the next buffered record of the current batch
//! 2. Once a batch is fully handed out, confirm its checkpoint
//! 3. With nothing buffered, fetch the next batch from the checkpoint
//! 4. On failure, classify; retry transient failures from the same
//!    checkpoint, fail the run on terminal ones or an exhausted budget
//!
//! ## Key Invariants
//!
//! - The checkpoint only moves after a whole batch reached the caller
//! - Failed fetches never move the checkpoint
//! - At most one batch is buffered ahead of the caller
//! - A run ends exactly once: stopped or errored, never both
//! - Stopping abandons in-flight fetches and backoff waits promptly

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod config;
mod emitter;
mod error;
mod fetcher;
mod follower;
mod http;
mod memory;
mod mock;
mod retry;
mod tracker;

pub use classify::{classify, ErrorClass};
pub use config::{FollowMode, FollowerConfig, RetryConfig};
pub use emitter::ChangeStream;
pub use error::{FetchError, FollowerError, FollowerResult};
pub use fetcher::{BatchFetcher, ChangesClient};
pub use follower::{ChangesFollower, FollowerState, FollowerStats, StopHandle, StopReason};
pub use http::{HttpChangesClient, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use memory::MemoryFeed;
pub use mock::{ScriptStep, ScriptedClient};
pub use retry::{RetryDecision, RetryScheduler, RetryState};
pub use tracker::{Batch, BatchReceipt, FeedPosition, SequenceTracker};

pub use changefeed_protocol::{
    ChangeRecord, ChangesFilter, ChangesRequest, ChangesResponse, FeedStyle, BATCH_SIZE,
    SINCE_BEGINNING, SINCE_NOW,
};
