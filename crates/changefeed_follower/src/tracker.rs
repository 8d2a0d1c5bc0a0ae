//! Feed position tracking.

use changefeed_protocol::{ChangeRecord, ChangesResponse};

/// One fetched page, ready to be emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Records in delivery order.
    pub records: Vec<ChangeRecord>,
    /// Checkpoint reported for the end of the page.
    pub end_token: String,
    /// Server estimate of changes remaining after the page.
    pub pending: u64,
}

/// What remains of a batch once its records are handed out.
///
/// The receipt is what the tracker confirms after the last record of the
/// batch reached the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Checkpoint to move to.
    pub end_token: String,
    /// Pending count reported with the batch.
    pub pending: u64,
    /// Number of records in the batch.
    pub records: u64,
}

impl Batch {
    /// Returns true if the page carried no records and nothing is pending.
    pub fn is_caught_up(&self) -> bool {
        self.records.is_empty() && self.pending == 0
    }

    /// Keeps only the first `len` records.
    ///
    /// The end token moves back to the last kept record so that confirming
    /// the batch never skips a dropped record, and the dropped records are
    /// added back to `pending`. Truncating a non-empty batch to zero leaves
    /// a batch that must not be confirmed.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.records.len() {
            return;
        }
        let dropped = (self.records.len() - len) as u64;
        self.pending = self.pending.saturating_add(dropped);
        self.records.truncate(len);
        if let Some(last) = self.records.last() {
            self.end_token = last.sequence.clone();
        }
    }

    /// Splits the batch into its records and its receipt.
    pub fn into_parts(self) -> (Vec<ChangeRecord>, BatchReceipt) {
        let receipt = BatchReceipt {
            end_token: self.end_token,
            pending: self.pending,
            records: self.records.len() as u64,
        };
        (self.records, receipt)
    }
}

impl From<ChangesResponse> for Batch {
    fn from(response: ChangesResponse) -> Self {
        Self {
            records: response.results,
            end_token: response.last_seq,
            pending: response.pending,
        }
    }
}

/// Snapshot of a run's position in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPosition {
    /// Last confirmed checkpoint.
    pub since: String,
    /// Pending count reported by the last successful fetch.
    pub pending: u64,
    /// Records delivered to the caller so far in this run.
    pub emitted: u64,
}

impl FeedPosition {
    /// Creates a position at the given checkpoint with nothing emitted.
    pub fn new(since: impl Into<String>) -> Self {
        Self {
            since: since.into(),
            pending: 0,
            emitted: 0,
        }
    }

    /// Returns how many records may still be emitted under `limit`.
    pub fn remaining(&self, limit: Option<u64>) -> Option<u64> {
        limit.map(|l| l.saturating_sub(self.emitted))
    }

    /// Returns true once `limit` records have been emitted.
    pub fn limit_reached(&self, limit: Option<u64>) -> bool {
        self.remaining(limit) == Some(0)
    }
}

/// Holds the checkpoint of a single follower run.
///
/// The checkpoint only moves when a whole batch has been handed to the
/// caller, so a restart from [`SequenceTracker::current`] re-reads anything
/// that was not delivered.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    position: FeedPosition,
}

impl SequenceTracker {
    /// Creates a tracker starting at `since`.
    pub fn new(since: impl Into<String>) -> Self {
        Self {
            position: FeedPosition::new(since),
        }
    }

    /// Returns a snapshot of the current position.
    pub fn current(&self) -> FeedPosition {
        self.position.clone()
    }

    /// Returns the current position without cloning.
    pub fn position(&self) -> &FeedPosition {
        &self.position
    }

    /// Confirms a fully delivered batch.
    pub fn advance(&mut self, receipt: &BatchReceipt) {
        self.position.since = receipt.end_token.clone();
        self.position.pending = receipt.pending;
        self.position.emitted += receipt.records;
    }
}
