//! # Changefeed Protocol
//!
//! Wire types and JSON codecs for a document store's changes feed.
//!
//! This crate provides:
//! - `ChangeRecord` for a single document mutation in the feed
//! - `ChangesRequest` describing one page request (position, limit, filter)
//! - `ChangesResponse` for the raw `{results, pending, last_seq}` page
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ChangesFilter, ChangesRequest, ChangesResponse, FeedStyle};
pub use record::{ChangeRecord, RevisionInfo};

/// Position token meaning "start from the current end of the feed".
pub const SINCE_NOW: &str = "now";

/// Position token meaning "start from the beginning of the feed".
pub const SINCE_BEGINNING: &str = "0";

/// The server's per-request page size cap.
///
/// Clients use this to size requests and buffers; it is never enforced
/// client-side.
pub const BATCH_SIZE: u64 = 10_000;
