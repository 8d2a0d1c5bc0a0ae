//! Error types for the changes follower.

use thiserror::Error;

/// Result type for follower operations.
pub type FollowerResult<T> = Result<T, FollowerError>;

/// A raw failure raised by a changes client for a single request.
///
/// Clients never decide whether a failure is worth retrying; that is
/// [`classify`](crate::classify)'s job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// The connection was refused, reset or closed early.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server host could not be resolved.
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// The server answered with a non-success status.
    #[error("http {status}: {reason}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Reason reported by the server.
        reason: String,
    },

    /// Transport failure tagged by the transport itself.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the transport considers the failure retryable.
        retryable: bool,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        Self::Http {
            status,
            reason: reason.into(),
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns the HTTP status, if the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<changefeed_protocol::ProtocolError> for FetchError {
    fn from(err: changefeed_protocol::ProtocolError) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Errors surfaced to the caller of a follower.
#[derive(Error, Debug)]
pub enum FollowerError {
    /// A failure that retrying the same request cannot fix.
    #[error("terminal error: {source}")]
    Terminal {
        /// The underlying failure.
        #[source]
        source: FetchError,
    },

    /// Transient failures used up the retry budget.
    #[error("gave up after {attempts} consecutive transient failures: {source}")]
    RetriesExhausted {
        /// Number of consecutive failures observed.
        attempts: u32,
        /// The last failure.
        #[source]
        source: FetchError,
    },

    /// The follower has already been started.
    #[error("follower cannot start from state {state}")]
    AlreadyStarted {
        /// The state the follower was in.
        state: String,
    },

    /// The configuration is unusable.
    #[error("invalid follower configuration: {0}")]
    InvalidConfig(String),
}

impl FollowerError {
    /// Returns the underlying fetch failure, if any.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            FollowerError::Terminal { source } => Some(source),
            FollowerError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}
