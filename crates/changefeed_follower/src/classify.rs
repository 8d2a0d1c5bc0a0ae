//! Classification of fetch failures.

use crate::error::FetchError;

/// Whether retrying the identical request is expected to eventually succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, rate-limit or server-side failure; retry with backoff.
    Transient,
    /// Request, permission or protocol failure; retrying cannot help.
    Terminal,
}

impl ErrorClass {
    /// Returns true for transient failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Classifies a fetch failure.
///
/// Rate limiting (429) and 5xx statuses are transient, every other
/// status is terminal. Unrecognized failures are terminal.
pub fn classify(error: &FetchError) -> ErrorClass {
    match error {
        FetchError::Connection(_) | FetchError::Timeout | FetchError::Dns(_) => {
            ErrorClass::Transient
        }
        FetchError::Http { status, .. } => classify_status(*status),
        FetchError::Transport { retryable, .. } => {
            if *retryable {
                ErrorClass::Transient
            } else {
                ErrorClass::Terminal
            }
        }
        FetchError::Decode(_) | FetchError::Other(_) => ErrorClass::Terminal,
    }
}

fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Terminal,
    }
}
