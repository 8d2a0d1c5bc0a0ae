//! Error types for the changes protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding feed messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The payload was not a valid changes document.
    #[error("failed to decode changes payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A message could not be encoded.
    #[error("failed to encode {what}: {message}")]
    Encode {
        /// What was being encoded.
        what: &'static str,
        /// Error message.
        message: String,
    },

    /// A field was present but held an unusable value.
    #[error("invalid field `{field}`: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Error message.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
