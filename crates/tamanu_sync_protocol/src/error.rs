//! Error types for protocol parsing and conversion.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or converting protocol values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A record's `data` has no `id` field.
    #[error("record data is missing an id")]
    MissingId,

    /// A record's `id` is not a non-empty string.
    #[error("record id must be a non-empty string")]
    InvalidId,

    /// A channel name failed validation.
    #[error("invalid channel {name:?}: {reason}")]
    InvalidChannel {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A cursor string could not be parsed.
    #[error("invalid cursor {0:?}")]
    InvalidCursor(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ProtocolError {
    pub(crate) fn channel(name: &str, reason: &'static str) -> Self {
        Self::InvalidChannel {
            name: name.to_string(),
            reason,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
