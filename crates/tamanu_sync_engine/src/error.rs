//! Error types for the sync engine.

use tamanu_sync_protocol::ProtocolError;
use tamanu_sync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server refused the token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server rejected the request (4xx other than 401).
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server failed (5xx).
    #[error("server error: {0}")]
    ServerError(String),

    /// Local store error during sync.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Conflict that requires manual resolution.
    #[error("unresolved conflict for {id} in channel {channel}")]
    UnresolvedConflict {
        /// Channel of the conflicting row.
        channel: String,
        /// Row id.
        id: String,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl SyncError {
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

    /// Maps an HTTP error status and message to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => SyncError::AuthenticationFailed(message),
            408 | 429 => SyncError::transport_retryable(format!("status {status}: {message}")),
            500..=599 => SyncError::ServerError(message),
            _ => SyncError::Rejected { status, message },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
