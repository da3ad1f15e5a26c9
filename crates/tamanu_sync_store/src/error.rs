//! Error types for the channel store.

use std::io;
use std::path::PathBuf;
use tamanu_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for storage backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to truncate beyond the end of storage.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    TruncatePastEnd {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },
}

/// Errors raised by the channel store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A journal entry before the tail could not be decoded.
    #[error("journal corrupted at offset {offset}: {reason}")]
    CorruptJournal {
        /// Byte offset of the bad entry.
        offset: u64,
        /// Decoder message.
        reason: String,
    },

    /// A journal entry could not be encoded.
    #[error("journal encoding failed: {0}")]
    Encode(String),

    /// Another process holds the store directory.
    #[error("store at {0} is locked by another process")]
    Locked(PathBuf),

    /// A facility-only operation was called on a central store, or the reverse.
    #[error("operation {operation} is not available on a {mode} store")]
    WrongMode {
        /// Operation name.
        operation: &'static str,
        /// Store mode name.
        mode: &'static str,
    },

    /// A record or channel failed protocol validation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error outside a backend (directories, locks).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
