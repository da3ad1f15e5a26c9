//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding a store's journal.
///
/// Backends are opaque: they don't interpret the journal format. The store
/// owns framing and replay.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended since the last `truncate`/`replace`
/// - `flush` hands appended data to the OS; `sync` makes it durable
/// - `replace` swaps the whole contents atomically from a reader's view
pub trait StorageBackend: Send + Sync {
    /// Reads the whole contents.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates to `new_size` bytes. Used to drop a torn journal tail.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Replaces the whole contents with `data`. Used by compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents can't be written.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
