//! # Tamanu Sync Store
//!
//! The channel store behind both ends of Tamanu sync.
//!
//! A store holds, per channel, rows keyed by `id` and an append-log ordered by
//! `(lastSynced, id)`. The central server stamps every accepted write with a
//! fresh tick from a monotonic [`SyncClock`]; facilities keep the server's
//! stamps and track their own edits with `markedForPush`.
//!
//! ## Layers
//!
//! - [`StorageBackend`] - opaque byte stores ([`InMemoryBackend`], [`FileBackend`])
//! - journal - JSON lines of [`JournalEntry`] over a backend
//! - [`SyncStore`] - the in-memory channel logs, rebuilt from the journal on open
//!
//! ## Example
//!
//! ```rust
//! use tamanu_sync_protocol::{Channel, DbRecord, SyncCursor};
//! use tamanu_sync_store::{ChannelStore, StoreOptions, SyncStore};
//!
//! let store = SyncStore::in_memory(StoreOptions::central());
//! let channel = Channel::parse("patient").unwrap();
//! store.upsert(&channel, DbRecord::new("p1").with_field("firstName", "Ana")).unwrap();
//!
//! let rows = store.find_since(&channel, &SyncCursor::start(), 100).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod channel_log;
mod clock;
mod error;
mod file;
mod journal;
mod memory;
mod store;
mod traits;

pub use backend::StorageBackend;
pub use clock::{ClockSource, SyncClock};
pub use error::{StorageError, StorageResult, StoreError, StoreResult};
pub use file::FileBackend;
pub use journal::JournalEntry;
pub use memory::InMemoryBackend;
pub use store::{CompactStats, StoreOptions, SyncStore, JOURNAL_FILE, LOCK_FILE};
pub use traits::{ChannelStats, ChannelStore, FacilityStore, StoreMode, StoreStats};
