//! Test fixtures and store helpers.
//!
//! Helpers here panic on failure; they are meant for tests only.

use serde_json::{Map, Value};
use std::path::Path;
use tamanu_sync_protocol::{Channel, DbRecord, SyncRecord};
use tamanu_sync_store::{ChannelStore, StoreOptions, SyncStore};
use tempfile::TempDir;

/// A temporary store directory, removed on drop.
///
/// Open it, drop the store, and open it again to test recovery.
pub struct TempStoreDir {
    dir: TempDir,
}

impl TempStoreDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Opens a store in the directory.
    pub fn open(&self, options: StoreOptions) -> SyncStore {
        SyncStore::open_dir(self.path(), options).expect("Failed to open store")
    }

    /// Opens a central store.
    pub fn open_central(&self) -> SyncStore {
        self.open(StoreOptions::central())
    }

    /// Opens a facility store.
    pub fn open_facility(&self) -> SyncStore {
        self.open(StoreOptions::facility())
    }
}

impl Default for TempStoreDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a channel name.
pub fn channel(name: &str) -> Channel {
    Channel::parse(name).expect("Invalid channel name")
}

/// Turns a JSON object into a field map. Anything else gives an empty map.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A record as a client would push it: `data` holds the id and `fields`.
pub fn push_record(id: &str, fields: Value) -> SyncRecord {
    let mut data = self::fields(fields);
    data.insert("id".into(), Value::String(id.into()));
    SyncRecord::new(data)
}

/// A record as the server would return it from a pull.
pub fn pulled_record(id: &str, last_synced: u64, fields: Value) -> SyncRecord {
    let mut record = push_record(id, fields);
    record.last_synced = Some(last_synced);
    record
}

/// A row with a random id and the given fields.
pub fn random_row(fields: Value) -> DbRecord {
    let mut row = DbRecord::new(uuid::Uuid::new_v4().to_string());
    row.fields = self::fields(fields);
    row
}

/// An in-memory central store with `count` rows `r0..` in `channel`.
pub fn populated_central(channel: &Channel, count: usize) -> SyncStore {
    let store = SyncStore::in_memory(StoreOptions::central());
    for i in 0..count {
        store
            .upsert(channel, DbRecord::new(format!("r{i}")).with_field("n", i as u64))
            .expect("Failed to upsert");
    }
    store
}
