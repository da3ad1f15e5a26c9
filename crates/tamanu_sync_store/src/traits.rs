//! Channel store traits.

use crate::clock::SyncClock;
use crate::error::StoreResult;
use serde::Serialize;
use serde_json::{Map, Value};
use tamanu_sync_protocol::{Channel, DbRecord, SyncCursor};

/// Which side of the sync a store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Central server: every write is stamped with a fresh `lastSynced`.
    #[default]
    Central,
    /// Facility server: rows keep the server's `lastSynced`; local writes are
    /// marked for push.
    Facility,
}

impl StoreMode {
    /// Returns the mode name used in messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StoreMode::Central => "central",
            StoreMode::Facility => "facility",
        }
    }
}

/// Per-channel counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    /// Channel name.
    pub channel: String,
    /// Live rows.
    pub live: u64,
    /// Tombstones.
    pub tombstones: u64,
    /// Rows with unpushed local changes.
    pub marked_for_push: u64,
    /// Highest `lastSynced` in the channel.
    pub max_last_synced: Option<u64>,
}

/// Store-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// One entry per channel, sorted by name.
    pub channels: Vec<ChannelStats>,
    /// Journal size in bytes, if the store is journaled.
    pub journal_bytes: Option<u64>,
}

impl StoreStats {
    /// Total rows, tombstones included.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.channels.iter().map(|c| c.live + c.tombstones).sum()
    }
}

/// The sync channel store: a keyed append-log per channel.
///
/// Rows are keyed by `id` within a channel. Each row sits in the channel's log
/// at `(lastSynced, id)`; an upsert moves it to its new position, so reading
/// the log "since" a cursor yields every row changed after that cursor exactly
/// once.
pub trait ChannelStore: Send + Sync {
    /// Returns rows after `cursor` in log order, at most `limit`.
    ///
    /// Tombstones are included. Rows without a `lastSynced` are never returned.
    fn find_since(
        &self,
        channel: &Channel,
        cursor: &SyncCursor,
        limit: u32,
    ) -> StoreResult<Vec<DbRecord>>;

    /// Counts the rows `find_since` would return without a limit.
    fn count_since(&self, channel: &Channel, cursor: &SyncCursor) -> StoreResult<u64>;

    /// Inserts or replaces a row by id and returns it as stored.
    ///
    /// A central store stamps `lastSynced` with a fresh tick. A facility store
    /// stores the row as pulled (see [`FacilityStore::apply_remote`]).
    fn upsert(&self, channel: &Channel, row: DbRecord) -> StoreResult<DbRecord>;

    /// Upserts several rows as one journal write.
    fn upsert_batch(&self, channel: &Channel, rows: Vec<DbRecord>) -> StoreResult<Vec<DbRecord>> {
        rows.into_iter()
            .map(|row| self.upsert(channel, row))
            .collect()
    }

    /// Tombstones a live row. Returns 1, or 0 if there is no live row.
    fn mark_record_deleted(&self, channel: &Channel, id: &str) -> StoreResult<u64>;

    /// Returns a row by id, tombstones included.
    fn get(&self, channel: &Channel, id: &str) -> StoreResult<Option<DbRecord>>;

    /// Returns every channel holding at least one row or watermark.
    fn channels(&self) -> StoreResult<Vec<Channel>>;

    /// Returns per-channel counters.
    fn stats(&self) -> StoreResult<StoreStats>;

    /// The store's clock.
    fn clock(&self) -> &SyncClock;

    /// The store's mode.
    fn mode(&self) -> StoreMode;
}

/// Facility-side operations: local change tracking and pull watermarks.
pub trait FacilityStore: ChannelStore {
    /// Records a local application write. The row is marked for push.
    fn save_local(
        &self,
        channel: &Channel,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<DbRecord>;

    /// Records a local deletion as a tombstone marked for push.
    /// Returns 0 if there is no live row.
    fn delete_local(&self, channel: &Channel, id: &str) -> StoreResult<u64>;

    /// Stores a row pulled from the central server, clearing any push mark.
    fn apply_remote(&self, channel: &Channel, row: DbRecord) -> StoreResult<DbRecord>;

    /// Returns rows marked for push ordered by `(updatedAt, id)`.
    fn find_marked_for_push(&self, channel: &Channel, limit: u32) -> StoreResult<Vec<DbRecord>>;

    /// Counts rows marked for push.
    fn count_marked_for_push(&self, channel: &Channel) -> StoreResult<u64>;

    /// Clears push marks for `(id, localVersion)` pairs that were pushed.
    ///
    /// A row whose version moved on since it was read for push keeps its mark.
    /// Returns the number of marks cleared.
    fn mark_records_pushed(&self, channel: &Channel, pushed: &[(String, u64)]) -> StoreResult<u64>;

    /// Returns the pull watermark for a channel.
    fn pull_cursor(&self, channel: &Channel) -> StoreResult<SyncCursor>;

    /// Persists the pull watermark for a channel.
    fn set_pull_cursor(&self, channel: &Channel, cursor: &SyncCursor) -> StoreResult<()>;
}
