//! The channel store implementation.

use crate::backend::StorageBackend;
use crate::channel_log::ChannelLog;
use crate::clock::{ClockSource, SyncClock};
use crate::error::{StorageResult, StoreError, StoreResult};
use crate::file::FileBackend;
use crate::journal::{encode_entries, replay, JournalEntry};
use crate::traits::{ChannelStore, FacilityStore, StoreMode, StoreStats};
use fs2::FileExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tamanu_sync_protocol::{Channel, DbRecord, SyncCursor, RESERVED_KEYS};
use tracing::{debug, info, warn};

/// Journal file name inside a store directory.
pub const JOURNAL_FILE: &str = "journal.log";
/// Lock file name inside a store directory.
pub const LOCK_FILE: &str = "LOCK";

/// Options for opening a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Central or facility semantics.
    pub mode: StoreMode,
    /// Whether to fsync the journal after every write (safer but slower).
    pub sync_on_write: bool,
    /// Clock source for stamps.
    pub clock: ClockSource,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            mode: StoreMode::Central,
            sync_on_write: true,
            clock: ClockSource::System,
        }
    }
}

impl StoreOptions {
    /// Options for a central store.
    #[must_use]
    pub fn central() -> Self {
        Self::default()
    }

    /// Options for a facility store.
    #[must_use]
    pub fn facility() -> Self {
        Self {
            mode: StoreMode::Facility,
            ..Self::default()
        }
    }

    /// Sets whether to fsync after every write.
    #[must_use]
    pub const fn with_sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the clock source.
    #[must_use]
    pub const fn with_clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }
}

/// Result of a journal compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
    /// Entries written.
    pub entries: usize,
}

#[derive(Default)]
struct Inner {
    channels: BTreeMap<Channel, ChannelLog>,
    cursors: BTreeMap<Channel, SyncCursor>,
    journal: Option<Box<dyn StorageBackend>>,
}

impl Inner {
    fn apply(&mut self, entry: JournalEntry) -> StoreResult<()> {
        match entry {
            JournalEntry::Put { channel, row } => {
                self.channels.entry(channel).or_default().put(row);
            }
            JournalEntry::Cursor { channel, cursor } => {
                self.cursors.insert(channel, SyncCursor::parse(&cursor)?);
            }
        }
        Ok(())
    }

    fn row(&self, channel: &Channel, id: &str) -> Option<&DbRecord> {
        self.channels.get(channel).and_then(|log| log.get(id))
    }

    fn snapshot(&self) -> Vec<JournalEntry> {
        let rows = self.channels.iter().flat_map(|(channel, log)| {
            log.rows().map(move |row| JournalEntry::Put {
                channel: channel.clone(),
                row: row.clone(),
            })
        });
        let cursors = self.cursors.iter().map(|(channel, cursor)| JournalEntry::Cursor {
            channel: channel.clone(),
            cursor: cursor.to_string(),
        });
        rows.chain(cursors).collect()
    }
}

/// A sync channel store, optionally journaled to a [`StorageBackend`].
///
/// All rows live in memory. When a journal is attached, every mutation is
/// appended (and flushed) before it becomes visible, and reopening the store
/// replays the journal.
///
/// Stamps are issued under the write lock, so log order equals commit order: a
/// reader that has seen `lastSynced = t` will never later find a new row
/// stamped below `t`.
pub struct SyncStore {
    mode: StoreMode,
    sync_on_write: bool,
    clock: SyncClock,
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
    _lock_file: Option<File>,
}

impl SyncStore {
    /// Creates an unjournaled store.
    #[must_use]
    pub fn in_memory(options: StoreOptions) -> Self {
        Self {
            mode: options.mode,
            sync_on_write: options.sync_on_write,
            clock: SyncClock::new(options.clock),
            inner: RwLock::new(Inner::default()),
            path: None,
            _lock_file: None,
        }
    }

    /// Opens a store over a backend, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal can't be read or holds a corrupt entry
    /// before its tail.
    pub fn open_with_backend(
        options: StoreOptions,
        mut backend: Box<dyn StorageBackend>,
    ) -> StoreResult<Self> {
        let replayed = replay(backend.as_mut())?;
        let store = Self::in_memory(options);
        {
            let mut inner = store.inner.write();
            let entries = replayed.entries.len();
            for entry in replayed.entries {
                if let JournalEntry::Put { row, .. } = &entry {
                    store.clock.observe(row.last_synced.unwrap_or(0).max(row.updated_at));
                }
                inner.apply(entry).map_err(|e| StoreError::CorruptJournal {
                    offset: 0,
                    reason: e.to_string(),
                })?;
            }
            inner.journal = Some(backend);
            info!(
                mode = store.mode.name(),
                entries,
                channels = inner.channels.len(),
                clock = store.clock.last(),
                "opened sync store"
            );
        }
        Ok(store)
    }

    /// Opens (or creates) a store directory holding `journal.log`.
    ///
    /// The directory is locked for the life of the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the directory.
    pub fn open_dir(path: &Path, options: StoreOptions) -> StoreResult<Self> {
        fs::create_dir_all(path)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.to_path_buf()));
        }

        let backend = FileBackend::open(&path.join(JOURNAL_FILE))?;
        let mut store = Self::open_with_backend(options, Box::new(backend))?;
        store.path = Some(path.to_path_buf());
        store._lock_file = Some(lock_file);
        Ok(store)
    }

    /// Returns the store directory, if opened with [`SyncStore::open_dir`].
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrites the journal to one entry per row and watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the new journal can't be written. The old journal
    /// is left in place.
    pub fn compact(&self) -> StoreResult<CompactStats> {
        let mut inner = self.inner.write();
        let entries = inner.snapshot();
        let bytes = encode_entries(&entries)?;
        let Some(journal) = inner.journal.as_mut() else {
            return Ok(CompactStats {
                bytes_before: 0,
                bytes_after: 0,
                entries: entries.len(),
            });
        };
        let bytes_before = journal.size()?;
        journal.replace(&bytes)?;
        journal.sync()?;
        let stats = CompactStats {
            bytes_before,
            bytes_after: bytes.len() as u64,
            entries: entries.len(),
        };
        info!(
            before = stats.bytes_before,
            after = stats.bytes_after,
            entries = stats.entries,
            "compacted journal"
        );
        Ok(stats)
    }

    /// Journals then applies entries. Must be called under the write lock.
    fn commit(&self, inner: &mut Inner, entries: Vec<JournalEntry>) -> StoreResult<()> {
        if let Some(journal) = inner.journal.as_mut() {
            let bytes = encode_entries(&entries)?;
            let size_before = journal.size()?;
            if let Err(err) = append_entries(journal.as_mut(), &bytes, self.sync_on_write) {
                // Roll back a partial line so later appends stay well framed.
                if let Err(truncate_err) = journal.truncate(size_before) {
                    warn!(error = %truncate_err, "failed to roll back journal append");
                }
                return Err(err.into());
            }
        }
        for entry in entries {
            inner.apply(entry)?;
        }
        Ok(())
    }

    fn require(&self, mode: StoreMode, operation: &'static str) -> StoreResult<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(StoreError::WrongMode {
                operation,
                mode: self.mode.name(),
            })
        }
    }

    fn stamp_central(&self, mut row: DbRecord) -> DbRecord {
        let stamp = self.clock.tick();
        row.last_synced = Some(stamp);
        row.updated_at = stamp;
        row.marked_for_push = false;
        row.local_version = 0;
        row
    }

    fn prepare_remote(&self, inner: &Inner, channel: &Channel, mut row: DbRecord) -> DbRecord {
        row.marked_for_push = false;
        row.local_version = inner
            .row(channel, &row.id)
            .map(|existing| existing.local_version)
            .unwrap_or(0);
        if let Some(ts) = row.last_synced {
            self.clock.observe(ts);
        }
        row
    }

    fn prepare(&self, inner: &Inner, channel: &Channel, row: DbRecord) -> DbRecord {
        match self.mode {
            StoreMode::Central => self.stamp_central(row),
            StoreMode::Facility => self.prepare_remote(inner, channel, row),
        }
    }

    fn put_entry(channel: &Channel, row: DbRecord) -> JournalEntry {
        JournalEntry::Put {
            channel: channel.clone(),
            row,
        }
    }
}

impl ChannelStore for SyncStore {
    fn find_since(
        &self,
        channel: &Channel,
        cursor: &SyncCursor,
        limit: u32,
    ) -> StoreResult<Vec<DbRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .channels
            .get(channel)
            .map(|log| log.since(cursor, limit as usize))
            .unwrap_or_default())
    }

    fn count_since(&self, channel: &Channel, cursor: &SyncCursor) -> StoreResult<u64> {
        let inner = self.inner.read();
        Ok(inner
            .channels
            .get(channel)
            .map(|log| log.count_since(cursor))
            .unwrap_or(0))
    }

    fn upsert(&self, channel: &Channel, row: DbRecord) -> StoreResult<DbRecord> {
        let mut inner = self.inner.write();
        let row = self.prepare(&inner, channel, row);
        self.commit(&mut inner, vec![Self::put_entry(channel, row.clone())])?;
        debug!(channel = %channel, id = %row.id, last_synced = ?row.last_synced, "upserted row");
        Ok(row)
    }

    fn upsert_batch(&self, channel: &Channel, rows: Vec<DbRecord>) -> StoreResult<Vec<DbRecord>> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let mut inner = self.inner.write();
        let prepared: Vec<DbRecord> = rows
            .into_iter()
            .map(|row| self.prepare(&inner, channel, row))
            .collect();
        let entries = prepared
            .iter()
            .cloned()
            .map(|row| Self::put_entry(channel, row))
            .collect();
        self.commit(&mut inner, entries)?;
        debug!(channel = %channel, count = prepared.len(), "upserted batch");
        Ok(prepared)
    }

    fn mark_record_deleted(&self, channel: &Channel, id: &str) -> StoreResult<u64> {
        if self.mode == StoreMode::Facility {
            return self.delete_local(channel, id);
        }
        let mut inner = self.inner.write();
        let Some(existing) = inner.row(channel, id).filter(|row| !row.is_deleted()) else {
            return Ok(0);
        };
        let mut row = existing.clone();
        let stamp = self.clock.tick();
        row.make_tombstone(stamp);
        row.last_synced = Some(stamp);
        self.commit(&mut inner, vec![Self::put_entry(channel, row)])?;
        debug!(channel = %channel, id, "tombstoned row");
        Ok(1)
    }

    fn get(&self, channel: &Channel, id: &str) -> StoreResult<Option<DbRecord>> {
        Ok(self.inner.read().row(channel, id).cloned())
    }

    fn channels(&self) -> StoreResult<Vec<Channel>> {
        let inner = self.inner.read();
        let mut channels: Vec<Channel> = inner
            .channels
            .keys()
            .chain(inner.cursors.keys())
            .cloned()
            .collect();
        channels.sort();
        channels.dedup();
        Ok(channels)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let inner = self.inner.read();
        let journal_bytes = match inner.journal.as_ref() {
            Some(journal) => Some(journal.size()?),
            None => None,
        };
        Ok(StoreStats {
            channels: inner
                .channels
                .iter()
                .map(|(channel, log)| log.stats(channel.as_str()))
                .collect(),
            journal_bytes,
        })
    }

    fn clock(&self) -> &SyncClock {
        &self.clock
    }

    fn mode(&self) -> StoreMode {
        self.mode
    }
}

impl FacilityStore for SyncStore {
    fn save_local(
        &self,
        channel: &Channel,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<DbRecord> {
        self.require(StoreMode::Facility, "save_local")?;
        let mut inner = self.inner.write();
        let existing = inner.row(channel, id);

        let mut row = DbRecord::new(id);
        row.last_synced = existing.and_then(|r| r.last_synced);
        row.local_version = existing.map(|r| r.local_version).unwrap_or(0) + 1;
        row.updated_at = self.clock.tick();
        row.marked_for_push = true;
        row.fields = fields
            .into_iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect();

        self.commit(&mut inner, vec![Self::put_entry(channel, row.clone())])?;
        Ok(row)
    }

    fn delete_local(&self, channel: &Channel, id: &str) -> StoreResult<u64> {
        self.require(StoreMode::Facility, "delete_local")?;
        let mut inner = self.inner.write();
        let Some(existing) = inner.row(channel, id).filter(|row| !row.is_deleted()) else {
            return Ok(0);
        };
        let mut row = existing.clone();
        row.make_tombstone(self.clock.tick());
        row.local_version += 1;
        row.marked_for_push = true;
        self.commit(&mut inner, vec![Self::put_entry(channel, row)])?;
        Ok(1)
    }

    fn apply_remote(&self, channel: &Channel, row: DbRecord) -> StoreResult<DbRecord> {
        self.require(StoreMode::Facility, "apply_remote")?;
        self.upsert(channel, row)
    }

    fn find_marked_for_push(&self, channel: &Channel, limit: u32) -> StoreResult<Vec<DbRecord>> {
        self.require(StoreMode::Facility, "find_marked_for_push")?;
        let inner = self.inner.read();
        Ok(inner
            .channels
            .get(channel)
            .map(|log| log.marked_for_push(limit as usize))
            .unwrap_or_default())
    }

    fn count_marked_for_push(&self, channel: &Channel) -> StoreResult<u64> {
        self.require(StoreMode::Facility, "count_marked_for_push")?;
        let inner = self.inner.read();
        Ok(inner
            .channels
            .get(channel)
            .map(|log| log.rows().filter(|r| r.marked_for_push).count() as u64)
            .unwrap_or(0))
    }

    fn mark_records_pushed(&self, channel: &Channel, pushed: &[(String, u64)]) -> StoreResult<u64> {
        self.require(StoreMode::Facility, "mark_records_pushed")?;
        let mut inner = self.inner.write();
        let entries: Vec<JournalEntry> = pushed
            .iter()
            .filter_map(|(id, version)| {
                inner
                    .row(channel, id)
                    .filter(|row| row.marked_for_push && row.local_version == *version)
                    .map(|row| {
                        let mut row = row.clone();
                        row.marked_for_push = false;
                        Self::put_entry(channel, row)
                    })
            })
            .collect();
        let cleared = entries.len() as u64;
        if cleared > 0 {
            self.commit(&mut inner, entries)?;
        }
        if cleared < pushed.len() as u64 {
            debug!(
                channel = %channel,
                cleared,
                pushed = pushed.len(),
                "some pushed rows changed during push and stay marked"
            );
        }
        Ok(cleared)
    }

    fn pull_cursor(&self, channel: &Channel) -> StoreResult<SyncCursor> {
        self.require(StoreMode::Facility, "pull_cursor")?;
        Ok(self
            .inner
            .read()
            .cursors
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }

    fn set_pull_cursor(&self, channel: &Channel, cursor: &SyncCursor) -> StoreResult<()> {
        self.require(StoreMode::Facility, "set_pull_cursor")?;
        let mut inner = self.inner.write();
        if inner.cursors.get(channel) == Some(cursor) {
            return Ok(());
        }
        self.commit(
            &mut inner,
            vec![JournalEntry::Cursor {
                channel: channel.clone(),
                cursor: cursor.to_string(),
            }],
        )
    }
}

fn append_entries(
    journal: &mut dyn StorageBackend,
    bytes: &[u8],
    sync: bool,
) -> StorageResult<()> {
    journal.append(bytes)?;
    journal.flush()?;
    if sync {
        journal.sync()?;
    }
    Ok(())
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("mode", &self.mode)
            .field("path", &self.path)
            .field("clock", &self.clock.last())
            .finish_non_exhaustive()
    }
}
