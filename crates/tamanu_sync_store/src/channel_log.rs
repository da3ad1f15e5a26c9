//! Per-channel row table with an ordered log index.

use crate::traits::ChannelStats;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tamanu_sync_protocol::{DbRecord, SyncCursor};

/// Rows of one channel, keyed by id, plus the `(lastSynced, id)` index that
/// backs `find_since`.
#[derive(Debug, Default, Clone)]
pub(crate) struct ChannelLog {
    rows: BTreeMap<String, DbRecord>,
    log: BTreeSet<(u64, String)>,
}

impl ChannelLog {
    pub(crate) fn get(&self, id: &str) -> Option<&DbRecord> {
        self.rows.get(id)
    }

    /// Inserts or replaces a row, keeping the log index in step.
    pub(crate) fn put(&mut self, row: DbRecord) -> Option<DbRecord> {
        let previous = self.rows.remove(&row.id);
        if let Some(ts) = previous.as_ref().and_then(|old| old.last_synced) {
            self.log.remove(&(ts, row.id.clone()));
        }
        if let Some(ts) = row.last_synced {
            self.log.insert((ts, row.id.clone()));
        }
        self.rows.insert(row.id.clone(), row);
        previous
    }

    fn after<'a>(&'a self, cursor: &SyncCursor) -> impl Iterator<Item = &'a (u64, String)> + 'a {
        self.log.range((
            Bound::Excluded((cursor.last_synced, cursor.id.clone())),
            Bound::Unbounded,
        ))
    }

    pub(crate) fn since(&self, cursor: &SyncCursor, limit: usize) -> Vec<DbRecord> {
        self.after(cursor)
            .take(limit)
            .filter_map(|(_, id)| self.rows.get(id).cloned())
            .collect()
    }

    pub(crate) fn count_since(&self, cursor: &SyncCursor) -> u64 {
        self.after(cursor).count() as u64
    }

    pub(crate) fn marked_for_push(&self, limit: usize) -> Vec<DbRecord> {
        let mut marked: Vec<&DbRecord> = self.rows.values().filter(|r| r.marked_for_push).collect();
        marked.sort_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)));
        marked.into_iter().take(limit).cloned().collect()
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &DbRecord> {
        self.rows.values()
    }

    pub(crate) fn max_last_synced(&self) -> Option<u64> {
        self.log.iter().next_back().map(|(ts, _)| *ts)
    }

    pub(crate) fn stats(&self, channel: &str) -> ChannelStats {
        let mut stats = ChannelStats {
            channel: channel.to_string(),
            max_last_synced: self.max_last_synced(),
            ..ChannelStats::default()
        };
        for row in self.rows.values() {
            if row.is_deleted() {
                stats.tombstones += 1;
            } else {
                stats.live += 1;
            }
            if row.marked_for_push {
                stats.marked_for_push += 1;
            }
        }
        stats
    }
}
