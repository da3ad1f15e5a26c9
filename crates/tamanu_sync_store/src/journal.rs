//! Journal framing.
//!
//! The journal is JSON lines. Each line holds one [`JournalEntry`] with the
//! final state of a row or watermark, so replaying the journal in order
//! rebuilds the store exactly. Entries are written with their trailing newline
//! in a single append; a line without one is a torn write.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tamanu_sync_protocol::{Channel, DbRecord};
use tracing::warn;

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    /// The stored state of a row.
    Put {
        /// Channel of the row.
        channel: Channel,
        /// Row as stored.
        row: DbRecord,
    },
    /// A pull watermark.
    Cursor {
        /// Channel the watermark belongs to.
        channel: Channel,
        /// Cursor text form.
        cursor: String,
    },
}

/// Encodes entries as newline-terminated JSON lines.
pub(crate) fn encode_entries(entries: &[JournalEntry]) -> StoreResult<Vec<u8>> {
    let mut out = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut out, entry).map_err(|e| StoreError::Encode(e.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Outcome of reading a journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub(crate) entries: Vec<JournalEntry>,
    /// Bytes of the torn tail that were discarded.
    pub(crate) torn_bytes: u64,
}

/// Reads every complete entry and drops a torn tail from the backend.
///
/// # Errors
///
/// A complete line that fails to decode is corruption, not a torn write, and
/// returns [`StoreError::CorruptJournal`].
pub(crate) fn replay(backend: &mut dyn StorageBackend) -> StoreResult<Replay> {
    let bytes = backend.read_all()?;
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            break;
        };
        let line = &bytes[offset..offset + newline];
        if !line.iter().all(u8::is_ascii_whitespace) {
            let entry = serde_json::from_slice(line).map_err(|e| StoreError::CorruptJournal {
                offset: offset as u64,
                reason: e.to_string(),
            })?;
            replay.entries.push(entry);
        }
        offset += newline + 1;
    }

    if offset < bytes.len() {
        replay.torn_bytes = (bytes.len() - offset) as u64;
        warn!(
            offset,
            torn_bytes = replay.torn_bytes,
            "discarding torn journal tail"
        );
        backend.truncate(offset as u64)?;
    }

    Ok(replay)
}
