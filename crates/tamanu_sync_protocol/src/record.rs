//! Sync records and their persisted form.
//!
//! Records travel as a [`SyncRecord`] envelope and are stored as a flat
//! [`DbRecord`] row. The conversions here are the only place the two shapes
//! meet.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys owned by the sync layer. They never travel inside `data` except `id`.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "lastSynced",
    "deletedAt",
    "updatedAt",
    "markedForPush",
    "localVersion",
    "isDeleted",
];

/// The wire envelope for one record.
///
/// ```json
/// { "data": { "id": "p1", "firstName": "Ana" }, "lastSynced": 1700000000000, "isDeleted": false }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Record fields, including `id`.
    pub data: Map<String, Value>,
    /// Server-assigned logical timestamp. Ignored when pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<u64>,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
}

impl SyncRecord {
    /// Creates a live record from its data.
    #[must_use]
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            last_synced: None,
            is_deleted: false,
        }
    }

    /// Creates a tombstone for the given id.
    pub fn tombstone(id: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("id".into(), Value::String(id.into()));
        Self {
            data,
            last_synced: None,
            is_deleted: true,
        }
    }

    /// Returns the `id` in `data`, if it is a string.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

/// A flat persisted row.
///
/// Metadata columns sit beside the record's own fields; serialization flattens
/// both into a single JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbRecord {
    /// Record id, unique within a channel.
    pub id: String,
    /// Server logical timestamp of the last accepted write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<u64>,
    /// Deletion time in Unix millis, set for tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    /// Wall-clock time of the last local change in Unix millis.
    #[serde(default)]
    pub updated_at: u64,
    /// Facility only: the row has local changes the central server hasn't seen.
    #[serde(default)]
    pub marked_for_push: bool,
    /// Facility only: incremented on every local write.
    #[serde(default)]
    pub local_version: u64,
    /// The record's own fields (never contains reserved keys).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DbRecord {
    /// Creates an empty live row.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_synced: None,
            deleted_at: None,
            updated_at: 0,
            marked_for_push: false,
            local_version: 0,
            fields: Map::new(),
        }
    }

    /// Sets a field, builder style. Reserved keys are ignored.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Returns true if this row is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Turns this row into a tombstone, dropping its fields.
    pub fn make_tombstone(&mut self, now_ms: u64) {
        self.deleted_at = Some(now_ms);
        self.updated_at = now_ms;
        self.fields.clear();
    }
}

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Converts a wire record into a row ready for `upsert`.
///
/// `now_ms` stamps `updatedAt`, and `deletedAt` for tombstones. The envelope's
/// `lastSynced` is carried across; a central store overwrites it on write.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingId`] or [`ProtocolError::InvalidId`] if
/// `data.id` is absent or not a non-empty string.
pub fn convert_to_db_record(record: SyncRecord, now_ms: u64) -> ProtocolResult<DbRecord> {
    let SyncRecord {
        mut data,
        last_synced,
        is_deleted,
    } = record;

    let id = match data.remove("id") {
        None => return Err(ProtocolError::MissingId),
        Some(Value::String(id)) if !id.is_empty() => id,
        Some(_) => return Err(ProtocolError::InvalidId),
    };

    let mut row = DbRecord::new(id);
    row.last_synced = last_synced;
    row.updated_at = now_ms;
    if is_deleted {
        row.make_tombstone(now_ms);
    } else {
        row.fields = data.into_iter().filter(|(k, _)| !is_reserved(k)).collect();
    }
    Ok(row)
}

/// Converts a stored row into its wire envelope.
///
/// Tombstones carry only their id.
#[must_use]
pub fn convert_from_db_record(row: &DbRecord) -> SyncRecord {
    let mut data = Map::new();
    data.insert("id".into(), Value::String(row.id.clone()));
    if !row.is_deleted() {
        data.extend(row.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    SyncRecord {
        data,
        last_synced: row.last_synced,
        is_deleted: row.is_deleted(),
    }
}
