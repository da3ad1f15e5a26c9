//! Pull cursors.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::DbRecord;
use std::fmt;

/// A position in a channel's sync log.
///
/// Rows are ordered by `(lastSynced, id)`. A pull "since" a cursor returns rows
/// strictly after it, so the id tie-break keeps pages stable when several rows
/// share a timestamp.
///
/// Text form is `"{lastSynced};{id}"`. A bare `"{lastSynced}"` parses with an
/// empty id, which sorts before every real id at that timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncCursor {
    /// Logical timestamp of the last row seen.
    pub last_synced: u64,
    /// Id of the last row seen.
    pub id: String,
}

impl SyncCursor {
    /// The cursor before every row.
    #[must_use]
    pub fn start() -> Self {
        Self::default()
    }

    /// Creates a cursor at an explicit position.
    pub fn new(last_synced: u64, id: impl Into<String>) -> Self {
        Self {
            last_synced,
            id: id.into(),
        }
    }

    /// Creates a cursor positioned at the given row.
    ///
    /// Rows without a `lastSynced` never appear in the log; they map to the
    /// start cursor.
    #[must_use]
    pub fn after(row: &DbRecord) -> Self {
        Self::new(row.last_synced.unwrap_or(0), row.id.clone())
    }

    /// Returns true if this is the start cursor.
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.last_synced == 0 && self.id.is_empty()
    }

    /// Returns true if a row at `(last_synced, id)` comes after this cursor.
    #[must_use]
    pub fn precedes(&self, last_synced: u64, id: &str) -> bool {
        (self.last_synced, self.id.as_str()) < (last_synced, id)
    }

    /// Parses the text form. Empty input is the start cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidCursor`] if the timestamp isn't a
    /// non-negative integer.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::start());
        }
        let (timestamp, id) = match text.split_once(';') {
            Some((timestamp, id)) => (timestamp, id),
            None => (text, ""),
        };
        let last_synced = timestamp
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidCursor(text.to_string()))?;
        Ok(Self::new(last_synced, id))
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.last_synced)
        } else {
            write!(f, "{};{}", self.last_synced, self.id)
        }
    }
}

impl std::str::FromStr for SyncCursor {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
