//! Protocol messages for the channel endpoints.
//!
//! All bodies are JSON with camelCase keys.

use crate::channel::Channel;
use crate::cursor::SyncCursor;
use crate::error::ProtocolResult;
use crate::record::SyncRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Page size used when a pull doesn't ask for one.
pub const DEFAULT_PULL_LIMIT: u32 = 100;

/// Query string of `GET /v1/sync/{channel}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQuery {
    /// Legacy watermark: a bare `lastSynced` timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Full cursor `"{lastSynced};{id}"`. Takes precedence over `since`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Maximum rows to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl PullQuery {
    /// Creates a query starting after `cursor`.
    #[must_use]
    pub fn new(cursor: &SyncCursor, limit: u32) -> Self {
        Self {
            since: None,
            cursor: Some(cursor.to_string()),
            limit: Some(limit),
        }
    }

    /// Resolves the effective cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the supplied cursor or `since` can't be parsed.
    pub fn resolve_cursor(&self) -> ProtocolResult<SyncCursor> {
        match (&self.cursor, &self.since) {
            (Some(cursor), _) => SyncCursor::parse(cursor),
            (None, Some(since)) => SyncCursor::parse(since),
            (None, None) => Ok(SyncCursor::start()),
        }
    }

    /// Returns the requested limit, clamped to `1..=max`.
    #[must_use]
    pub fn effective_limit(&self, max: u32) -> u32 {
        self.limit.unwrap_or(DEFAULT_PULL_LIMIT).clamp(1, max.max(1))
    }
}

/// Response of a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Records in `(lastSynced, id)` order.
    pub records: Vec<SyncRecord>,
    /// Number of rows after the request cursor, this page included.
    pub count: u64,
    /// Position of the last returned record; the request cursor if empty.
    pub cursor: String,
    /// Server logical time when the request was handled.
    pub requested_at: u64,
}

impl PullResponse {
    /// Returns true if rows remain after this page.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.count > self.records.len() as u64
    }
}

/// Body of `POST /v1/sync/{channel}`: one record or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PushBody {
    /// A batch of records.
    Many(Vec<SyncRecord>),
    /// A single record.
    One(SyncRecord),
}

impl PushBody {
    /// Returns the number of records in the body.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            PushBody::Many(records) => records.len(),
            PushBody::One(_) => 1,
        }
    }

    /// Returns true if the body holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the records as a vector.
    #[must_use]
    pub fn into_records(self) -> Vec<SyncRecord> {
        match self {
            PushBody::Many(records) => records,
            PushBody::One(record) => vec![record],
        }
    }
}

impl From<Vec<SyncRecord>> for PushBody {
    fn from(records: Vec<SyncRecord>) -> Self {
        PushBody::Many(records)
    }
}

/// Response of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Number of records accepted.
    pub count: u64,
}

/// Response of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Number of rows tombstoned (0 or 1).
    pub count: u64,
}

/// One entry of a channel change query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCursor {
    /// Channel to check.
    pub channel: Channel,
    /// The caller's watermark for it.
    #[serde(default)]
    pub cursor: String,
}

/// Body of `POST /v1/sync/channels`.
pub type ChannelsRequest = Vec<ChannelCursor>;

/// Response of a channel change query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    /// Channels with rows after the supplied cursor, in request order.
    pub channels_with_changes: Vec<Channel>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// HTTP status code.
    pub code: u16,
    /// Human readable message.
    pub message: String,
}

/// Encodes a message as JSON bytes.
///
/// # Errors
///
/// Returns [`crate::ProtocolError::Codec`] if serialization fails.
pub fn encode_json<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message from JSON bytes.
///
/// # Errors
///
/// Returns [`crate::ProtocolError::Codec`] if the bytes aren't a valid message.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_wins_over_since() {
        let query = PullQuery {
            since: Some("5".into()),
            cursor: Some("9;x".into()),
            limit: None,
        };
        assert_eq!(query.resolve_cursor().unwrap(), SyncCursor::new(9, "x"));

        let legacy = PullQuery {
            since: Some("5".into()),
            ..PullQuery::default()
        };
        assert_eq!(legacy.resolve_cursor().unwrap(), SyncCursor::new(5, ""));

        assert!(PullQuery::default().resolve_cursor().unwrap().is_start());
    }

    #[test]
    fn limit_is_clamped() {
        let query = PullQuery::default();
        assert_eq!(query.effective_limit(500), DEFAULT_PULL_LIMIT);
        assert_eq!(query.effective_limit(10), 10);

        let zero = PullQuery {
            limit: Some(0),
            ..PullQuery::default()
        };
        assert_eq!(zero.effective_limit(10), 1);
    }

    #[test]
    fn push_body_accepts_one_or_many() {
        let one: PushBody = serde_json::from_value(json!({ "data": { "id": "a" } })).unwrap();
        assert_eq!(one.len(), 1);

        let many: PushBody = serde_json::from_value(json!([
            { "data": { "id": "a" } },
            { "data": { "id": "b" }, "isDeleted": true }
        ]))
        .unwrap();
        assert_eq!(many.len(), 2);
        assert!(many.into_records()[1].is_deleted);

        let empty: PushBody = serde_json::from_value(json!([])).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn pull_response_wire_shape() {
        let response = PullResponse {
            records: vec![SyncRecord::tombstone("a")],
            count: 3,
            cursor: "10;a".into(),
            requested_at: 12,
        };
        assert!(response.has_more());

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["requestedAt"], json!(12));
        assert_eq!(value["cursor"], json!("10;a"));
    }

    #[test]
    fn channels_request_decodes() {
        let request: ChannelsRequest = decode_json(
            br#"[{"channel":"user","cursor":"4;u1"},{"channel":"reference"}]"#,
        )
        .unwrap();
        assert_eq!(request.len(), 2);
        assert_eq!(request[1].cursor, "");

        let bad = decode_json::<ChannelsRequest>(br#"[{"channel":"a//b"}]"#);
        assert!(bad.is_err());
    }
}
