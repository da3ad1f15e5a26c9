//! # Tamanu Sync Protocol
//!
//! Sync protocol types for Tamanu facility and central servers.
//!
//! This crate provides:
//! - [`SyncRecord`], the wire envelope `{ data, lastSynced, isDeleted }`
//! - [`DbRecord`], the flat persisted row, and the conversions between the two
//! - [`Channel`] names and [`SyncCursor`] pull positions
//! - Protocol messages for pull, push, delete and channel change queries
//! - [`ConflictPolicy`] for facility-side conflicts
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod conflict;
mod cursor;
mod error;
mod messages;
mod record;

pub use channel::{Channel, ChannelParams, MAX_CHANNEL_LEN, RESERVED_CHANNEL};
pub use conflict::{Conflict, ConflictPolicy, ConflictResolution};
pub use cursor::SyncCursor;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode_json, encode_json, ChannelCursor, ChannelsRequest, ChannelsResponse, DeleteResponse,
    ErrorBody, PullQuery, PullResponse, PushBody, PushResponse, DEFAULT_PULL_LIMIT,
};
pub use record::{
    convert_from_db_record, convert_to_db_record, DbRecord, SyncRecord, RESERVED_KEYS,
};

/// Current protocol version, reported by the health endpoint.
pub const PROTOCOL_VERSION: u16 = 1;
