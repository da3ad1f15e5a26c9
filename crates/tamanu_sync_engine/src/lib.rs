//! # Tamanu Sync Engine
//!
//! Facility-side sync engine for Tamanu.
//!
//! This crate provides:
//! - Sync state machine (idle → connecting → pulling → pushing → synced)
//! - Per-channel pull watermarks and push marks through a [`FacilityStore`]
//! - Conflict resolution by [`ConflictPolicy`]
//! - Retry with exponential backoff and jitter
//! - HTTP transport over `reqwest`, plus an in-process loopback client
//!
//! ## Architecture
//!
//! Each cycle pulls first, then pushes:
//! 1. Ask the server which configured channels changed since their watermarks
//! 2. Pull each changed channel page by page, applying rows and saving the
//!    watermark after every page
//! 3. Push rows marked for push and clear the marks of the versions sent
//!
//! The central server stamps every pushed row, so a pushed row comes back on
//! the next pull with its server `lastSynced`.
//!
//! [`FacilityStore`]: tamanu_sync_store::FacilityStore
//! [`ConflictPolicy`]: tamanu_sync_protocol::ConflictPolicy

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpMethod, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    ReqwestClient,
};
pub use state::{ChannelSyncResult, SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockCall, MockTransport, SyncTransport};
