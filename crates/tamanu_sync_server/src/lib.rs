//! # Tamanu Sync Server
//!
//! The central side of Tamanu sync: HTTP channel endpoints over a
//! [`ChannelStore`](tamanu_sync_store::ChannelStore).
//!
//! This crate provides:
//! - axum routes under `/v1` (health, pull, push, delete, channel changes)
//! - A transport-independent [`RequestHandler`]
//! - Facility bearer tokens (HMAC-SHA256)
//! - Configuration from `TAMANU_SYNC_*` environment variables
//!
//! # Authentication
//!
//! Authentication is optional but recommended for production:
//!
//! ```rust
//! use tamanu_sync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let auth = AuthConfig::new("my-secure-secret-32-bytes-long!");
//! let config = ServerConfig::default().with_auth(auth.clone());
//! assert!(config.require_auth());
//!
//! let validator = TokenValidator::new(auth);
//! let token = validator.create_token("facility-a").unwrap();
//! assert_eq!(validator.validate(&token).unwrap().facility_id, "facility-a");
//! ```
//!
//! # Protocol
//!
//! Every accepted write gets a fresh `lastSynced` from the store clock.
//! Facilities pull each channel from their watermark until `count` is
//! exhausted, then push their marked rows.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod routes;
mod server;

pub use auth::{bearer_token, AuthConfig, FacilityClaims, TokenValidator, DEFAULT_TOKEN_EXPIRY};
pub use config::{ServerConfig, ENV_PREFIX};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, HealthResponse, RequestHandler};
pub use routes::{router, AppState};
pub use server::SyncServer;
