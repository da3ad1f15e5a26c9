//! # Tamanu Testkit
//!
//! Test utilities for Tamanu sync.
//!
//! This crate provides:
//! - Store fixtures in temporary directories
//! - Record and row builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use tamanu_testkit::prelude::*;
//! use tamanu_sync_store::ChannelStore;
//!
//! let central = populated_central(&channel("reference"), 3);
//! assert_eq!(central.stats().unwrap().total_rows(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
