//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod serve;
pub mod sync;
pub mod token;

use tamanu_sync_store::StoreOptions;

/// Options for opening a store directory offline.
fn store_options(facility: bool) -> StoreOptions {
    if facility {
        StoreOptions::facility()
    } else {
        StoreOptions::central()
    }
}
