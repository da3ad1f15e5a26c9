//! Compact command implementation.

use std::path::Path;
use tamanu_sync_store::{SyncStore, JOURNAL_FILE};

use super::inspect::format_size;
use super::store_options;

/// Runs the compact command.
pub fn run(path: &Path, facility: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.join(JOURNAL_FILE).exists() {
        return Err(format!("No sync store found at {}", path.display()).into());
    }

    println!("Compacting journal at {}", path.display());
    let store = SyncStore::open_dir(path, store_options(facility))?;
    let stats = store.compact()?;

    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Entries kept: {}", stats.entries);
    println!("  Size before:  {}", format_size(stats.bytes_before));
    println!("  Size after:   {}", format_size(stats.bytes_after));
    println!(
        "  Space saved:  {} ({:.1}%)",
        format_size(saved),
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
