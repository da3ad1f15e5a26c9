//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use tamanu_sync_protocol::Channel;
use tamanu_sync_store::{ChannelStats, ChannelStore, FacilityStore, SyncStore, JOURNAL_FILE};

use super::store_options;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Store mode.
    pub mode: &'static str,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Rows across all channels, tombstones included.
    pub total_rows: u64,
    /// Per-channel statistics.
    pub channels: Vec<ChannelReport>,
}

/// Statistics for a single channel.
#[derive(Debug, Serialize)]
pub struct ChannelReport {
    #[serde(flatten)]
    stats: ChannelStats,
    /// Pull watermark, facility stores only.
    #[serde(skip_serializing_if = "Option::is_none")]
    watermark: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, facility: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.join(JOURNAL_FILE).exists() {
        return Err(format!("No sync store found at {}", path.display()).into());
    }

    let store = SyncStore::open_dir(path, store_options(facility))?;
    let stats = store.stats()?;

    let mut channels = Vec::with_capacity(stats.channels.len());
    for entry in &stats.channels {
        let watermark = if facility {
            let channel = Channel::parse(&entry.channel)?;
            Some(store.pull_cursor(&channel)?.to_string())
        } else {
            None
        };
        channels.push(ChannelReport {
            stats: entry.clone(),
            watermark,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        mode: store.mode().name(),
        journal_bytes: stats.journal_bytes.unwrap_or(0),
        total_rows: stats.total_rows(),
        channels,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Tamanu Sync Store Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!("Mode: {}", result.mode);
    println!();
    println!("Storage:");
    println!("  Journal size: {}", format_size(result.journal_bytes));
    println!("  Rows:         {}", result.total_rows);

    if !result.channels.is_empty() {
        println!();
        println!("Channels:");
    }
    for report in &result.channels {
        let stats = &report.stats;
        print!(
            "  {} live {}, tombstones {}",
            stats.channel, stats.live, stats.tombstones
        );
        if stats.marked_for_push > 0 {
            print!(", unpushed {}", stats.marked_for_push);
        }
        if let Some(max) = stats.max_last_synced {
            print!(", lastSynced {max}");
        }
        if let Some(watermark) = &report.watermark {
            print!(", watermark {watermark}");
        }
        println!();
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
