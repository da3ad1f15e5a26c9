//! Sync command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tamanu_sync_engine::{HttpTransport, ReqwestClient, SyncConfig, SyncEngine};
use tamanu_sync_protocol::{Channel, ConflictPolicy};
use tamanu_sync_store::{StoreOptions, SyncStore};
use tracing::{error, info};

/// Arguments of the sync command.
pub struct SyncArgs<'a> {
    /// Facility store directory.
    pub data_dir: &'a Path,
    /// Central server URL.
    pub server: &'a str,
    /// Bearer token.
    pub token: Option<&'a str>,
    /// Channels to sync; empty means every channel in the store.
    pub channels: &'a [String],
    /// Conflict policy name.
    pub policy: &'a str,
    /// Seconds between cycles; one cycle when absent.
    pub interval_secs: Option<u64>,
}

/// Runs facility sync cycles against a central server.
pub fn run(args: SyncArgs<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let policy = ConflictPolicy::from_name(args.policy)
        .ok_or_else(|| format!("Unknown conflict policy: {}", args.policy))?;
    let channels = args
        .channels
        .iter()
        .map(|name| Channel::parse(name))
        .collect::<Result<Vec<_>, _>>()?;

    let store = Arc::new(SyncStore::open_dir(args.data_dir, StoreOptions::facility())?);
    let facility_id = args
        .data_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "facility".into());

    let mut config = SyncConfig::new(facility_id, args.server)
        .with_channels(channels)
        .with_conflict_policy(policy);
    if let Some(token) = args.token {
        config = config.with_token(token);
    }
    if let Some(secs) = args.interval_secs {
        config = config.with_sync_interval(Duration::from_secs(secs.max(1)));
    }

    let mut transport = HttpTransport::new(args.server, ReqwestClient::new(config.timeout)?);
    if let Some(token) = &config.token {
        transport = transport.with_token(token.clone());
    }
    let interval = config.sync_interval;
    let engine = SyncEngine::new(config, transport, store);

    loop {
        match engine.sync_with_retry() {
            Ok(result) => {
                for channel in &result.channels {
                    println!(
                        "{}: pulled {}, pushed {}, watermark {}",
                        channel.channel, channel.pulled, channel.pushed, channel.cursor
                    );
                }
                println!(
                    "Synced in {} ms ({} pulled, {} pushed, {} conflicts)",
                    result.duration.as_millis(),
                    result.pulled,
                    result.pushed,
                    result.resolved_conflicts.len()
                );
            }
            Err(e) if interval.is_some() => {
                error!(error = %e, "sync cycle failed");
            }
            Err(e) => return Err(e.into()),
        }

        match interval {
            Some(interval) => {
                info!(seconds = interval.as_secs(), "waiting for next cycle");
                std::thread::sleep(interval);
            }
            None => return Ok(()),
        }
    }
}
