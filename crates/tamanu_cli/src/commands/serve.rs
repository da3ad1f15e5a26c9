//! Serve command implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tamanu_sync_server::{ServerConfig, SyncServer};
use tracing::{error, info, warn};

/// Runs the central sync server until Ctrl-C.
///
/// Flags override values from the environment.
pub fn run(
    data_dir: Option<PathBuf>,
    listen: Option<SocketAddr>,
    in_memory: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    if let Some(addr) = listen {
        config.listen_addr = addr;
    }
    if let Some(dir) = data_dir {
        config = config.with_data_dir(dir);
    }
    if in_memory {
        config = config.in_memory();
    }
    if config.data_dir.is_none() {
        warn!("no data directory configured; rows are kept in memory only");
    }
    if !config.require_auth() {
        warn!("TAMANU_SYNC_SECRET is not set; sync routes are unauthenticated");
    }

    let server = SyncServer::open(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server.bind_and_serve(wait_for_shutdown(tokio::signal::ctrl_c())))?;
    Ok(())
}

/// Resolves once `signal` fires. A signal that cannot be installed never
/// resolves, so the server keeps running.
async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!(error = %e, "cannot listen for Ctrl-C; stop the process another way");
            std::future::pending::<()>().await;
        }
    }
}
