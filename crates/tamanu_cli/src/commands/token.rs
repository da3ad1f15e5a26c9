//! Token command implementation.

use std::time::Duration;
use tamanu_sync_server::{ServerConfig, TokenValidator};

/// Prints a facility token signed with `TAMANU_SYNC_SECRET`.
pub fn run(facility: &str, expiry_hours: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    let mut auth = config
        .auth
        .ok_or("TAMANU_SYNC_SECRET must be set to issue tokens")?;
    if let Some(hours) = expiry_hours {
        auth = auth.with_expiry(Duration::from_secs(hours.saturating_mul(3600)));
    }

    let token = TokenValidator::new(auth).create_token(facility)?;
    println!("{token}");
    Ok(())
}
