//! Server configuration.

use crate::auth::AuthConfig;
use crate::error::{ServerError, ServerResult};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tamanu_sync_store::StoreOptions;

/// Environment variable prefix shared by every setting.
pub const ENV_PREFIX: &str = "TAMANU_SYNC_";

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub listen_addr: SocketAddr,
    /// Store directory. `None` keeps the store in memory.
    pub data_dir: Option<PathBuf>,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Maximum rows per pull response.
    pub max_pull_batch: u32,
    /// Maximum records per push request.
    pub max_push_batch: u32,
    /// Token settings. `None` disables authentication.
    pub auth: Option<AuthConfig>,
    /// Whether the store fsyncs after every write.
    pub sync_on_write: bool,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            data_dir: None,
            request_timeout: Duration::from_secs(30),
            max_pull_batch: 100,
            max_push_batch: 500,
            auth: None,
            sync_on_write: true,
        }
    }

    /// Loads configuration from `.env` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a variable is set but invalid.
    pub fn from_env() -> ServerResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from a variable lookup, applying defaults for
    /// anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a variable is set but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerResult<Self> {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(addr) = var("LISTEN_ADDR") {
            config.listen_addr = parse("LISTEN_ADDR", &addr)?;
        }
        config.data_dir = var("DATA_DIR").map(PathBuf::from);
        if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(parse("REQUEST_TIMEOUT_MS", &ms)?);
        }
        if let Some(n) = var("MAX_PULL_BATCH") {
            config.max_pull_batch = parse_positive("MAX_PULL_BATCH", &n)?;
        }
        if let Some(n) = var("MAX_PUSH_BATCH") {
            config.max_push_batch = parse_positive("MAX_PUSH_BATCH", &n)?;
        }
        if let Some(flag) = var("SYNC_ON_WRITE") {
            config.sync_on_write = parse_bool("SYNC_ON_WRITE", &flag)?;
        }
        if let Some(secret) = var("SECRET") {
            let mut auth = AuthConfig::new(secret);
            if let Some(hours) = var("TOKEN_EXPIRY_HOURS") {
                let hours: u64 = parse("TOKEN_EXPIRY_HOURS", &hours)?;
                auth = auth.with_expiry(Duration::from_secs(hours.saturating_mul(60 * 60)));
            }
            config.auth = Some(auth);
        }
        Ok(config)
    }

    /// Sets the store directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Keeps the store in memory.
    pub fn in_memory(mut self) -> Self {
        self.data_dir = None;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables authentication.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Returns whether requests must carry a token.
    pub fn require_auth(&self) -> bool {
        self.auth.is_some()
    }

    /// Options for opening the central store.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::central().with_sync_on_write(self.sync_on_write)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 3000)))
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> ServerResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ServerError::Config(format!("{ENV_PREFIX}{name}={value:?}: {e}")))
}

fn parse_positive(name: &str, value: &str) -> ServerResult<u32> {
    match parse(name, value)? {
        0 => Err(ServerError::Config(format!("{ENV_PREFIX}{name} must be at least 1"))),
        n => Ok(n),
    }
}

fn parse_bool(name: &str, value: &str) -> ServerResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ServerError::Config(format!(
            "{ENV_PREFIX}{name}={value:?}: expected a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.max_pull_batch, 100);
        assert!(!config.require_auth());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_pull_batch(50)
            .with_data_dir("/var/lib/tamanu")
            .with_auth(AuthConfig::new("s3cret"));

        assert_eq!(config.max_pull_batch, 50);
        assert!(config.require_auth());
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/tamanu")));
        assert!(config.in_memory().data_dir.is_none());
    }

    #[test]
    fn reads_environment() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("LISTEN_ADDR", "0.0.0.0:8080"),
            ("DATA_DIR", "/data"),
            ("SECRET", "abc"),
            ("TOKEN_EXPIRY_HOURS", "2"),
            ("MAX_PULL_BATCH", "25"),
            ("REQUEST_TIMEOUT_MS", "1500"),
            ("SYNC_ON_WRITE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.data_dir, Some(PathBuf::from("/data")));
        assert_eq!(config.max_pull_batch, 25);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert!(!config.sync_on_write);
        let auth = config.auth.unwrap();
        assert_eq!(auth.secret, b"abc");
        assert_eq!(auth.token_expiry, Duration::from_secs(7200));
    }

    #[test]
    fn huge_token_expiry_saturates() {
        let hours = u64::MAX.to_string();
        let config =
            ServerConfig::from_lookup(lookup(&[("SECRET", "abc"), ("TOKEN_EXPIRY_HOURS", &hours)]))
                .unwrap();
        let auth = config.auth.unwrap();
        assert_eq!(auth.token_expiry, Duration::from_secs(u64::MAX));

        let validator = crate::auth::TokenValidator::new(auth);
        let token = validator.create_token("facility-a").unwrap();
        assert_eq!(validator.validate(&token).unwrap().facility_id, "facility-a");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[("SECRET", "  "), ("DATA_DIR", "")])).unwrap();
        assert!(config.auth.is_none());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for vars in [
            [("LISTEN_ADDR", "not-an-addr")],
            [("MAX_PUSH_BATCH", "0")],
            [("SYNC_ON_WRITE", "maybe")],
        ] {
            let err = ServerConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ServerError::Config(_)), "{err}");
        }
    }
}
