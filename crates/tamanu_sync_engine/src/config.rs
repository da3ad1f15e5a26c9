//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use tamanu_sync_protocol::{Channel, ConflictPolicy};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Facility this engine syncs for.
    pub facility_id: String,
    /// Central server URL.
    pub server_url: String,
    /// Bearer token, if the server requires one.
    pub token: Option<String>,
    /// Channels to sync, in order.
    pub channels: Vec<Channel>,
    /// Maximum rows per pull page.
    pub pull_batch_size: u32,
    /// Maximum rows per push request.
    pub push_batch_size: u32,
    /// How to settle pulled rows that collide with unpushed local edits.
    pub conflict_policy: ConflictPolicy,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Sync interval for automatic sync.
    pub sync_interval: Option<Duration>,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(facility_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            facility_id: facility_id.into(),
            server_url: server_url.into(),
            token: None,
            channels: Vec::new(),
            pull_batch_size: 100,
            push_batch_size: 100,
            conflict_policy: ConflictPolicy::default(),
            retry: RetryConfig::default(),
            sync_interval: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Adds a channel to sync.
    pub fn with_channel(mut self, channel: Channel) -> Self {
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
        self
    }

    /// Adds several channels to sync.
    pub fn with_channels(self, channels: impl IntoIterator<Item = Channel>) -> Self {
        channels.into_iter().fold(self, Self::with_channel)
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let patient = Channel::parse("patient").unwrap();
        let config = SyncConfig::new("facility-a", "https://central.example.com")
            .with_token("tok")
            .with_channels([patient.clone(), Channel::parse("user").unwrap(), patient])
            .with_pull_batch_size(50)
            .with_push_batch_size(0)
            .with_conflict_policy(ConflictPolicy::ClientWins)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.facility_id, "facility-a");
        assert_eq!(config.server_url, "https://central.example.com");
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.pull_batch_size, 50);
        assert_eq!(config.push_batch_size, 1);
        assert_eq!(config.conflict_policy, ConflictPolicy::ClientWins);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(4)
            .with_initial_delay(Duration::from_millis(125))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
