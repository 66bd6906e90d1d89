//! Harvest run configuration.

use super::defaults::*;
use std::time::Duration;

/// Configuration for a harvest run.
///
/// Groups the two concurrency budgets and the retry schedule, providing
/// sensible defaults while allowing customization.
///
/// # Example
///
/// ```
/// use manifesthub::config::HarvestConfig;
///
/// // Using defaults
/// let config = HarvestConfig::default();
/// assert_eq!(config.concurrent_accounts(), 4);
/// assert_eq!(config.concurrent_downloads(), 16);
///
/// // Custom configuration
/// let config = HarvestConfig::new()
///     .with_concurrent_accounts(8)
///     .with_retry_attempts(5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Maximum number of concurrently active Steam sessions
    concurrent_accounts: usize,
    /// Maximum number of concurrent manifest downloads per session
    concurrent_downloads: usize,
    /// Number of attempts for a retried Steam operation
    retry_attempts: u32,
    /// Delay between retry attempts, in seconds
    retry_delay_secs: u64,
    /// Delay before reconnecting after an unsolicited disconnect, in seconds
    reconnect_delay_secs: u64,
    /// Cadence of the session callback pump, in milliseconds
    pump_interval_millis: u64,
}

impl HarvestConfig {
    /// Create a new harvest configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrently active Steam sessions.
    ///
    /// Default: 4 sessions.
    pub fn with_concurrent_accounts(mut self, accounts: usize) -> Self {
        self.concurrent_accounts = accounts;
        self
    }

    /// Set the number of concurrent manifest downloads per session.
    ///
    /// Default: 16 downloads.
    pub fn with_concurrent_downloads(mut self, downloads: usize) -> Self {
        self.concurrent_downloads = downloads;
        self
    }

    /// Set the number of attempts for a retried Steam operation.
    ///
    /// Default: 30 attempts.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the delay between retry attempts, in seconds.
    ///
    /// Default: 10 seconds.
    pub fn with_retry_delay_secs(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Set the delay before reconnecting after an unsolicited disconnect.
    ///
    /// Default: 5 seconds.
    pub fn with_reconnect_delay_secs(mut self, secs: u64) -> Self {
        self.reconnect_delay_secs = secs;
        self
    }

    /// Set the cadence of the session callback pump, in milliseconds.
    ///
    /// Default: 100 milliseconds.
    pub fn with_pump_interval_millis(mut self, millis: u64) -> Self {
        self.pump_interval_millis = millis;
        self
    }

    /// Get the number of concurrently active Steam sessions.
    pub fn concurrent_accounts(&self) -> usize {
        self.concurrent_accounts
    }

    /// Get the number of concurrent manifest downloads per session.
    pub fn concurrent_downloads(&self) -> usize {
        self.concurrent_downloads
    }

    /// Get the number of attempts for a retried Steam operation.
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Get the delay between retry attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Get the delay before reconnecting after an unsolicited disconnect.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Get the cadence of the session callback pump.
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_millis)
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrent_accounts: DEFAULT_CONCURRENT_ACCOUNTS,
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            pump_interval_millis: DEFAULT_PUMP_INTERVAL_MILLIS,
        }
    }
}
