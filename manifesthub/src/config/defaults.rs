//! Default values and constants for all configuration settings.

/// Default number of concurrently active Steam sessions.
pub const DEFAULT_CONCURRENT_ACCOUNTS: usize = 4;

/// Default number of concurrent manifest downloads within one session.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 16;

/// Default number of attempts for a retried Steam operation.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 30;

/// Default delay between retry attempts, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// Default delay before reconnecting after an unsolicited disconnect.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Default cadence of the session callback pump, in milliseconds.
pub const DEFAULT_PUMP_INTERVAL_MILLIS: u64 = 100;

/// Default cadence of the branch-lock wait progress message, in seconds.
pub const DEFAULT_LOCK_PROGRESS_SECS: u64 = 5;
