//! Configuration types for ManifestHub components.
//!
//! This module provides structured configuration objects that group related
//! parameters together. CLI arguments override the built-in defaults when
//! specified.
//!
//! # Example
//!
//! ```
//! use manifesthub::config::HarvestConfig;
//!
//! let config = HarvestConfig::new()
//!     .with_concurrent_accounts(2)
//!     .with_concurrent_downloads(8);
//! assert_eq!(config.concurrent_accounts(), 2);
//! ```

mod defaults;
mod harvest;

pub use defaults::{
    DEFAULT_CONCURRENT_ACCOUNTS, DEFAULT_CONCURRENT_DOWNLOADS, DEFAULT_LOCK_PROGRESS_SECS,
    DEFAULT_PUMP_INTERVAL_MILLIS, DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_SECS,
};
pub use harvest::HarvestConfig;
