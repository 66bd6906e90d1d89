//! ManifestHub - Steam depot manifest harvester
//!
//! This library crawls the depot manifests visible to a pool of Steam
//! accounts and archives them, together with their per-depot decryption
//! keys, into a Git repository hosted on a remote forge.
//!
//! # High-Level API
//!
//! For most use cases, the [`orchestrator`] module provides the top-level
//! entry points:
//!
//! ```ignore
//! use manifesthub::archive::{ForgeAuth, GitStore};
//! use manifesthub::config::HarvestConfig;
//! use manifesthub::crypto::SecretKey;
//! use manifesthub::orchestrator::Orchestrator;
//! use manifesthub::steam::WebSteamClient;
//!
//! let store = GitStore::open(".", ForgeAuth::token("..."))?;
//! let orchestrator = Orchestrator::new(store, key, HarvestConfig::default(), WebSteamClient::new);
//! orchestrator.run_download().await?;
//! ```

pub mod archive;
pub mod config;
pub mod crypto;
pub mod downloader;
pub mod logging;
pub mod orchestrator;
pub mod steam;
pub mod vault;

/// Version of the ManifestHub library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
