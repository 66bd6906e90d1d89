//! The Git-backed object store.
//!
//! Manifests, depot keys and account records all live in one Git repository
//! pushed to a remote forge. This module owns the repository handle, the
//! per-branch write serialization, the manifest archive proper and the
//! end-of-run tracking report.
//!
//! Writes to different branches proceed in parallel; writes to the same
//! branch are totally ordered by [`locks::BranchLocks`], giving each branch
//! a linear commit history.

mod key_registry;
mod locks;
mod manifest;
mod report;
mod store;
mod types;

pub use key_registry::{decryption_keys, upsert};
pub use locks::BranchLocks;
pub use manifest::ManifestArchive;
pub use report::{TouchedApps, TrackingReport};
pub use store::{ArchiveError, ForgeAuth, GitStore, ORIGIN};
pub use types::{ManifestRecord, TagTriple, WriteOutcome};
