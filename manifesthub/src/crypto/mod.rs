//! Secret handling for account records and ingestion payloads.
//!
//! Three concerns live here:
//!
//! - [`secret`]: AES-256-CBC encryption of account secrets at rest, under a
//!   process-wide key with a per-record IV.
//! - [`friend_code`]: the deterministic branch-index derivation from a
//!   64-bit Steam id. The index doubles as the Git branch name an account
//!   record is stored under, so it must be stable across runs.
//! - [`ingest`]: RSA-OAEP unsealing of externally supplied account files.

pub mod friend_code;
pub mod ingest;
pub mod secret;

pub use ingest::IngestError;
pub use secret::{SecretError, SecretKey};
