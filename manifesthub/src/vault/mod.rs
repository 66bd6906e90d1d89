//! The account vault.
//!
//! Each account record lives alone on a branch named by its index (see
//! [`crate::crypto::friend_code`]), as a single `AccountInfo.json` blob.
//! Mutations funnel through the same per-branch locks as manifest writes;
//! enumeration scans remote-tracking branches so a freshly cloned runner
//! sees the whole pool.

mod record;

pub use record::AccountRecord;

use crate::archive::{ArchiveError, GitStore};
use crate::crypto::friend_code;
use crate::crypto::secret::{SecretError, SecretKey};
use git2::{BranchType, Commit, Repository};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The single blob an account branch carries.
pub const ACCOUNT_INFO: &str = "AccountInfo.json";

const BLOB_MODE: i32 = 0o100644;

/// Errors from vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("account record codec failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Secret(#[from] SecretError),

    /// The record has no branch index yet, so there is nowhere to store it
    #[error("account record has no branch index")]
    MissingIndex,

    #[error("vault worker task failed: {0}")]
    TaskJoin(String),
}

/// Read/write access to encrypted account records.
#[derive(Clone)]
pub struct AccountVault {
    store: Arc<GitStore>,
    key: SecretKey,
}

impl AccountVault {
    pub fn new(store: Arc<GitStore>, key: SecretKey) -> Self {
        Self { store, key }
    }

    /// Store the record on its index branch and push it.
    ///
    /// Secrets are encrypted with the process key before serialization.
    /// Returns `false` when the staged tree matches the branch tip (no
    /// commit is created).
    ///
    /// # Errors
    ///
    /// Fails if the record has no index, or on codec, crypto or Git errors.
    pub async fn write_account(&self, record: &AccountRecord) -> Result<bool, VaultError> {
        let index = record.index.clone().ok_or(VaultError::MissingIndex)?;
        let guard = self.store.locks().acquire(&index).await;
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            write_account_blocking(&store, &key, &record, &index)
        })
        .await
        .map_err(|e| VaultError::TaskJoin(e.to_string()))?
    }

    /// Force-delete the record's branch, locally and on the forge.
    pub async fn remove_account(&self, record: &AccountRecord) -> Result<(), VaultError> {
        let index = record.index.clone().ok_or(VaultError::MissingIndex)?;
        let guard = self.store.locks().acquire(&index).await;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            remove_account_blocking(&store, &index)
        })
        .await
        .map_err(|e| VaultError::TaskJoin(e.to_string()))?
    }

    /// Decode every account record found on remote-tracking index branches.
    ///
    /// With `shuffle` the order is randomized; otherwise it is the stable
    /// seeded-zero permutation of the name-sorted pool, identical across
    /// runs.
    pub async fn enumerate_accounts(&self, shuffle: bool) -> Result<Vec<AccountRecord>, VaultError> {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let mut records = tokio::task::spawn_blocking(move || enumerate_blocking(&store, &key))
            .await
            .map_err(|e| VaultError::TaskJoin(e.to_string()))??;

        let mut rng = if shuffle {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(0)
        };
        records.shuffle(&mut rng);
        Ok(records)
    }

    /// Find one account by name.
    pub async fn get_account(&self, name: &str) -> Result<Option<AccountRecord>, VaultError> {
        let records = self.enumerate_accounts(false).await?;
        Ok(records.into_iter().find(|r| r.account_name == name))
    }
}

fn account_tip<'r>(repo: &'r Repository, index: &str) -> Result<Option<Commit<'r>>, VaultError> {
    for refname in [
        format!("refs/heads/{index}"),
        format!("refs/remotes/origin/{index}"),
    ] {
        if let Ok(oid) = repo.refname_to_id(&refname) {
            return Ok(Some(repo.find_commit(oid)?));
        }
    }
    Ok(None)
}

fn write_account_blocking(
    store: &GitStore,
    key: &SecretKey,
    record: &AccountRecord,
    index: &str,
) -> Result<bool, VaultError> {
    let stored = record.encrypted_for_storage(key)?;
    let json = stored.to_pretty_json()?;

    let repo = store.repo()?;
    let blob = repo.blob(json.as_bytes())?;
    let mut builder = repo.treebuilder(None)?;
    builder.insert(ACCOUNT_INFO, blob, BLOB_MODE)?;
    let tree_oid = builder.write()?;

    let tip = account_tip(&repo, index)?;
    if let Some(commit) = &tip {
        if commit.tree_id() == tree_oid {
            debug!(index = index, "account record unchanged");
            return Ok(false);
        }
    }

    let tree = repo.find_tree(tree_oid)?;
    let sig = GitStore::signature()?;
    let parents: Vec<&Commit> = tip.iter().collect();
    repo.commit(
        Some(&format!("refs/heads/{index}")),
        &sig,
        &sig,
        &format!("Update {ACCOUNT_INFO}"),
        &tree,
        &parents,
    )?;
    store.push(&repo, &format!("refs/heads/{index}:refs/heads/{index}"))?;

    info!(account = %record.account_name, index = index, "account record written");
    Ok(true)
}

fn remove_account_blocking(store: &GitStore, index: &str) -> Result<(), VaultError> {
    let repo = store.repo()?;

    if let Ok(mut branch) = repo.find_branch(index, BranchType::Local) {
        branch.delete()?;
    }
    store.push(&repo, &format!("+:refs/heads/{index}"))?;
    // Drop the remote-tracking ref so this run's enumeration forgets it too.
    if let Ok(mut reference) = repo.find_reference(&format!("refs/remotes/origin/{index}")) {
        let _ = reference.delete();
    }

    info!(index = index, "account branch removed");
    Ok(())
}

fn enumerate_blocking(store: &GitStore, key: &SecretKey) -> Result<Vec<AccountRecord>, VaultError> {
    let repo = store.repo()?;
    let mut records = Vec::new();

    for item in repo.branches(Some(BranchType::Remote))? {
        let (branch, _) = item?;
        let Some(name) = branch.name()? else { continue };
        let Some(index) = name.strip_prefix("origin/") else {
            continue;
        };
        if !friend_code::is_branch_index(index) {
            continue;
        }

        let commit = branch.get().peel_to_commit()?;
        let tree = commit.tree()?;
        let Some(entry) = tree.get_name(ACCOUNT_INFO) else {
            continue;
        };
        let blob = repo.find_blob(entry.id())?;
        let stored: AccountRecord = match serde_json::from_slice(blob.content()) {
            Ok(record) => record,
            Err(e) => {
                warn!(index = index, error = %e, "skipping undecodable account record");
                continue;
            }
        };
        let mut record = match stored.decrypted_from_storage(key) {
            Ok(record) => record,
            Err(e) => {
                warn!(index = index, error = %e, "skipping undecryptable account record");
                continue;
            }
        };
        record.index = Some(index.to_string());
        records.push(record);
    }

    // Name order gives the seeded shuffle a deterministic starting point.
    records.sort_by(|a, b| a.account_name.cmp(&b.account_name));
    Ok(records)
}
