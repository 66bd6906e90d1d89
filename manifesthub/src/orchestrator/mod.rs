//! Top-level run orchestration.
//!
//! Two modes share the same machinery:
//!
//! - `download`: enumerate the account pool (randomized), run one session
//!   per account under the account semaphore, fan out manifest downloads,
//!   then drain archive writes, prune superseded tags and emit the
//!   tracking report.
//! - `account`: ingest an external account file (RSA-wrapped or raw),
//!   partition it across parallel instances, and refresh each assigned
//!   account's token, writing records back when the token rotated.
//!
//! Every per-account task is isolated: terminal auth rejections remove the
//! account, anything else is logged and the run continues.

use crate::archive::{ArchiveError, GitStore, ManifestArchive, TouchedApps, TrackingReport};
use crate::config::HarvestConfig;
use crate::crypto::ingest::{self, IngestError};
use crate::crypto::SecretKey;
use crate::downloader::{ManifestDownloader, WriteTaskBuffer};
use crate::steam::{SteamClient, SteamError, SteamSession};
use crate::vault::{AccountRecord, AccountVault, VaultError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("failed to read account file {path}: {source}")]
    AccountFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Steam(#[from] SteamError),
}

/// What one `download` run accomplished.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub accounts: usize,
    pub removed_accounts: usize,
    pub manifests_written: usize,
    pub write_failures: usize,
    pub pruned_tags: usize,
    /// The rendered Markdown tracking report
    pub report: String,
}

/// What one `account` run accomplished.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub assigned: usize,
    pub refreshed: usize,
    pub removed: usize,
}

enum AccountOutcome {
    Completed,
    Removed,
    Failed,
}

/// Owns the pieces of a run and dispatches the two modes.
///
/// The client factory builds one wire client per account session, which is
/// what keeps the orchestrator testable against scripted clients.
pub struct Orchestrator<C, F>
where
    C: SteamClient,
    F: Fn() -> Result<C, SteamError>,
{
    store: Arc<GitStore>,
    vault: AccountVault,
    archive: ManifestArchive,
    config: HarvestConfig,
    touched: TouchedApps,
    client_factory: F,
}

impl<C, F> Orchestrator<C, F>
where
    C: SteamClient,
    F: Fn() -> Result<C, SteamError>,
{
    pub fn new(store: Arc<GitStore>, key: SecretKey, config: HarvestConfig, client_factory: F) -> Self {
        Self {
            vault: AccountVault::new(Arc::clone(&store), key),
            archive: ManifestArchive::new(Arc::clone(&store)),
            store,
            config,
            touched: TouchedApps::new(),
            client_factory,
        }
    }

    /// The `download` mode: harvest everything the account pool can see.
    ///
    /// `summary_path` is where the Markdown tracking report is appended
    /// (the CLI passes `GITHUB_STEP_SUMMARY` when set).
    pub async fn run_download(
        &self,
        summary_path: Option<&Path>,
    ) -> Result<RunSummary, OrchestratorError> {
        self.store.fetch_origin().await?;
        let accounts = self.vault.enumerate_accounts(true).await?;
        info!(accounts = accounts.len(), "starting download run");

        let mut summary = RunSummary {
            accounts: accounts.len(),
            ..RunSummary::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_accounts()));
        let writes = WriteTaskBuffer::new();
        let mut sessions: JoinSet<AccountOutcome> = JoinSet::new();

        for account in accounts {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(SteamError::Rpc(e.to_string()).into()),
            };
            let client = (self.client_factory)()?;
            let vault = self.vault.clone();
            let archive = self.archive.clone();
            let config = self.config;
            let touched = self.touched.clone();
            let writes = writes.clone();
            sessions.spawn(async move {
                let _permit = permit;
                harvest_account(client, account, vault, archive, config, touched, writes).await
            });
        }

        while let Some(result) = sessions.join_next().await {
            match result {
                Ok(AccountOutcome::Removed) => summary.removed_accounts += 1,
                Ok(_) => {}
                Err(join_err) => warn!(error = %join_err, "account task panicked"),
            }
        }

        // Only after every session finished do the buffered writes settle.
        for result in writes.drain().await {
            match result {
                Ok(outcome) => {
                    if outcome.is_written() {
                        summary.manifests_written += 1;
                    }
                }
                Err(e) => {
                    summary.write_failures += 1;
                    warn!(error = %e, "archive write failed");
                }
            }
        }

        match self.archive.prune_expired_tags().await {
            Ok(deleted) => summary.pruned_tags = deleted.len(),
            Err(e) => warn!(error = %e, "tag pruning failed"),
        }

        let managed = self.archive.managed_triples().await?;
        let report = TrackingReport::build(&managed, &self.touched.snapshot());
        summary.report = report.to_markdown();
        if let Some(path) = summary_path {
            if let Err(e) = append_summary(path, &summary.report) {
                warn!(path = %path.display(), error = %e, "failed to write run summary");
            }
        }

        info!(
            written = summary.manifests_written,
            removed_accounts = summary.removed_accounts,
            pruned = summary.pruned_tags,
            "download run finished"
        );
        Ok(summary)
    }

    /// The `account` mode: ingest an external account file.
    ///
    /// The file is either `{"payload": <base64 RSA-OAEP>}` or raw JSON of
    /// `{name: [password, ...]}`. Accounts are partitioned across parallel
    /// instances by position: this instance handles entries where
    /// `position % instance_count == instance_index`.
    pub async fn run_account_mode(
        &self,
        path: &Path,
        instance_index: usize,
        instance_count: usize,
        rsa_private_key: Option<&str>,
    ) -> Result<IngestSummary, OrchestratorError> {
        let text =
            std::fs::read_to_string(path).map_err(|source| OrchestratorError::AccountFile {
                path: path.to_path_buf(),
                source,
            })?;
        let text = ingest::unseal(&text, rsa_private_key);
        let entries = ingest::parse_accounts(&text)?;

        self.store.fetch_origin().await?;
        let existing = self.vault.enumerate_accounts(false).await?;

        let instance_count = instance_count.max(1);
        let mut summary = IngestSummary::default();

        for (position, (name, password)) in entries.into_iter().enumerate() {
            if position % instance_count != instance_index {
                continue;
            }
            summary.assigned += 1;

            // Prefer the stored record: it may carry a refresh token and
            // the minted IV; the file only contributes the password.
            let mut record = existing
                .iter()
                .find(|r| r.account_name == name)
                .cloned()
                .unwrap_or_else(|| AccountRecord::new(&name));
            if password.is_some() {
                record.account_password = password;
            }
            let previous_token = record.refresh_token.clone();

            let client = (self.client_factory)()?;
            let session = SteamSession::new(client, record.clone(), self.config);
            match session.establish().await {
                Ok(()) => {
                    let snapshot = session.account_snapshot();
                    if snapshot.refresh_token != previous_token {
                        match self.vault.write_account(&snapshot).await {
                            Ok(_) => summary.refreshed += 1,
                            Err(e) => {
                                warn!(account = %name, error = %e, "failed to write account record")
                            }
                        }
                    }
                    session.disconnect().await;
                }
                Err(e) if e.is_terminal_auth() => {
                    warn!(account = %name, error = %e, "terminal auth failure, removing account");
                    session.disconnect().await;
                    if record.index.is_some() {
                        if let Err(remove_err) = self.vault.remove_account(&record).await {
                            warn!(account = %name, error = %remove_err, "failed to remove account");
                        } else {
                            summary.removed += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(account = %name, error = %e, "account refresh failed");
                    session.disconnect().await;
                }
            }
        }

        info!(
            assigned = summary.assigned,
            refreshed = summary.refreshed,
            removed = summary.removed,
            "account run finished"
        );
        Ok(summary)
    }

    /// The vault backing this run; exposed for inspection after a run.
    pub fn vault(&self) -> &AccountVault {
        &self.vault
    }

    /// The archive backing this run.
    pub fn archive(&self) -> &ManifestArchive {
        &self.archive
    }
}

/// One account's `download`-mode lifecycle, isolated from its peers.
async fn harvest_account<C: SteamClient>(
    client: C,
    account: AccountRecord,
    vault: AccountVault,
    archive: ManifestArchive,
    config: HarvestConfig,
    touched: TouchedApps,
    writes: WriteTaskBuffer,
) -> AccountOutcome {
    let name = account.account_name.clone();
    let session = SteamSession::new(client, account.clone(), config);

    match session.establish().await {
        Ok(()) => {
            let snapshot = session.account_snapshot();
            if let Err(e) = vault.write_account(&snapshot).await {
                warn!(account = %name, error = %e, "failed to write account record");
            }

            let downloader =
                ManifestDownloader::new(Arc::clone(&session), archive, config, touched, writes);
            if let Err(e) = downloader.run().await {
                warn!(account = %name, error = %e, "download pipeline failed");
            }
            session.disconnect().await;
            AccountOutcome::Completed
        }
        Err(e) if e.is_terminal_auth() => {
            warn!(account = %name, error = %e, "terminal auth failure, removing account");
            session.disconnect().await;
            if account.index.is_some() {
                if let Err(remove_err) = vault.remove_account(&account).await {
                    warn!(account = %name, error = %remove_err, "failed to remove account");
                    return AccountOutcome::Failed;
                }
            }
            AccountOutcome::Removed
        }
        Err(e) => {
            warn!(account = %name, error = %e, "session failed");
            session.disconnect().await;
            AccountOutcome::Failed
        }
    }
}

fn append_summary(path: &Path, report: &str) -> std::io::Result<()> {
    use std::io::Write as _;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{report}")
}
