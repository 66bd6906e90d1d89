//! Per-account manifest download pipeline.
//!
//! One downloader drains one ready session: enumerate the licensed
//! packages, resolve their apps and depots, skip everything the archive
//! already pins, and fetch the rest under a per-session concurrency budget.
//! Successful downloads are handed to the archive as spawned write tasks
//! accumulated in a shared buffer; the orchestrator drains that buffer
//! after every session finished.

mod retry;

pub use retry::with_retry;

use crate::archive::{ArchiveError, ManifestArchive, ManifestRecord, TouchedApps, WriteOutcome};
use crate::config::HarvestConfig;
use crate::steam::{CdnServer, SteamClient, SteamError, SteamSession};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Errors from the download pipeline.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The upstream returned a zero request code: this account cannot see
    /// the manifest. Logged nowhere — these flood otherwise.
    #[error("Access denied to manifest {app_id}_{depot_id}_{manifest_id}")]
    AccessDenied {
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    },

    /// No decryption key was issued for the depot. Also silent.
    #[error("Failed to get depot key for {app_id}_{depot_id}")]
    DepotKeyUnavailable { app_id: u32, depot_id: u32 },

    #[error("no CDN servers available")]
    NoCdnServers,

    #[error(transparent)]
    Steam(#[from] SteamError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl DownloadError {
    /// Whether this failure is skipped without logging.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            DownloadError::AccessDenied { .. } | DownloadError::DepotKeyUnavailable { .. }
        )
    }
}

/// Archive write tasks spawned by downloaders, drained by the orchestrator.
#[derive(Clone, Default)]
pub struct WriteTaskBuffer {
    inner: Arc<Mutex<Vec<JoinHandle<Result<WriteOutcome, ArchiveError>>>>>,
}

impl WriteTaskBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, handle: JoinHandle<Result<WriteOutcome, ArchiveError>>) {
        self.inner.lock().await.push(handle);
    }

    /// Await every buffered write. Panicked tasks surface as errors.
    pub async fn drain(&self) -> Vec<Result<WriteOutcome, ArchiveError>> {
        let handles: Vec<_> = self.inner.lock().await.drain(..).collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(
                handle
                    .await
                    .unwrap_or_else(|e| Err(ArchiveError::TaskJoin(e.to_string()))),
            );
        }
        results
    }
}

/// Counters summarizing one downloader run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Manifests fetched and handed to the archive
    pub downloaded: usize,
    /// Manifests skipped because their tag already exists
    pub skipped: usize,
    /// Manifests that failed after the retry budget
    pub failed: usize,
}

/// The per-account pipeline.
pub struct ManifestDownloader<C: SteamClient> {
    session: Arc<SteamSession<C>>,
    archive: ManifestArchive,
    config: HarvestConfig,
    touched: TouchedApps,
    writes: WriteTaskBuffer,
}

impl<C: SteamClient> ManifestDownloader<C> {
    pub fn new(
        session: Arc<SteamSession<C>>,
        archive: ManifestArchive,
        config: HarvestConfig,
        touched: TouchedApps,
        writes: WriteTaskBuffer,
    ) -> Self {
        Self {
            session,
            archive,
            config,
            touched,
            writes,
        }
    }

    /// Run the pipeline to completion.
    pub async fn run(&self) -> Result<DownloadStats, DownloadError> {
        self.session.ready().await?;
        let client = self.session.client();

        // Complimentary licenses see no depots; don't waste product-info
        // round trips on them.
        let package_ids: Vec<u32> = self
            .session
            .licenses()
            .iter()
            .filter(|license| !license.payment_method.is_complimentary())
            .map(|license| license.package_id)
            .collect();
        let packages = client.package_info(&package_ids).await?;

        let app_ids: BTreeSet<u32> = packages
            .iter()
            .flat_map(|package| package.app_ids.iter().copied())
            .filter(|app_id| *app_id != 0)
            .collect();
        for app_id in &app_ids {
            self.touched.record(*app_id);
        }
        debug!(
            packages = packages.len(),
            apps = app_ids.len(),
            "resolved licensed apps"
        );

        let app_ids: Vec<u32> = app_ids.into_iter().collect();
        let tokens = client.app_access_tokens(&app_ids).await?;

        let servers = Arc::new(client.cdn_servers().await?);
        if servers.is_empty() {
            return Err(DownloadError::NoCdnServers);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_downloads()));
        let mut stats = DownloadStats::default();
        let mut downloads: JoinSet<Result<(), DownloadError>> = JoinSet::new();

        for app_id in app_ids {
            let access_token = tokens.get(&app_id).copied().unwrap_or(0);
            let info = client.app_info(app_id, access_token).await?;

            for target in info.public_manifests() {
                if self
                    .archive
                    .has_manifest(app_id, target.depot_id, target.manifest_id)
                    .await?
                {
                    stats.skipped += 1;
                    continue;
                }

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| DownloadError::Steam(SteamError::Rpc(e.to_string())))?;
                let client = self.session.client();
                let archive = self.archive.clone();
                let writes = self.writes.clone();
                let servers = Arc::clone(&servers);
                let config = self.config;
                downloads.spawn(async move {
                    let _permit = permit;
                    download_one(
                        client,
                        archive,
                        writes,
                        config,
                        &servers,
                        app_id,
                        target.depot_id,
                        target.manifest_id,
                    )
                    .await
                });
            }
        }

        while let Some(result) = downloads.join_next().await {
            match result {
                Ok(Ok(())) => stats.downloaded += 1,
                Ok(Err(e)) => {
                    stats.failed += 1;
                    if !e.is_silent() {
                        warn!(error = %e, "manifest download failed");
                    }
                }
                Err(join_err) => {
                    stats.failed += 1;
                    warn!(error = %join_err, "download task panicked");
                }
            }
        }

        info!(
            downloaded = stats.downloaded,
            skipped = stats.skipped,
            failed = stats.failed,
            "download pipeline finished"
        );
        Ok(stats)
    }
}

/// Fetch one manifest and hand it to the archive.
///
/// Request code, depot key and CDN fetch each get the full retry budget.
/// The CDN server is pinned by `depot_id mod len(servers)` so a depot
/// always hits the same edge within a run.
#[allow(clippy::too_many_arguments)]
async fn download_one<C: SteamClient>(
    client: Arc<C>,
    archive: ManifestArchive,
    writes: WriteTaskBuffer,
    config: HarvestConfig,
    servers: &[CdnServer],
    app_id: u32,
    depot_id: u32,
    manifest_id: u64,
) -> Result<(), DownloadError> {
    let attempts = config.retry_attempts();
    let delay = config.retry_delay();

    let request_code = with_retry(attempts, delay, "manifest request code", || {
        client.manifest_request_code(app_id, depot_id, manifest_id)
    })
    .await?;
    if request_code == 0 {
        return Err(DownloadError::AccessDenied {
            app_id,
            depot_id,
            manifest_id,
        });
    }

    let depot_key = with_retry(attempts, delay, "depot key", || {
        client.depot_key(app_id, depot_id)
    })
    .await
    .map_err(|_| DownloadError::DepotKeyUnavailable { app_id, depot_id })?;

    let server = &servers[depot_id as usize % servers.len()];
    let manifest = with_retry(attempts, delay, "manifest download", || {
        client.download_manifest(server, app_id, depot_id, manifest_id, request_code)
    })
    .await?;

    let record = ManifestRecord {
        app_id,
        depot_id,
        manifest_id,
        depot_key,
        manifest,
    };
    let handle = tokio::spawn(async move { archive.write_manifest(record).await });
    writes.push(handle).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ForgeAuth, GitStore};
    use crate::steam::MockSteamClient;
    use crate::vault::AccountRecord;
    use git2::Repository;
    use tempfile::TempDir;

    fn test_archive() -> (TempDir, Arc<GitStore>, ManifestArchive) {
        let dir = tempfile::tempdir().expect("tempdir");
        let remote = dir.path().join("origin.git");
        let local = dir.path().join("work");
        Repository::init_bare(&remote).expect("init bare");
        let repo = Repository::init(&local).expect("init local");
        repo.remote("origin", remote.to_str().expect("utf-8 path"))
            .expect("add origin");
        let store = GitStore::open(&local, ForgeAuth::anonymous()).expect("open");
        let archive = ManifestArchive::new(Arc::clone(&store));
        (dir, store, archive)
    }

    fn session_for(client: MockSteamClient) -> Arc<SteamSession<MockSteamClient>> {
        let mut account = AccountRecord::new("bob");
        account.refresh_token = Some("jwt".into());
        SteamSession::new(client, account, HarvestConfig::default())
    }

    fn fast_config() -> HarvestConfig {
        HarvestConfig::default()
            .with_retry_attempts(2)
            .with_retry_delay_secs(0)
    }

    #[tokio::test]
    async fn test_downloads_single_app_end_to_end() {
        let (_dir, _store, archive) = test_archive();
        let client = MockSteamClient::new()
            .with_refresh_logon(76561198000000000, None)
            .with_app(10, 20, 42, [7; 32]);
        let session = session_for(client);
        session.establish().await.expect("establish");

        let touched = TouchedApps::new();
        let writes = WriteTaskBuffer::new();
        let downloader = ManifestDownloader::new(
            Arc::clone(&session),
            archive.clone(),
            fast_config(),
            touched.clone(),
            writes.clone(),
        );

        let stats = downloader.run().await.expect("run");
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.skipped, 0);

        // The write buffer holds the archive task; drain and verify.
        let results = writes.drain().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].as_ref().unwrap().is_written());
        assert!(archive.has_manifest(10, 20, 42).await.unwrap());
        assert!(touched.snapshot().contains(&10));
    }

    #[tokio::test]
    async fn test_archived_manifest_costs_no_rpc() {
        let (_dir, _store, archive) = test_archive();

        // Seed the archive with the triple the mock will offer.
        archive
            .write_manifest(ManifestRecord {
                app_id: 100,
                depot_id: 200,
                manifest_id: 300,
                depot_key: [1; 32],
                manifest: b"seeded".to_vec(),
            })
            .await
            .expect("seed");

        let client = MockSteamClient::new()
            .with_refresh_logon(76561198000000000, None)
            .with_app(100, 200, 300, [1; 32]);
        let state = Arc::clone(&client.state);
        let session = session_for(client);
        session.establish().await.expect("establish");

        let downloader = ManifestDownloader::new(
            Arc::clone(&session),
            archive,
            fast_config(),
            TouchedApps::new(),
            WriteTaskBuffer::new(),
        );
        let stats = downloader.run().await.expect("run");

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.downloaded, 0);
        // The gate fires before any per-manifest network work.
        assert!(state.request_code_calls.lock().unwrap().is_empty());
        assert_eq!(
            state.download_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_zero_request_code_is_silent_access_denied() {
        let (_dir, _store, archive) = test_archive();
        let client = MockSteamClient::new()
            .with_refresh_logon(76561198000000000, None)
            .with_app(10, 20, 42, [7; 32]);
        // Overwrite the scripted request code with the denial marker.
        client
            .state
            .request_codes
            .lock()
            .unwrap()
            .insert((10, 20, 42), 0);
        let state = Arc::clone(&client.state);
        let session = session_for(client);
        session.establish().await.expect("establish");

        let downloader = ManifestDownloader::new(
            Arc::clone(&session),
            archive.clone(),
            fast_config(),
            TouchedApps::new(),
            WriteTaskBuffer::new(),
        );
        let stats = downloader.run().await.expect("run");

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloaded, 0);
        assert_eq!(
            state.download_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        assert!(!archive.has_manifest(10, 20, 42).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_depot_key_is_silent() {
        let (_dir, _store, archive) = test_archive();
        let client = MockSteamClient::new()
            .with_refresh_logon(76561198000000000, None)
            .with_app(10, 20, 42, [7; 32]);
        client.state.depot_keys.lock().unwrap().clear();
        let session = session_for(client);
        session.establish().await.expect("establish");

        let downloader = ManifestDownloader::new(
            Arc::clone(&session),
            archive,
            fast_config(),
            TouchedApps::new(),
            WriteTaskBuffer::new(),
        );
        let stats = downloader.run().await.expect("run");
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_complimentary_licenses_are_excluded() {
        let (_dir, _store, archive) = test_archive();
        let client = MockSteamClient::new().with_refresh_logon(76561198000000000, None);
        {
            use crate::steam::{License, PaymentMethod};
            client.state.licenses.lock().unwrap().push(License {
                package_id: 5000,
                payment_method: PaymentMethod::Complimentary,
            });
        }
        let session = session_for(client);
        session.establish().await.expect("establish");

        let touched = TouchedApps::new();
        let downloader = ManifestDownloader::new(
            Arc::clone(&session),
            archive,
            fast_config(),
            touched.clone(),
            WriteTaskBuffer::new(),
        );
        let stats = downloader.run().await.expect("run");
        assert_eq!(stats, DownloadStats::default());
        assert!(touched.snapshot().is_empty());
    }

    #[test]
    fn test_silent_classification() {
        assert!(DownloadError::AccessDenied {
            app_id: 1,
            depot_id: 2,
            manifest_id: 3
        }
        .is_silent());
        assert!(DownloadError::DepotKeyUnavailable {
            app_id: 1,
            depot_id: 2
        }
        .is_silent());
        assert!(!DownloadError::NoCdnServers.is_silent());
        assert!(!DownloadError::Steam(SteamError::Rpc("x".into())).is_silent());
    }
}
