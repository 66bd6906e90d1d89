//! Shared Git repository handle.
//!
//! `GitStore` owns the repository path, the forge credentials and the
//! per-branch lock map. Libgit2 handles are not sharable across threads, so
//! every blocking operation opens its own `Repository`; ref-level atomicity
//! comes from libgit2's lock files and cross-writer ordering from the
//! branch locks.

use super::locks::BranchLocks;
use git2::{Cred, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Name of the forge remote every push and fetch targets.
pub const ORIGIN: &str = "origin";

/// User name presented to the forge; the token is the password.
const FORGE_USER: &str = "x-access-token";

/// Errors from the Git-backed store.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An object-database or transport operation failed
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    /// The forge rejected a pushed ref update
    #[error("push rejected for {refspec}: {message}")]
    PushRejected { refspec: String, message: String },

    /// A tag with this name already exists
    #[error("tag {0} already exists")]
    TagExists(String),

    /// A blocking worker task died before completing
    #[error("archive worker task failed: {0}")]
    TaskJoin(String),
}

/// Credentials for pushing to the forge.
#[derive(Debug, Clone)]
pub struct ForgeAuth {
    token: Option<String>,
}

impl ForgeAuth {
    /// Authenticate with a forge access token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No credentials; local-path remotes never ask for any.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

/// Shared handle to the archive repository.
pub struct GitStore {
    path: PathBuf,
    auth: ForgeAuth,
    locks: BranchLocks,
}

impl GitStore {
    /// Open the repository at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a Git repository.
    pub fn open(path: impl AsRef<Path>, auth: ForgeAuth) -> Result<Arc<Self>, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        // Validate early; later operations re-open per call.
        Repository::open(&path)?;
        Ok(Arc::new(Self {
            path,
            auth,
            locks: BranchLocks::new(),
        }))
    }

    /// Open a fresh libgit2 handle for one blocking operation.
    pub(crate) fn repo(&self) -> Result<Repository, ArchiveError> {
        Ok(Repository::open(&self.path)?)
    }

    pub(crate) fn locks(&self) -> &BranchLocks {
        &self.locks
    }

    /// The synthetic identity used for every commit and tag.
    pub(crate) fn signature() -> Result<Signature<'static>, ArchiveError> {
        Ok(Signature::now("ManifestHub", "manifesthub@localhost")?)
    }

    /// Push a single refspec to origin.
    ///
    /// # Errors
    ///
    /// Transport failures and per-ref rejections both surface as errors;
    /// callers decide whether a rejection is fatal.
    pub(crate) fn push(&self, repo: &Repository, refspec: &str) -> Result<(), ArchiveError> {
        let mut remote = repo.find_remote(ORIGIN)?;

        let mut rejection: Option<(String, String)> = None;
        let mut callbacks = RemoteCallbacks::new();
        self.install_credentials(&mut callbacks);
        callbacks.push_update_reference(|refname, status| {
            if let Some(message) = status {
                rejection = Some((refname.to_string(), message.to_string()));
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        remote.push(&[refspec], Some(&mut options))?;
        drop(options);
        drop(remote);

        if let Some((refname, message)) = rejection {
            return Err(ArchiveError::PushRejected {
                refspec: refname,
                message,
            });
        }
        debug!(refspec = refspec, "pushed to origin");
        Ok(())
    }

    /// Fetch branch and tag refs from origin.
    ///
    /// Run once at startup so account enumeration sees the forge's current
    /// remote-tracking branches even on a stale checkout.
    pub async fn fetch_origin(self: &Arc<Self>) -> Result<(), ArchiveError> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.fetch_origin_blocking())
            .await
            .map_err(|e| ArchiveError::TaskJoin(e.to_string()))?
    }

    fn fetch_origin_blocking(&self) -> Result<(), ArchiveError> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote(ORIGIN)?;

        let mut callbacks = RemoteCallbacks::new();
        self.install_credentials(&mut callbacks);
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);

        remote.fetch(
            &[
                "+refs/heads/*:refs/remotes/origin/*",
                "+refs/tags/*:refs/tags/*",
            ],
            Some(&mut options),
            None,
        )?;
        debug!("fetched origin");
        Ok(())
    }

    fn install_credentials(&self, callbacks: &mut RemoteCallbacks<'_>) {
        if let Some(token) = self.auth.token.clone() {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext(FORGE_USER, &token)
            });
        }
    }
}

/// Whether a libgit2 error means "the ref already exists".
pub(crate) fn is_exists(err: &git2::Error) -> bool {
    err.code() == ErrorCode::Exists
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
