//! Per-branch write serialization.
//!
//! Writes to the object database are safe to parallelize across branches
//! but the read-stage-commit-push sequence on a single branch must not
//! race. The lock map hands out one binary async lock per branch name,
//! created lazily on first use.

use crate::config::DEFAULT_LOCK_PROGRESS_SECS;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;

/// Lazily-populated map from branch name to a binary lock.
///
/// Waiters log a progress message every five seconds but never time out.
#[derive(Debug)]
pub struct BranchLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    progress_interval: Duration,
}

impl BranchLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            progress_interval: Duration::from_secs(DEFAULT_LOCK_PROGRESS_SECS),
        }
    }

    /// Acquire the lock for `branch`, waiting as long as it takes.
    ///
    /// The returned guard must be held across the entire
    /// read-stage-commit-push sequence and releases the branch on drop,
    /// whether the write succeeded or failed.
    pub async fn acquire(&self, branch: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("branch lock map poisoned");
            Arc::clone(
                map.entry(branch.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let mut waited = Duration::ZERO;
        loop {
            match tokio::time::timeout(self.progress_interval, Arc::clone(&lock).lock_owned())
                .await
            {
                Ok(guard) => return guard,
                Err(_) => {
                    waited += self.progress_interval;
                    info!(
                        branch = branch,
                        waited_secs = waited.as_secs(),
                        "still waiting for branch lock"
                    );
                }
            }
        }
    }

    /// Number of branches that have been locked at least once.
    #[cfg(test)]
    pub fn known_branches(&self) -> usize {
        self.inner.lock().expect("branch lock map poisoned").len()
    }
}

impl Default for BranchLocks {
    fn default() -> Self {
        Self::new()
    }
}
