//! Tracking status report.
//!
//! After a run, the managed set (every app and depot pinned by a tag) is
//! compared against the touched set (every app the harvest actually saw
//! through an account's licenses). Apps fall into three buckets:
//!
//! - `Active`: managed and still visible to at least one account
//! - `Orphan`: managed but no longer visible to any account
//! - `AccessDenied`: visible but not managed, usually because every
//!   manifest request was denied
//!
//! The touched set is run-scoped: the downloader records each app it
//! enumerates, and nothing is persisted between runs.

use super::types::TagTriple;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

/// Run-scoped set of app ids the harvest enumerated.
///
/// Cloned into every downloader; cheap to record from concurrent tasks.
#[derive(Clone, Debug, Default)]
pub struct TouchedApps {
    inner: Arc<Mutex<BTreeSet<u32>>>,
}

impl TouchedApps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an account's licenses reference this app.
    pub fn record(&self, app_id: u32) {
        self.inner
            .lock()
            .expect("touched set poisoned")
            .insert(app_id);
    }

    /// Snapshot the recorded app ids.
    pub fn snapshot(&self) -> BTreeSet<u32> {
        self.inner.lock().expect("touched set poisoned").clone()
    }
}

/// The three-way classification rendered at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingReport {
    /// Managed and touched, with the managed depots per app
    active: BTreeMap<u32, BTreeSet<u32>>,
    /// Managed but not touched, with the managed depots per app
    orphan: BTreeMap<u32, BTreeSet<u32>>,
    /// Touched but not managed
    denied: BTreeSet<u32>,
}

impl TrackingReport {
    /// Classify the managed tags against the touched apps.
    pub fn build(managed: &[TagTriple], touched: &BTreeSet<u32>) -> Self {
        let mut depots_by_app: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for triple in managed {
            depots_by_app
                .entry(triple.app_id)
                .or_default()
                .insert(triple.depot_id);
        }

        let mut active = BTreeMap::new();
        let mut orphan = BTreeMap::new();
        for (app_id, depots) in depots_by_app {
            if touched.contains(&app_id) {
                active.insert(app_id, depots);
            } else {
                orphan.insert(app_id, depots);
            }
        }
        let denied = touched
            .iter()
            .copied()
            .filter(|app_id| !active.contains_key(app_id))
            .collect();

        Self {
            active,
            orphan,
            denied,
        }
    }

    /// Render the report as Markdown, one block per category.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Manifest tracking status");

        render_depot_block(&mut out, "Active", &self.active);
        render_depot_block(&mut out, "Orphan", &self.orphan);

        let _ = writeln!(out, "\n### AccessDenied ({})\n", self.denied.len());
        if self.denied.is_empty() {
            let _ = writeln!(out, "_None._");
        } else {
            let _ = writeln!(out, "| App |");
            let _ = writeln!(out, "| --- |");
            for app_id in &self.denied {
                let _ = writeln!(out, "| {app_id} |");
            }
        }
        out
    }

    pub fn active_apps(&self) -> impl Iterator<Item = u32> + '_ {
        self.active.keys().copied()
    }

    pub fn orphan_apps(&self) -> impl Iterator<Item = u32> + '_ {
        self.orphan.keys().copied()
    }

    pub fn denied_apps(&self) -> impl Iterator<Item = u32> + '_ {
        self.denied.iter().copied()
    }
}

fn render_depot_block(out: &mut String, title: &str, apps: &BTreeMap<u32, BTreeSet<u32>>) {
    let _ = writeln!(out, "\n### {title} ({})\n", apps.len());
    if apps.is_empty() {
        let _ = writeln!(out, "_None._");
        return;
    }
    let _ = writeln!(out, "| App | Depots |");
    let _ = writeln!(out, "| --- | --- |");
    for (app_id, depots) in apps {
        let depots = depots
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "| {app_id} | {depots} |");
    }
}
