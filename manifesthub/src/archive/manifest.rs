//! Archiving of downloaded manifests.
//!
//! Each app owns one branch, named by its decimal app id. The branch tip
//! carries one `{depot}_{manifest}.manifest` blob per tracked depot and the
//! accumulated `Key.vdf` registry. Every archived `(app, depot, manifest)`
//! triple is pinned by a tag, and the tags are the authoritative
//! "have-manifest" index: a visible tag implies a visible commit.

use super::key_registry;
use super::store::{is_exists, ArchiveError, GitStore};
use super::types::{ManifestRecord, TagTriple, WriteOutcome};
use git2::{Commit, Repository, Tree};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_VDF: &str = "Key.vdf";
const BLOB_MODE: i32 = 0o100644;

/// The manifest side of the Git-backed object store.
#[derive(Clone, Debug)]
pub struct ManifestArchive {
    store: Arc<GitStore>,
}

impl ManifestArchive {
    pub fn new(store: Arc<GitStore>) -> Self {
        Self { store }
    }

    /// Whether the tag for this triple already exists locally.
    ///
    /// This is the cheap gate the downloader consults before spending any
    /// network work on a manifest.
    pub async fn has_manifest(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> Result<bool, ArchiveError> {
        let store = Arc::clone(&self.store);
        let triple = TagTriple {
            app_id,
            depot_id,
            manifest_id,
        };
        tokio::task::spawn_blocking(move || {
            let repo = store.repo()?;
            Ok(tag_exists(&repo, &triple.to_string()))
        })
        .await
        .map_err(|e| ArchiveError::TaskJoin(e.to_string()))?
    }

    /// Archive one manifest on its app branch.
    ///
    /// Holds the branch lock across the whole read-stage-commit-push
    /// sequence and re-checks the tag under the lock, so concurrent writers
    /// for the same triple collapse to a single commit.
    pub async fn write_manifest(
        &self,
        record: ManifestRecord,
    ) -> Result<WriteOutcome, ArchiveError> {
        let guard = self.store.locks().acquire(&record.branch_name()).await;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            write_manifest_blocking(&store, &record)
        })
        .await
        .map_err(|e| ArchiveError::TaskJoin(e.to_string()))?
    }

    /// Delete every tag superseded within its `(app, depot)` group.
    ///
    /// The tag whose target commit has the latest author time survives;
    /// the rest are deleted locally and on the remote. Per-tag failures are
    /// logged and skipped so one stale ref cannot wedge the whole pass.
    pub async fn prune_expired_tags(&self) -> Result<Vec<String>, ArchiveError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || prune_expired_tags_blocking(&store))
            .await
            .map_err(|e| ArchiveError::TaskJoin(e.to_string()))?
    }

    /// All well-formed `(app, depot, manifest)` triples currently tagged.
    pub async fn managed_triples(&self) -> Result<Vec<TagTriple>, ArchiveError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let repo = store.repo()?;
            let names = repo.tag_names(None)?;
            Ok(names.iter().flatten().filter_map(TagTriple::parse).collect())
        })
        .await
        .map_err(|e| ArchiveError::TaskJoin(e.to_string()))?
    }
}

fn tag_exists(repo: &Repository, tag_name: &str) -> bool {
    repo.refname_to_id(&format!("refs/tags/{tag_name}")).is_ok()
}

fn branch_tip<'r>(repo: &'r Repository, branch: &str) -> Result<Option<Commit<'r>>, ArchiveError> {
    match repo.refname_to_id(&format!("refs/heads/{branch}")) {
        Ok(oid) => Ok(Some(repo.find_commit(oid)?)),
        Err(_) => Ok(None),
    }
}

fn write_manifest_blocking(
    store: &GitStore,
    record: &ManifestRecord,
) -> Result<WriteOutcome, ArchiveError> {
    let repo = store.repo()?;
    let tag_name = record.tag_name();

    // Closes the TOCTOU window with concurrent writers of the same triple.
    if tag_exists(&repo, &tag_name) {
        debug!(tag = %tag_name, "manifest already archived");
        return Ok(WriteOutcome::AlreadyPresent);
    }

    let branch = record.branch_name();
    let tip = branch_tip(&repo, &branch)?;
    let prev_tree = match &tip {
        Some(commit) => Some(commit.tree()?),
        None => None,
    };

    let tree_oid = stage_record(&repo, prev_tree.as_ref(), record)?;

    if prev_tree.as_ref().map(Tree::id) == Some(tree_oid) {
        // The branch already carries exactly this content; only the tag is
        // missing. Pin the current tip, tolerating a tag that reappeared.
        let commit = tip.as_ref().map(Commit::id);
        if let Some(commit_oid) = commit {
            ensure_tag(store, &repo, &tag_name, commit_oid)?;
        }
        debug!(tag = %tag_name, "tree unchanged, tag pinned at current tip");
        return Ok(WriteOutcome::Unchanged);
    }

    let tree = repo.find_tree(tree_oid)?;
    let sig = GitStore::signature()?;
    let parents: Vec<&Commit> = tip.iter().collect();
    let message = format!(
        "Update {}_{}.manifest",
        record.depot_id, record.manifest_id
    );
    let commit_oid = repo.commit(
        Some(&format!("refs/heads/{branch}")),
        &sig,
        &sig,
        &message,
        &tree,
        &parents,
    )?;

    store.push(&repo, &format!("refs/heads/{branch}:refs/heads/{branch}"))?;
    ensure_tag(store, &repo, &tag_name, commit_oid)?;

    info!(
        app_id = record.app_id,
        depot_id = record.depot_id,
        manifest_id = record.manifest_id,
        "archived manifest"
    );
    Ok(WriteOutcome::Written)
}

/// Stage the record into a new tree derived from `prev_tree`.
///
/// Every existing entry whose `_`-prefix parses as this record's depot id is
/// dropped (one manifest per depot on the tip); entries with unparseable
/// prefixes are left alone. The key registry is upserted and the manifest
/// bytes go straight into the blob store.
fn stage_record(
    repo: &Repository,
    prev_tree: Option<&Tree>,
    record: &ManifestRecord,
) -> Result<git2::Oid, ArchiveError> {
    let mut builder = repo.treebuilder(prev_tree)?;

    if let Some(tree) = prev_tree {
        let mut superseded = Vec::new();
        for entry in tree.iter() {
            let Some(name) = entry.name() else { continue };
            if entry_depot_id(name) == Some(record.depot_id) {
                superseded.push(name.to_string());
            }
        }
        for name in &superseded {
            builder.remove(name)?;
        }
    }

    let existing_registry = match prev_tree.and_then(|t| t.get_name(KEY_VDF)) {
        Some(entry) => Some(String::from_utf8_lossy(repo.find_blob(entry.id())?.content()).into_owned()),
        None => None,
    };
    let registry = key_registry::upsert(
        existing_registry.as_deref(),
        record.depot_id,
        &hex::encode(record.depot_key),
    );
    let registry_oid = repo.blob(registry.as_bytes())?;
    builder.insert(KEY_VDF, registry_oid, BLOB_MODE)?;

    let manifest_oid = repo.blob(&record.manifest)?;
    builder.insert(&record.manifest_file_name(), manifest_oid, BLOB_MODE)?;

    Ok(builder.write()?)
}

/// Parse the depot id prefix of a tree entry name, if it has one.
fn entry_depot_id(name: &str) -> Option<u32> {
    let (prefix, _) = name.split_once('_')?;
    prefix.parse().ok()
}

/// Create the tag and push it. A tag that already exists is swallowed —
/// the triple is pinned either way — but the push still runs so the forge
/// sees it.
fn ensure_tag(
    store: &GitStore,
    repo: &Repository,
    tag_name: &str,
    commit_oid: git2::Oid,
) -> Result<(), ArchiveError> {
    match create_tag(repo, tag_name, commit_oid) {
        Ok(()) | Err(ArchiveError::TagExists(_)) => {}
        Err(e) => return Err(e),
    }
    store.push(repo, &format!("refs/tags/{tag_name}:refs/tags/{tag_name}"))
}

fn create_tag(repo: &Repository, tag_name: &str, commit_oid: git2::Oid) -> Result<(), ArchiveError> {
    let target = repo.find_object(commit_oid, None)?;
    let sig = GitStore::signature()?;
    match repo.tag(tag_name, &target, &sig, tag_name, false) {
        Ok(_) => Ok(()),
        Err(e) if is_exists(&e) => Err(ArchiveError::TagExists(tag_name.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn prune_expired_tags_blocking(store: &GitStore) -> Result<Vec<String>, ArchiveError> {
    let repo = store.repo()?;
    let names = repo.tag_names(None)?;

    // Group tags by (app, depot) with the target commit's author time.
    let mut groups: BTreeMap<(u32, u32), Vec<(i64, String)>> = BTreeMap::new();
    for name in names.iter().flatten() {
        let Some(triple) = TagTriple::parse(name) else {
            continue;
        };
        let Ok(reference) = repo.find_reference(&format!("refs/tags/{name}")) else {
            continue;
        };
        let Ok(commit) = reference.peel_to_commit() else {
            continue;
        };
        groups
            .entry((triple.app_id, triple.depot_id))
            .or_default()
            .push((commit.author().when().seconds(), name.to_string()));
    }

    let mut deleted = Vec::new();
    for ((app_id, depot_id), mut tags) in groups {
        if tags.len() <= 1 {
            continue;
        }
        // Keep the newest; name order breaks author-time ties deterministically.
        tags.sort();
        let keep = tags.pop();
        for (_, name) in tags {
            if let Err(e) = delete_tag(store, &repo, &name) {
                warn!(tag = %name, error = %e, "failed to prune tag");
                continue;
            }
            deleted.push(name);
        }
        if let Some((_, keep)) = keep {
            debug!(app_id, depot_id, tag = %keep, "kept newest tag for depot");
        }
    }

    if !deleted.is_empty() {
        info!(count = deleted.len(), "pruned superseded tags");
    }
    Ok(deleted)
}

fn delete_tag(store: &GitStore, repo: &Repository, name: &str) -> Result<(), ArchiveError> {
    repo.tag_delete(name)?;
    store.push(repo, &format!("+:refs/tags/{name}"))
}
