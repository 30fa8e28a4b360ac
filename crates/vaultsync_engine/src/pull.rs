//! Pull reconciliation: merge remote changes into the vault.
//!
//! Runs without confirmation. Conflicts with pending local operations are
//! settled by [`crate::conflict::resolve`]; the log is adjusted so the next
//! push carries whatever the local side keeps.

use crate::conflict::{resolve, resolve_folder_removal, RemoteEvent, Resolution};
use crate::context::ReconcileContext;
use crate::error::{ItemFailure, SyncError, SyncPhase, SyncResult};
use crate::scheduler::{depth_batches, plan_minimal_deletes, run_bounded, BatchOrder};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use vaultsync_core::{
    dispose, list_recursive, path, EntryKind, LocalError, PendingOp, RemoteError, RemoteObject,
    SearchFilter,
};

/// What a pull did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Nothing changed remotely since the checkpoint.
    pub up_to_date: bool,
    /// Remote objects changed since the checkpoint.
    pub fetched: usize,
    /// Remote removals resolved to known paths.
    pub removed: usize,
    /// Files written locally.
    pub downloaded: usize,
    /// Folders created locally.
    pub folders_created: usize,
    /// Local entries deleted.
    pub deleted_local: usize,
    /// Paths where the local version was kept.
    pub kept_local: usize,
    /// Pending entries whose operation changed.
    pub flipped: usize,
    /// Internal files disposed of.
    pub internal_removed: usize,
    /// Items that failed locally.
    pub failures: Vec<ItemFailure>,
}

impl PullReport {
    fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            ..Self::default()
        }
    }

    /// Number of local writes performed.
    pub fn writes(&self) -> usize {
        self.downloaded + self.folders_created + self.deleted_local + self.internal_removed
    }

    fn fail(&mut self, ctx: &ReconcileContext, phase: SyncPhase, p: &str, e: impl std::fmt::Display) {
        let failure = ItemFailure::new(p, e);
        ctx.observer.failure(&format!("{phase}: {failure}"));
        self.failures.push(failure);
    }
}

enum DownloadError {
    Remote(RemoteError),
    Local(LocalError),
}

/// Merges remote changes since the stored checkpoint.
///
/// Does not touch the checkpoint; the caller advances it.
pub(crate) async fn reconcile(ctx: &ReconcileContext) -> SyncResult<PullReport> {
    let since = ctx.with_state(|s| s.checkpoint.clone());

    let mut changed: BTreeMap<String, RemoteObject> = BTreeMap::new();
    let bound = since.last_synced_at();
    for filter in [
        SearchFilter::modified_after(bound),
        SearchFilter::modified_after(bound).with_hidden(),
    ] {
        let found = ctx
            .remote
            .search(&filter)
            .await
            .map_err(|e| SyncError::remote(SyncPhase::Fetch, e))?;
        changed.extend(found.into_iter().map(|o| (o.id.clone(), o)));
    }
    // This device's own writes since the checkpoint come back from the search.
    ctx.with_state(|s| changed.retain(|_, o| !s.is_own_write(o)));

    let removed_ids: BTreeSet<String> = match since.changes_token() {
        Some(token) => ctx
            .remote
            .get_changes(token)
            .await
            .map_err(|e| SyncError::remote(SyncPhase::Fetch, e))?
            .into_iter()
            .filter(|c| c.removed && !changed.contains_key(&c.id))
            .map(|c| c.id)
            .collect(),
        None => BTreeSet::new(),
    };

    let relevant = changed
        .values()
        .filter(|o| o.path().is_some_and(|p| !ctx.config.is_snapshot(p)))
        .count();
    let mut removed_paths = ctx.with_state(|s| {
        removed_ids
            .iter()
            .filter_map(|id| s.index.remove_id(id))
            .collect::<BTreeSet<String>>()
    });
    if relevant == 0 && removed_paths.is_empty() {
        debug!("no remote changes");
        record_ids(ctx, changed.values(), &mut removed_paths);
        return Ok(PullReport::up_to_date());
    }

    let mut report = PullReport {
        fetched: relevant,
        removed: removed_paths.len(),
        ..PullReport::default()
    };

    // A pending delete for something already gone on both sides is redundant.
    for p in &removed_paths {
        if ctx.with_state(|s| s.log.get(p)) == Some(PendingOp::Delete)
            && ctx.local_kind(p).await.is_none()
        {
            ctx.with_state(|s| s.log.remove(p));
        }
    }

    record_ids(ctx, changed.values(), &mut removed_paths);

    let (internal, vault): (Vec<String>, Vec<String>) = removed_paths
        .into_iter()
        .partition(|p| ctx.config.is_internal(p));

    delete_phase(ctx, vault, &mut report).await;
    upsert_phase(ctx, changed.into_values().collect(), &mut report).await?;
    internal_cleanup(ctx, internal, &mut report).await;

    info!(
        fetched = report.fetched,
        removed = report.removed,
        downloaded = report.downloaded,
        deleted = report.deleted_local,
        "pull reconciled"
    );
    Ok(report)
}

/// Records fetched ids. An object that moved leaves its old path behind as
/// a removal.
fn record_ids<'a>(
    ctx: &ReconcileContext,
    objects: impl Iterator<Item = &'a RemoteObject>,
    removed: &mut BTreeSet<String>,
) {
    ctx.with_state(|s| {
        for object in objects {
            let Some(p) = object.path() else { continue };
            if let Some(previous) = s.index.path_of(&object.id) {
                if previous != p {
                    removed.insert(previous.to_string());
                }
            }
            s.index.record(object.id.clone(), p);
        }
        s.index.rebuild_inverse();
    });
}

/// Removes local entries whose remote object is gone.
async fn delete_phase(ctx: &ReconcileContext, removed: Vec<String>, report: &mut PullReport) {
    let mut candidates: Vec<(String, EntryKind)> = Vec::new();
    for p in removed {
        if let Some(kind) = ctx.local_kind(&p).await {
            candidates.push((p, kind));
        }
    }
    // Deepest first, so a kept child is known before its parent is judged.
    candidates.sort_by(|a, b| path::depth(&b.0).cmp(&path::depth(&a.0)).then(a.0.cmp(&b.0)));

    let mut doomed: BTreeMap<String, EntryKind> = BTreeMap::new();
    for (p, kind) in candidates {
        let (pending, remapped) = ctx.with_state(|s| (s.log.get(&p), s.index.id_of(&p).is_some()));
        let resolution = if kind.is_folder() && !remapped {
            let survivors = match list_recursive(ctx.local.as_ref(), &p).await {
                Ok(entries) => entries.iter().any(|e| !doomed.contains_key(&e.path)),
                Err(_) => true,
            };
            resolve_folder_removal(pending, survivors)
        } else {
            resolve(pending, kind, RemoteEvent::Removed { remapped })
        };

        match resolution {
            Resolution::DeleteLocal => {
                doomed.insert(p, kind);
            }
            Resolution::FlipToCreate => {
                debug!(path = %p, "removed remotely, keeping local copy as new");
                ctx.with_state(|s| s.log.set(p, PendingOp::Create));
                report.flipped += 1;
            }
            Resolution::ClearEntry => {
                ctx.with_state(|s| s.log.remove(&p));
            }
            _ => report.kept_local += 1,
        }
    }

    let tops = plan_minimal_deletes(doomed.keys().cloned());
    let results = run_bounded(tops, ctx.config.fan_out(), |p: String| {
        let kind = doomed.get(&p).copied().unwrap_or(EntryKind::File);
        async move { dispose(ctx.local.as_ref(), &p, kind).await }
    })
    .await;

    for (p, result) in results {
        match result {
            Ok(()) => {
                ctx.with_state(|s| {
                    s.log.remove_within(&p);
                    s.index.remove_within(&p);
                });
                report.deleted_local += 1;
            }
            Err(e) => report.fail(ctx, SyncPhase::LocalDelete, &p, e),
        }
    }
}

/// Creates folders and writes files changed remotely.
async fn upsert_phase(
    ctx: &ReconcileContext,
    changed: Vec<RemoteObject>,
    report: &mut PullReport,
) -> SyncResult<()> {
    let mut objects: Vec<RemoteObject> = changed
        .into_iter()
        .filter(|o| o.path().is_some_and(|p| !ctx.config.is_snapshot(p)))
        .collect();
    objects.sort_by(|a, b| {
        let (a, b) = (a.path().unwrap_or_default(), b.path().unwrap_or_default());
        path::depth(a).cmp(&path::depth(b)).then(a.cmp(b))
    });

    let mut folders: BTreeSet<String> = BTreeSet::new();
    let mut downloads: Vec<RemoteObject> = Vec::new();
    for object in objects {
        let p = object.path().unwrap_or_default().to_string();
        if ctx.config.is_internal(&p) {
            // Config objects are mirrored as-is, whatever the log says.
            if object.kind.is_folder() {
                folders.insert(p);
            } else {
                downloads.push(object);
            }
            continue;
        }

        let pending = ctx.with_state(|s| s.log.get(&p));
        match resolve(pending, object.kind, RemoteEvent::Changed) {
            Resolution::CreateFolder => {
                folders.insert(p);
            }
            Resolution::ClearEntry => {
                ctx.with_state(|s| s.log.remove(&p));
            }
            Resolution::Restore => {
                debug!(path = %p, "changed remotely, undoing local delete");
                ctx.with_state(|s| s.log.remove(&p));
                if object.kind.is_folder() {
                    folders.insert(p);
                } else {
                    downloads.push(object);
                }
            }
            Resolution::FlipToModify => {
                debug!(path = %p, "created on both sides, pushing local as update");
                ctx.with_state(|s| s.log.set(p, PendingOp::Modify));
                report.flipped += 1;
            }
            Resolution::Download => downloads.push(object),
            _ => report.kept_local += 1,
        }
    }

    // Missing local ancestors of anything being written.
    let wanted: Vec<String> = folders
        .iter()
        .cloned()
        .chain(downloads.iter().filter_map(|o| o.path().map(str::to_string)))
        .collect();
    for p in &wanted {
        for ancestor in path::ancestors(p) {
            if !folders.contains(ancestor) && ctx.local_kind(ancestor).await.is_none() {
                folders.insert(ancestor.to_string());
            }
        }
    }
    let mut missing = BTreeSet::new();
    for f in folders {
        if ctx.local_kind(&f).await.is_none() {
            missing.insert(f);
        }
    }

    // Local folder failures do not stop siblings or later depths; children of
    // a failed folder fail on their own.
    let fan_out = ctx.config.fan_out();
    for batch in depth_batches(missing, BatchOrder::Create) {
        let results = run_bounded(batch, fan_out, |p: String| async move {
            ctx.local.create_folder(&p).await
        })
        .await;
        for (p, result) in results {
            match result {
                Ok(()) => {
                    ctx.with_state(|s| s.log.remove(&p));
                    report.folders_created += 1;
                }
                Err(e) => {
                    forget_internal(ctx, &p);
                    report.fail(ctx, SyncPhase::LocalFolders, &p, e)
                }
            }
        }
    }

    let total = downloads.len();
    let done = AtomicUsize::new(0);
    let results = run_bounded(downloads, fan_out, |object: RemoteObject| {
        let done = &done;
        async move {
            let result = download(ctx, &object).await;
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.observer.progress(SyncPhase::LocalFiles, n, total);
            result
        }
    })
    .await;

    let mut remote_failures = Vec::new();
    for (object, result) in results {
        let p = object.path().unwrap_or_default();
        match result {
            Ok(()) => report.downloaded += 1,
            Err(DownloadError::Local(e)) => {
                forget_internal(ctx, p);
                report.fail(ctx, SyncPhase::LocalFiles, p, e)
            }
            Err(DownloadError::Remote(e)) => remote_failures.push((p.to_string(), e)),
        }
    }
    if !remote_failures.is_empty() {
        return Err(ctx.phase_failed(SyncPhase::LocalFiles, remote_failures));
    }
    Ok(())
}

/// Drops the id of an internal path that never made it to the vault, so a
/// later push does not take the remote copy for an orphan.
fn forget_internal(ctx: &ReconcileContext, p: &str) {
    if ctx.config.is_internal(p) {
        debug!(path = p, "forgetting unmirrored config object");
        ctx.with_state(|s| {
            s.index.remove_within(p);
        });
    }
}

async fn download(ctx: &ReconcileContext, object: &RemoteObject) -> Result<(), DownloadError> {
    let p = object.path().unwrap_or_default();
    let bytes = ctx
        .remote
        .get_file(&object.id)
        .await
        .map_err(DownloadError::Remote)?;
    let mtime = Some(object.modified_at);
    let exists = ctx
        .local
        .stat(p)
        .await
        .map_err(DownloadError::Local)?
        .is_some();
    let written = if exists {
        ctx.local.modify_file(p, &bytes, mtime).await
    } else {
        ctx.local.create_file(p, &bytes, mtime).await
    };
    written.map_err(DownloadError::Local)?;
    debug!(path = p, bytes = bytes.len(), "downloaded");
    Ok(())
}

/// Disposes of internal files removed remotely, then prunes emptied folders.
async fn internal_cleanup(ctx: &ReconcileContext, removed: Vec<String>, report: &mut PullReport) {
    let mut present = Vec::new();
    for p in removed {
        if ctx.config.is_snapshot(&p) {
            continue;
        }
        if let Some(kind) = ctx.local_kind(&p).await {
            present.push((p, kind));
        }
    }
    if present.is_empty() {
        return;
    }
    present.sort_by(|a, b| path::depth(&b.0).cmp(&path::depth(&a.0)).then(a.0.cmp(&b.0)));

    let mut parents: BTreeSet<String> = BTreeSet::new();
    for (p, kind) in present {
        // A folder disposed earlier may already have taken this one along.
        if ctx.local_kind(&p).await.is_none() {
            continue;
        }
        match dispose(ctx.local.as_ref(), &p, kind).await {
            Ok(()) => {
                report.internal_removed += 1;
                parents.extend(
                    path::ancestors(&p)
                        .filter(|a| ctx.config.is_internal(a) && *a != ctx.config.config_dir)
                        .map(str::to_string),
                );
            }
            Err(e) => report.fail(ctx, SyncPhase::InternalCleanup, &p, e),
        }
    }

    let mut parents: Vec<String> = parents.into_iter().collect();
    parents.sort_by(|a, b| path::depth(b).cmp(&path::depth(a)).then(a.cmp(b)));
    for dir in parents {
        let empty = matches!(ctx.local.list(&dir).await, Ok(children) if children.is_empty());
        if empty {
            match ctx.local.rmdir(&dir, false).await {
                Ok(()) => debug!(path = %dir, "pruned empty folder"),
                Err(e) => report.fail(ctx, SyncPhase::InternalCleanup, &dir, e),
            }
        }
    }
}
