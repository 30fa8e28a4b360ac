//! Push reconciliation: drain the operation log to the remote.

use crate::context::{ReconcileContext, SyncSession};
use crate::error::{ItemFailure, SyncError, SyncPhase, SyncResult};
use crate::pull::{self, PullReport};
use crate::review::{PushReview, ReviewDecision, RevertTarget};
use crate::scheduler::{plan_minimal_deletes, run_bounded};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use vaultsync_core::{
    dispose, list_recursive, path, EntryKind, LocalError, PendingEntry, PendingOp, RemoteError,
    SearchFilter, SyncSettings,
};

/// What a push did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Entries undone at review.
    pub reverted: usize,
    /// Result of the pull that ran first.
    pub pull: PullReport,
    /// Remote objects deleted (top-most only).
    pub deleted_remote: usize,
    /// Remote folders created.
    pub folders_created: usize,
    /// New remote files.
    pub uploaded: usize,
    /// Remote files overwritten.
    pub updated: usize,
    /// Config objects written.
    pub config_synced: usize,
}

impl PushReport {
    /// Number of remote writes, snapshot excluded.
    pub fn remote_writes(&self) -> usize {
        self.deleted_remote + self.folders_created + self.uploaded + self.updated + self.config_synced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Uploaded,
    Updated,
}

enum UploadError {
    Local(LocalError),
    Remote(RemoteError),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Local(e) => e.fmt(f),
            UploadError::Remote(e) => e.fmt(f),
        }
    }
}

/// Runs a full push. On success the checkpoint moves to the session start
/// and token.
pub(crate) async fn run(
    ctx: &ReconcileContext,
    review: &dyn PushReview,
    session: SyncSession,
) -> SyncResult<PushReport> {
    let mut report = PushReport::default();

    let entries = pending_entries(ctx).await;
    match review.review(&entries) {
        ReviewDecision::Cancel => return Err(SyncError::Cancelled),
        ReviewDecision::Proceed { revert } if !revert.is_empty() => {
            report.reverted = revert_entries(ctx, &entries, &revert).await?;
        }
        ReviewDecision::Proceed { .. } => {}
    }
    ctx.ensure_root().await?;

    report.pull = pull::reconcile(ctx).await?;

    report.deleted_remote = push_deletes(ctx).await?;
    let (folders, files, modifies) = plan_uploads(ctx).await;
    report.folders_created = ctx
        .create_remote_folders(folders, SyncPhase::RemoteFolders)
        .await?;

    for (phase, items) in [(SyncPhase::RemoteFiles, files), (SyncPhase::RemoteModify, modifies)] {
        let (uploaded, updated) = upload_all(ctx, items, phase).await?;
        report.uploaded += uploaded;
        report.updated += updated;
    }

    report.config_synced = sync_config(ctx).await?;

    let folders = ctx.unindexed_ancestors([ctx.config.snapshot_path.as_str()]);
    ctx.create_remote_folders(folders, SyncPhase::Snapshot).await?;

    upload_snapshot(ctx, &session).await?;
    ctx.with_state(|s| s.commit(session.started_at, session.token))?;

    info!(
        deleted = report.deleted_remote,
        folders = report.folders_created,
        uploaded = report.uploaded,
        updated = report.updated,
        config = report.config_synced,
        "push complete"
    );
    Ok(report)
}

/// The log as pending entries, in path order.
///
/// Kinds come from the vault; an entry that is gone is a folder if the index
/// knows anything below it.
async fn pending_entries(ctx: &ReconcileContext) -> Vec<PendingEntry> {
    let snapshot = ctx.with_state(|s| s.log.snapshot());
    let mut entries = Vec::with_capacity(snapshot.len());
    for (p, op) in snapshot {
        let kind = match ctx.local_kind(&p).await {
            Some(kind) => kind,
            None => {
                let has_children =
                    ctx.with_state(|s| s.index.iter().any(|(_, q)| path::is_descendant(q, &p)));
                if has_children {
                    EntryKind::Folder
                } else {
                    EntryKind::File
                }
            }
        };
        entries.push(PendingEntry::new(p, op, kind));
    }
    entries
}

/// Undoes the chosen entries locally and drops them from the log.
async fn revert_entries(
    ctx: &ReconcileContext,
    entries: &[PendingEntry],
    targets: &[RevertTarget],
) -> SyncResult<usize> {
    let chosen: Vec<&PendingEntry> = entries
        .iter()
        .filter(|e| targets.iter().any(|t| t.covers(&e.path)))
        .collect();

    // Local creations go deepest first, restorations shallowest first.
    let mut creates: Vec<&PendingEntry> =
        chosen.iter().copied().filter(|e| e.op == PendingOp::Create).collect();
    creates.sort_by_key(|e| std::cmp::Reverse(path::depth(&e.path)));
    let mut restores: Vec<&PendingEntry> =
        chosen.iter().copied().filter(|e| e.op != PendingOp::Create).collect();
    restores.sort_by_key(|e| path::depth(&e.path));

    let mut failures = Vec::new();
    let mut reverted = 0;
    for entry in creates.into_iter().chain(restores) {
        let result = match entry.op {
            PendingOp::Create => {
                if ctx.local_kind(&entry.path).await.is_some() {
                    dispose(ctx.local.as_ref(), &entry.path, entry.kind)
                        .await
                        .map_err(|e| e.to_string())
                } else {
                    Ok(())
                }
            }
            PendingOp::Delete | PendingOp::Modify => restore(ctx, entry).await,
        };
        match result {
            Ok(()) => {
                debug!(path = %entry.path, op = %entry.op, "reverted");
                ctx.with_state(|s| s.log.remove(&entry.path));
                reverted += 1;
            }
            Err(message) => failures.push(ItemFailure::new(entry.path.clone(), message)),
        }
    }

    if !failures.is_empty() {
        for failure in &failures {
            ctx.observer.failure(&format!("{}: {failure}", SyncPhase::Revert));
        }
        return Err(SyncError::PhaseFailed {
            phase: SyncPhase::Revert,
            failures,
        });
    }
    Ok(reverted)
}

/// Brings a deleted or modified entry back to its remote state.
async fn restore(ctx: &ReconcileContext, entry: &PendingEntry) -> Result<(), String> {
    let id = ctx
        .with_state(|s| s.index.id_of(&entry.path).map(str::to_string))
        .ok_or_else(|| "no remote copy to restore from".to_string())?;

    if entry.kind.is_folder() {
        return ctx
            .local
            .create_folder(&entry.path)
            .await
            .map_err(|e| e.to_string());
    }

    let meta = ctx
        .remote
        .get_file_metadata(&id)
        .await
        .map_err(|e| e.to_string())?;
    let bytes = ctx.remote.get_file(&id).await.map_err(|e| e.to_string())?;
    let exists = ctx.local_kind(&entry.path).await.is_some();
    let written = if exists {
        ctx.local
            .modify_file(&entry.path, &bytes, Some(meta.modified_at))
            .await
    } else {
        ctx.local
            .create_file(&entry.path, &bytes, Some(meta.modified_at))
            .await
    };
    written.map_err(|e| e.to_string())
}

/// Deletes remote objects for pending deletes and orphaned config objects.
///
/// A config object is orphaned when this device mirrored it under the same
/// id and the local copy is gone. Objects it never mirrored are left alone.
///
/// One batch call; a failure leaves every delete entry in place.
async fn push_deletes(ctx: &ReconcileContext) -> SyncResult<usize> {
    let deletes: Vec<String> = ctx.with_state(|s| s.log.paths_with(PendingOp::Delete));
    let mut targets: BTreeMap<String, String> = ctx.with_state(|s| {
        deletes
            .iter()
            .filter_map(|p| s.index.id_of(p).map(|id| (p.clone(), id.to_string())))
            .collect()
    });

    let configs = ctx
        .remote
        .search(&SearchFilter::config_objects())
        .await
        .map_err(|e| SyncError::remote(SyncPhase::RemoteDelete, e))?;
    for object in configs {
        let Some(p) = object.path() else { continue };
        // The snapshot and its folders exist only remotely.
        if path::is_within(&ctx.config.snapshot_path, p) {
            continue;
        }
        let mirrored = ctx.with_state(|s| s.index.id_of(p) == Some(object.id.as_str()));
        if !mirrored || ctx.local_kind(p).await.is_some() {
            continue;
        }
        debug!(path = p, "config object has no local counterpart");
        targets.insert(p.to_string(), object.id.clone());
    }

    let tops = plan_minimal_deletes(targets.keys().cloned());
    let ids: Vec<String> = tops
        .iter()
        .filter_map(|p| targets.get(p).cloned())
        .collect();
    if !ids.is_empty() {
        ctx.remote
            .batch_delete(&ids)
            .await
            .map_err(|e| SyncError::remote(SyncPhase::RemoteDelete, e))?;
    }

    ctx.with_state(|s| {
        for top in &tops {
            s.index.remove_within(top);
        }
        for p in &deletes {
            if s.log.get(p) == Some(PendingOp::Delete) {
                s.log.remove(p);
            }
        }
    });
    ctx.observer
        .progress(SyncPhase::RemoteDelete, ids.len(), ids.len());
    Ok(ids.len())
}

type Upload = (String, Option<PendingOp>);

/// Splits pending creates and modifies into remote folders to create, new
/// files and changed files.
async fn plan_uploads(ctx: &ReconcileContext) -> (BTreeSet<String>, Vec<Upload>, Vec<Upload>) {
    let pending: Vec<(String, PendingOp)> = ctx.with_state(|s| {
        s.log
            .iter()
            .filter(|(p, op)| *op != PendingOp::Delete && !ctx.config.is_internal(p))
            .map(|(p, op)| (p.to_string(), op))
            .collect()
    });

    let mut folders = BTreeSet::new();
    let mut files = Vec::new();
    let mut modifies = Vec::new();
    for (p, op) in pending {
        match (ctx.local_kind(&p).await, op) {
            (Some(EntryKind::Folder), _) => {
                folders.insert(p);
            }
            (Some(EntryKind::File), PendingOp::Create) => files.push((p, Some(op))),
            (Some(EntryKind::File), _) => modifies.push((p, Some(op))),
            (None, _) => {
                debug!(path = %p, "pending entry vanished locally, dropping");
                ctx.with_state(|s| s.log.remove(&p));
            }
        }
    }

    let ancestors = ctx.unindexed_ancestors(
        folders
            .iter()
            .map(String::as_str)
            .chain(files.iter().chain(&modifies).map(|(p, _)| p.as_str())),
    );
    folders.extend(ancestors);
    (folders, files, modifies)
}

/// Uploads files with bounded concurrency.
///
/// A path with a remote id is updated in place; others are created under
/// their parent's id. Returns `(uploaded, updated)`.
async fn upload_all(
    ctx: &ReconcileContext,
    items: Vec<Upload>,
    phase: SyncPhase,
) -> SyncResult<(usize, usize)> {
    if items.is_empty() {
        return Ok((0, 0));
    }
    let total = items.len();
    let done = AtomicUsize::new(0);
    let results = run_bounded(items, ctx.config.fan_out(), |(p, op): Upload| {
        let done = &done;
        async move {
            let result = upload(ctx, &p, op).await;
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.observer.progress(phase, n, total);
            result
        }
    })
    .await;

    let (mut uploaded, mut updated) = (0, 0);
    let mut failed = Vec::new();
    for ((p, _), result) in results {
        match result {
            Ok(Written::Uploaded) => uploaded += 1,
            Ok(Written::Updated) => updated += 1,
            Err(e) => failed.push((p, e)),
        }
    }
    if !failed.is_empty() {
        return Err(ctx.phase_failed(phase, failed));
    }
    Ok((uploaded, updated))
}

async fn upload(ctx: &ReconcileContext, p: &str, op: Option<PendingOp>) -> Result<Written, UploadError> {
    let bytes = ctx.local.read(p).await.map_err(UploadError::Local)?;
    let mtime = ctx.write_mtime(p).await;

    let existing = match ctx.with_state(|s| s.index.id_of(p).map(str::to_string)) {
        Some(id) => Some(id),
        // An unindexed config file may already exist remotely, written by a
        // device this one never pulled it from.
        None if ctx.config.is_internal(p) => {
            ctx.find_config_object(p).await.map_err(UploadError::Remote)?
        }
        None => None,
    };
    let written = match existing {
        Some(id) => {
            ctx.remote
                .update_file(&id, Some(bytes), Some(mtime))
                .await
                .map_err(UploadError::Remote)?;
            ctx.record_own_write(&id, mtime);
            ctx.with_state(|s| s.index.record(id, p));
            Written::Updated
        }
        None => {
            let parent = ctx.parent_id(p).ok_or_else(|| {
                UploadError::Remote(RemoteError::NotFound(format!("parent of {p}")))
            })?;
            let id = ctx
                .remote
                .upload_file(
                    bytes,
                    path::file_name(p),
                    Some(&parent),
                    ctx.properties(p),
                    Some(mtime),
                )
                .await
                .map_err(UploadError::Remote)?;
            ctx.record_own_write(&id, mtime);
            ctx.with_state(|s| s.index.record(id, p));
            Written::Uploaded
        }
    };

    // A local event may have replaced the entry while the upload ran.
    if let Some(op) = op {
        ctx.with_state(|s| {
            if s.log.get(p) == Some(op) {
                s.log.remove(p);
            }
        });
    }
    debug!(path = p, ?written, "pushed");
    Ok(written)
}

/// Pushes internal config files changed since the checkpoint.
async fn sync_config(ctx: &ReconcileContext) -> SyncResult<usize> {
    let dir = ctx.config.config_dir.clone();
    if dir.is_empty() || ctx.local_kind(&dir).await != Some(EntryKind::Folder) {
        return Ok(0);
    }
    let since = ctx.with_state(|s| s.checkpoint.last_synced_at());
    let entries = list_recursive(ctx.local.as_ref(), &dir).await?;

    let files: Vec<Upload> = ctx.with_state(|s| {
        entries
            .iter()
            .filter(|e| e.kind.is_file() && !ctx.config.is_snapshot(&e.path))
            .filter(|e| s.index.id_of(&e.path).is_none() || e.modified_at > since)
            .map(|e| (e.path.clone(), None))
            .collect()
    });
    if files.is_empty() {
        return Ok(0);
    }

    let folders = ctx.unindexed_ancestors(files.iter().map(|(p, _)| p.as_str()));
    let created = ctx.create_remote_folders(folders, SyncPhase::Config).await?;
    let (uploaded, updated) = upload_all(ctx, files, SyncPhase::Config).await?;
    Ok(created + uploaded + updated)
}

/// Uploads the state snapshot as it will stand once the push commits.
async fn upload_snapshot(ctx: &ReconcileContext, session: &SyncSession) -> SyncResult<()> {
    let snapshot_path = ctx.config.snapshot_path.clone();
    let synced_at = session.started_at;
    let settings: SyncSettings = ctx.with_state(|s| {
        let mut checkpoint = s.checkpoint.clone();
        checkpoint
            .advance(synced_at, session.token.as_str())
            .map(|()| SyncSettings::capture(s.refresh_token.clone(), &s.log, &s.index, &checkpoint))
    })?;
    let bytes = settings.to_snapshot_bytes()?;

    let known = ctx.with_state(|s| s.index.id_of(&snapshot_path).map(str::to_string));
    let existing = match known {
        Some(id) => Some(id),
        // A fresh device finds the snapshot another device wrote.
        None => ctx
            .find_config_object(&snapshot_path)
            .await
            .map_err(|e| SyncError::remote(SyncPhase::Snapshot, e))?,
    };

    let id = match existing {
        Some(id) => ctx
            .remote
            .update_file(&id, Some(bytes), Some(synced_at))
            .await,
        None => {
            let parent = ctx.parent_id(&snapshot_path);
            ctx.remote
                .upload_file(
                    bytes,
                    path::file_name(&snapshot_path),
                    parent.as_deref(),
                    ctx.properties(&snapshot_path),
                    Some(synced_at),
                )
                .await
        }
    }
    .map_err(|e| SyncError::remote(SyncPhase::Snapshot, e))?;
    ctx.record_own_write(&id, synced_at);
    ctx.with_state(|s| s.index.record(id, snapshot_path));
    Ok(())
}
