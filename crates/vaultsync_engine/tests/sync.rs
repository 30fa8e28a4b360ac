//! End-to-end push and pull scenarios over the in-memory stores.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vaultsync_core::{
    ChangeEntry, DisposalPolicy, EntryKind, LocalStore, ObjectProperties, PendingEntry, PendingOp,
    RemoteObject, RemoteResult, RemoteStore, SearchFilter, SyncSettings,
};
use vaultsync_engine::{
    ReviewDecision, RevertTarget, SyncConfig, SyncError, SyncPhase, SyncState,
};
use vaultsync_store::{LocalWrite, MemoryRemoteStore, RemoteOp};
use vaultsync_testkit::prelude::*;

fn vault_objects(remote: &MemoryRemoteStore) -> Vec<RemoteObject> {
    remote.objects().into_iter().filter(|o| !o.is_config()).collect()
}

fn tagged(remote: &MemoryRemoteStore, p: &str) -> usize {
    remote
        .objects()
        .iter()
        .filter(|o| o.path() == Some(p))
        .count()
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_uploads_new_file() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("notes/a.md", b"hello");

    let report = a.engine.push().await.unwrap();

    assert_eq!(report.folders_created, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(tagged(&cloud.remote, "notes/a.md"), 1);
    assert_eq!(cloud.remote.content_at("notes/a.md").unwrap(), b"hello");

    let object = cloud.remote.find_by_path("notes/a.md").unwrap();
    assert_eq!(a.engine.remote_id("notes/a.md"), Some(object.id));
    assert!(a.engine.pending().is_empty());
    assert_eq!(a.engine.state(), SyncState::Synced);
    assert!(!a.engine.checkpoint().is_initial());
}

#[tokio::test]
async fn push_creates_folders_before_files() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a/b/c/deep.md", b"x");

    a.engine.push().await.unwrap();

    for p in ["a", "a/b", "a/b/c", "a/b/c/deep.md"] {
        assert_eq!(tagged(&cloud.remote, p), 1, "{p}");
    }
    assert_eq!(cloud.remote.call_count(RemoteOp::CreateFolder), 4); // three + config dir
}

#[tokio::test]
async fn second_push_only_refreshes_snapshot() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("notes/a.md", b"hello");
    a.engine.push().await.unwrap();

    let folders = cloud.remote.call_count(RemoteOp::CreateFolder);
    let uploads = cloud.remote.call_count(RemoteOp::UploadFile);
    let updates = cloud.remote.call_count(RemoteOp::UpdateFile);

    let report = a.engine.push().await.unwrap();

    assert!(report.pull.up_to_date);
    assert_eq!(report.remote_writes(), 0);
    assert_eq!(cloud.remote.call_count(RemoteOp::CreateFolder), folders);
    assert_eq!(cloud.remote.call_count(RemoteOp::UploadFile), uploads);
    assert_eq!(cloud.remote.call_count(RemoteOp::UpdateFile), updates + 1);
    assert_eq!(cloud.remote.call_count(RemoteOp::BatchDelete), 0);
}

#[tokio::test]
async fn modify_updates_in_place() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"one");
    a.engine.push().await.unwrap();
    let id = a.engine.remote_id("a.md").unwrap();

    a.write("a.md", b"two");
    assert_eq!(a.engine.pending(), vec![("a.md".to_string(), PendingOp::Modify)]);
    let report = a.engine.push().await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(cloud.remote.content(&id).unwrap(), b"two");
    assert_eq!(tagged(&cloud.remote, "a.md"), 1);
}

#[tokio::test]
async fn rename_moves_remote_object() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("old.md", b"body");
    a.engine.push().await.unwrap();

    a.rename("old.md", "new.md").await;
    assert_eq!(
        a.engine.pending(),
        vec![
            ("new.md".to_string(), PendingOp::Create),
            ("old.md".to_string(), PendingOp::Delete),
        ]
    );
    a.engine.push().await.unwrap();

    assert!(cloud.remote.find_by_path("old.md").is_none());
    assert_eq!(cloud.remote.content_at("new.md").unwrap(), b"body");
    assert!(a.engine.remote_id("old.md").is_none());
    assert!(a.engine.pending().is_empty());
}

#[tokio::test]
async fn folder_delete_is_one_remote_call() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("proj/a.md", b"a");
    a.write("proj/sub/b.md", b"b");
    a.engine.push().await.unwrap();

    a.delete("proj").await;
    let report = a.engine.push().await.unwrap();

    assert_eq!(report.deleted_remote, 1);
    assert_eq!(cloud.remote.call_count(RemoteOp::BatchDelete), 1);
    assert!(vault_objects(&cloud.remote).is_empty());
    assert!(a.engine.remote_id("proj/sub/b.md").is_none());
}

#[tokio::test]
async fn create_then_delete_never_reaches_remote() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("scratch.md", b"tmp");
    a.delete("scratch.md").await;
    assert!(a.engine.pending().is_empty());

    a.engine.push().await.unwrap();
    assert!(vault_objects(&cloud.remote).is_empty());
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn pull_creates_parents_before_children() {
    let cloud = TestCloud::new();
    cloud.remote.put_folder("X");
    cloud.remote.put_file("X/y.md", b"why");
    let b = cloud.device();

    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.folders_created, 1);
    assert_eq!(report.downloaded, 1);
    let journal = b.local.journal();
    let folder = journal
        .iter()
        .position(|w| *w == LocalWrite::CreateFolder("X".into()))
        .unwrap();
    let file = journal
        .iter()
        .position(|w| *w == LocalWrite::CreateFile("X/y.md".into()))
        .unwrap();
    assert!(folder < file);
    assert_eq!(b.text("X/y.md").unwrap(), "why");
    assert!(b.engine.pending().is_empty());
}

#[tokio::test]
async fn pull_twice_writes_nothing_second_time() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("notes/a.md", b"hello");
    a.write("notes/b.md", b"world");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    let first = b.engine.pull(false).await.unwrap();
    assert_eq!(first.downloaded, 2);
    assert_eq!(b.text("notes/b.md").unwrap(), "world");

    b.local.clear_journal();
    let remote_writes = cloud.remote.write_count();
    let second = b.engine.pull(false).await.unwrap();

    assert!(second.up_to_date);
    assert_eq!(b.local.write_count(), 0);
    assert_eq!(cloud.remote.write_count(), remote_writes);
    assert!(b.observer.saw("already up to date"));
}

#[tokio::test]
async fn pull_preserves_remote_mtime() {
    let cloud = TestCloud::new();
    cloud.remote.put_file("a.md", b"x");
    let remote_mtime = cloud.remote.find_by_path("a.md").unwrap().modified_at;
    let b = cloud.device();

    b.engine.pull(false).await.unwrap();

    assert_eq!(b.local.modified_at("a.md"), Some(remote_mtime));
}

#[tokio::test]
async fn remote_delete_reaches_other_device() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("n.md", b"note");
    a.engine.push().await.unwrap();
    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    assert!(b.local.kind("n.md").is_some());

    a.delete("n.md").await;
    a.engine.push().await.unwrap();
    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.deleted_local, 1);
    assert!(b.local.kind("n.md").is_none());
    assert_eq!(b.local.trashed(), vec!["n.md".to_string()]);
    assert!(b.engine.remote_id("n.md").is_none());
}

#[tokio::test]
async fn permanent_policy_skips_the_trash() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("n.md", b"note");
    a.write("proj/a.md", b"a");
    a.engine.push().await.unwrap();
    let b = cloud.device_with_policy(DisposalPolicy::Permanent);
    b.engine.pull(false).await.unwrap();

    a.delete("n.md").await;
    a.delete("proj").await;
    a.engine.push().await.unwrap();
    b.local.clear_journal();
    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.deleted_local, 2);
    assert!(b.local.trashed().is_empty());
    assert!(b.local.system_trashed().is_empty());
    let journal = b.local.journal();
    assert!(journal.contains(&LocalWrite::Remove("n.md".into())));
    assert!(journal.contains(&LocalWrite::Rmdir("proj".into())));
    assert!(b.local.kind("proj/a.md").is_none());
}

#[tokio::test]
async fn system_trash_policy_uses_the_system_trash() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("n.md", b"note");
    a.engine.push().await.unwrap();
    let b = cloud.device_with_policy(DisposalPolicy::SystemTrash);
    b.engine.pull(false).await.unwrap();

    a.delete("n.md").await;
    a.engine.push().await.unwrap();
    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.deleted_local, 1);
    assert_eq!(b.local.system_trashed(), vec!["n.md".to_string()]);
    assert!(b.local.trashed().is_empty());
}

#[tokio::test]
async fn edits_round_trip_between_devices() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("shared.md", b"v1");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    b.write("shared.md", b"v2");
    b.engine.push().await.unwrap();

    let report = a.engine.pull(false).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(a.text("shared.md").unwrap(), "v2");
}

#[tokio::test]
async fn silent_pull_leaves_checkpoint() {
    let cloud = TestCloud::new();
    cloud.remote.put_file("a.md", b"x");
    let b = cloud.device();

    let report = b.engine.pull(true).await.unwrap();

    assert_eq!(report.downloaded, 1);
    assert!(b.engine.checkpoint().is_initial());
    assert!(b.observer.notices().is_empty());
}

// ============================================================================
// Checkpoint timing
// ============================================================================

/// Remote on which another device writes `late.md` while the first download
/// is in flight.
struct WriteDuringDownload {
    inner: Arc<MemoryRemoteStore>,
    fired: AtomicBool,
}

#[async_trait]
impl RemoteStore for WriteDuringDownload {
    async fn is_reachable(&self) -> bool {
        self.inner.is_reachable().await
    }

    async fn refresh_credentials(&self) -> RemoteResult<()> {
        self.inner.refresh_credentials().await
    }

    async fn ensure_root(&self, name: &str) -> RemoteResult<String> {
        self.inner.ensure_root(name).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        self.inner.create_folder(name, parent, properties, mtime).await
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        self.inner
            .upload_file(bytes, name, parent, properties, mtime)
            .await
    }

    async fn update_file(
        &self,
        id: &str,
        bytes: Option<Vec<u8>>,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        self.inner.update_file(id, bytes, mtime).await
    }

    async fn batch_delete(&self, ids: &[String]) -> RemoteResult<()> {
        self.inner.batch_delete(ids).await
    }

    async fn get_file(&self, id: &str) -> RemoteResult<Vec<u8>> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.inner.put_file("late.md", b"late");
        }
        self.inner.get_file(id).await
    }

    async fn get_file_metadata(&self, id: &str) -> RemoteResult<RemoteObject> {
        self.inner.get_file_metadata(id).await
    }

    async fn search(&self, filter: &SearchFilter) -> RemoteResult<Vec<RemoteObject>> {
        self.inner.search(filter).await
    }

    async fn get_changes(&self, token: &str) -> RemoteResult<Vec<ChangeEntry>> {
        self.inner.get_changes(token).await
    }

    async fn start_page_token(&self) -> RemoteResult<String> {
        self.inner.start_page_token().await
    }
}

#[tokio::test]
async fn edit_landing_mid_pull_arrives_next_pull() {
    let cloud = TestCloud::new();
    cloud.remote.put_file("early.md", b"early");
    let b = cloud.device_through(Arc::new(WriteDuringDownload {
        inner: cloud.remote.clone(),
        fired: AtomicBool::new(false),
    }));

    let first = b.engine.pull(false).await.unwrap();
    assert_eq!(first.downloaded, 1);
    assert!(cloud.remote.find_by_path("late.md").is_some());
    assert!(b.local.kind("late.md").is_none());

    let second = b.engine.pull(false).await.unwrap();
    assert!(!second.up_to_date);
    assert_eq!(second.downloaded, 1);
    assert_eq!(b.text("late.md").unwrap(), "late");
}

#[tokio::test]
async fn pushed_objects_are_not_pulled_back() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("notes/a.md", b"hello");
    a.local.add_file(".vaultsync/plugins.json", b"{}");
    a.engine.push().await.unwrap();
    a.local.clear_journal();

    let report = a.engine.pull(false).await.unwrap();

    assert!(report.up_to_date);
    assert_eq!(a.local.write_count(), 0);
}

#[tokio::test]
async fn up_to_date_pull_moves_only_the_token() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    a.engine.push().await.unwrap();
    a.delete("a.md").await;
    a.engine.push().await.unwrap();
    let before = a.engine.checkpoint();

    // The change feed still holds the removal this device made itself.
    let report = a.engine.pull(false).await.unwrap();

    assert!(report.up_to_date);
    let after = a.engine.checkpoint();
    assert_eq!(after.last_synced_at(), before.last_synced_at());
    assert_ne!(after.changes_token(), before.changes_token());
    let latest = cloud.remote.start_page_token().await.unwrap();
    assert_eq!(after.changes_token(), Some(latest.as_str()));
}

// ============================================================================
// Config objects and the state snapshot
// ============================================================================

#[tokio::test]
async fn config_files_follow_the_vault() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.local.add_file(".vaultsync/plugins.json", b"{}");
    a.write("a.md", b"x");

    let report = a.engine.push().await.unwrap();
    assert_eq!(report.config_synced, 2);
    let object = cloud.remote.find_by_path(".vaultsync/plugins.json").unwrap();
    assert!(object.is_config());

    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    assert_eq!(b.local.content(".vaultsync/plugins.json").unwrap(), b"{}");

    a.local.remove(".vaultsync/plugins.json").await.unwrap();
    a.engine.push().await.unwrap();
    assert!(cloud.remote.find_by_path(".vaultsync/plugins.json").is_none());
    assert!(cloud.remote.find_by_path(".vaultsync/sync-state.json").is_some());

    let report = b.engine.pull(false).await.unwrap();
    assert_eq!(report.internal_removed, 1);
    assert!(b.local.kind(".vaultsync/plugins.json").is_none());
}

#[tokio::test]
async fn internal_events_are_not_logged() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write(".vaultsync/workspace.json", b"{}");
    assert!(a.engine.pending().is_empty());
}

#[tokio::test]
async fn snapshot_mirrors_committed_state() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    a.engine.push().await.unwrap();

    let bytes = cloud.remote.content_at(".vaultsync/sync-state.json").unwrap();
    let snapshot = SyncSettings::from_snapshot_bytes(&bytes).unwrap();
    let checkpoint = a.engine.checkpoint();

    assert_eq!(snapshot.last_synced_at, checkpoint.last_synced_at());
    assert_eq!(Some(snapshot.changes_token.as_str()), checkpoint.changes_token());
    assert!(snapshot.operations.is_empty());
    assert!(snapshot.drive_id_to_path.values().any(|p| p == "a.md"));

    // The snapshot itself is never written into a vault.
    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    assert!(b.local.kind(".vaultsync/sync-state.json").is_none());
}

#[tokio::test]
async fn custom_config_dir_is_respected() {
    let cloud = TestCloud::new();
    let config = SyncConfig::default()
        .with_root_folder("Vault Backup")
        .with_config_dir(".obsidian");
    let a = cloud.device_with(config, Arc::new(vaultsync_engine::AutoApprove));
    a.write("a.md", b"x");
    a.engine.push().await.unwrap();

    assert!(cloud.remote.find_by_path(".obsidian/sync-state.json").is_some());
    assert!(cloud.remote.find_by_path(".vaultsync/sync-state.json").is_none());
}

#[tokio::test]
async fn config_this_device_never_mirrored_is_not_deleted() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.local.add_file(".vaultsync/plugins.json", b"from a");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    b.local.fail_writes_to(".vaultsync/plugins.json");
    let report = b.engine.push().await.unwrap();

    assert_eq!(report.pull.failures.len(), 1);
    assert_eq!(report.deleted_remote, 0);
    assert!(b.local.kind(".vaultsync/plugins.json").is_none());
    assert!(b.engine.remote_id(".vaultsync/plugins.json").is_none());
    assert!(cloud.remote.find_by_path(".vaultsync/plugins.json").is_some());

    b.local.clear_faults();
    b.engine.push().await.unwrap();
    assert!(cloud.remote.find_by_path(".vaultsync/plugins.json").is_some());

    // A local copy made later updates the existing object.
    b.local.add_file(".vaultsync/plugins.json", b"from b");
    b.engine.push().await.unwrap();
    assert_eq!(tagged(&cloud.remote, ".vaultsync/plugins.json"), 1);
    assert_eq!(
        cloud.remote.content_at(".vaultsync/plugins.json").unwrap(),
        b"from b"
    );
}

#[tokio::test]
async fn removed_config_prunes_emptied_folders() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.local.add_file(".vaultsync/plugins/x/data.json", b"{}");
    a.engine.push().await.unwrap();
    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    assert!(b.local.kind(".vaultsync/plugins/x/data.json").is_some());

    assert!(cloud.remote.remove_path(".vaultsync/plugins/x/data.json"));
    b.local.clear_journal();
    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.internal_removed, 1);
    assert!(report.failures.is_empty());
    assert_eq!(
        b.local.journal(),
        vec![
            LocalWrite::Trash {
                path: ".vaultsync/plugins/x/data.json".into(),
                system: false,
            },
            LocalWrite::Rmdir(".vaultsync/plugins/x".into()),
            LocalWrite::Rmdir(".vaultsync/plugins".into()),
        ]
    );
    assert!(b.local.kind(".vaultsync/plugins").is_none());
    assert_eq!(b.local.kind(".vaultsync"), Some(EntryKind::Folder));
}

// ============================================================================
// Review
// ============================================================================

#[tokio::test]
async fn cancelled_review_changes_nothing() {
    let cloud = TestCloud::new();
    let review = |_: &[PendingEntry]| ReviewDecision::Cancel;
    let a = cloud.device_with(SyncConfig::default(), Arc::new(review));
    a.write("a.md", b"x");

    let err = a.engine.push().await.unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(a.engine.state(), SyncState::Idle);
    assert_eq!(a.engine.pending().len(), 1);
    assert_eq!(cloud.remote.write_count(), 0);
    assert!(a.engine.checkpoint().is_initial());
}

#[tokio::test]
async fn reverted_create_is_removed_locally() {
    let cloud = TestCloud::new();
    let review = |entries: &[PendingEntry]| {
        assert_eq!(entries.len(), 2);
        ReviewDecision::Proceed {
            revert: vec![RevertTarget::Path("draft.md".into())],
        }
    };
    let a = cloud.device_with(SyncConfig::default(), Arc::new(review));
    a.write("keep.md", b"keep");
    a.write("draft.md", b"draft");

    let report = a.engine.push().await.unwrap();

    assert_eq!(report.reverted, 1);
    assert_eq!(report.uploaded, 1);
    assert!(a.local.kind("draft.md").is_none());
    assert!(cloud.remote.find_by_path("draft.md").is_none());
    assert!(cloud.remote.find_by_path("keep.md").is_some());
}

#[tokio::test]
async fn reverted_modify_restores_remote_content() {
    let cloud = TestCloud::new();
    let review = |entries: &[PendingEntry]| ReviewDecision::Proceed {
        revert: entries
            .iter()
            .filter(|e| e.op == PendingOp::Modify)
            .map(|e| RevertTarget::Path(e.path.clone()))
            .collect(),
    };
    let a = cloud.device_with(SyncConfig::default(), Arc::new(review));
    a.write("a.md", b"v1");
    a.engine.push().await.unwrap();

    a.write("a.md", b"v2");
    let report = a.engine.push().await.unwrap();

    assert_eq!(report.reverted, 1);
    assert_eq!(report.updated, 0);
    assert_eq!(a.text("a.md").unwrap(), "v1");
    assert_eq!(cloud.remote.content_at("a.md").unwrap(), b"v1");
    assert!(a.engine.pending().is_empty());
}

#[tokio::test]
async fn reverted_delete_brings_subtree_back() {
    let cloud = TestCloud::new();
    let review = |entries: &[PendingEntry]| ReviewDecision::Proceed {
        revert: entries
            .iter()
            .filter(|e| e.op == PendingOp::Delete)
            .map(|e| RevertTarget::Subtree(e.path.clone()))
            .collect(),
    };
    let a = cloud.device_with(SyncConfig::default(), Arc::new(review));
    a.write("gone.md", b"body");
    a.engine.push().await.unwrap();

    a.delete("gone.md").await;
    a.engine.push().await.unwrap();

    assert_eq!(a.text("gone.md").unwrap(), "body");
    assert!(cloud.remote.find_by_path("gone.md").is_some());
    assert_eq!(cloud.remote.call_count(RemoteOp::BatchDelete), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn offline_push_touches_nothing() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    cloud.remote.set_reachable(false);

    let err = a.engine.push().await.unwrap_err();

    assert!(matches!(err, SyncError::Offline));
    assert!(err.is_retryable());
    assert_eq!(cloud.remote.write_count(), 0);
    assert_eq!(a.engine.pending().len(), 1);
    assert_eq!(a.engine.state(), SyncState::Error);
    assert!(!a.observer.failures().is_empty());
    assert!(a.engine.stats().last_error.is_some());
}

#[tokio::test]
async fn expired_access_token_is_refreshed() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    cloud.remote.expire_access_token();

    a.engine.push().await.unwrap();

    assert_eq!(cloud.remote.call_count(RemoteOp::RefreshCredentials), 1);
    assert!(cloud.remote.find_by_path("a.md").is_some());
}

#[tokio::test]
async fn revoked_credentials_halt_before_any_write() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    cloud.remote.revoke_credentials();

    let err = a.engine.push().await.unwrap_err();

    assert!(matches!(err, SyncError::Credentials(_)));
    assert_eq!(cloud.remote.write_count(), 0);
    assert_eq!(a.engine.pending().len(), 1);
}

#[tokio::test]
async fn failed_upload_keeps_its_entry() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("ok.md", b"fine");
    a.write("bad.md", b"nope");
    cloud.remote.fail_name("bad.md");

    let err = a.engine.push().await.unwrap_err();

    match &err {
        SyncError::PhaseFailed { phase, failures } => {
            assert_eq!(*phase, SyncPhase::RemoteFiles);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, "bad.md");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        a.engine.pending(),
        vec![("bad.md".to_string(), PendingOp::Create)]
    );
    assert!(a.engine.checkpoint().is_initial());
    assert!(cloud.remote.find_by_path("ok.md").is_some());

    cloud.remote.clear_faults();
    let report = a.engine.push().await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(tagged(&cloud.remote, "ok.md"), 1);
    assert!(a.engine.pending().is_empty());
}

#[tokio::test]
async fn failed_batch_delete_keeps_delete_entries() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    a.engine.push().await.unwrap();
    a.delete("a.md").await;
    cloud.remote.fail(RemoteOp::BatchDelete);

    let err = a.engine.push().await.unwrap_err();

    assert_eq!(err.phase(), Some(SyncPhase::RemoteDelete));
    assert_eq!(a.engine.pending(), vec![("a.md".to_string(), PendingOp::Delete)]);
    assert!(cloud.remote.find_by_path("a.md").is_some());
}

#[tokio::test]
async fn local_failures_do_not_stop_siblings() {
    let cloud = TestCloud::new();
    cloud.remote.put_file("locked/x.md", b"x");
    cloud.remote.put_file("open/y.md", b"y");
    let b = cloud.device();
    b.local.fail_writes_to("locked");

    let report = b.engine.pull(false).await.unwrap();

    assert!(!report.failures.is_empty());
    assert!(report.failures.iter().all(|f| f.path.starts_with("locked")));
    assert_eq!(b.text("open/y.md").unwrap(), "y");
    assert!(!b.observer.failures().is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn state_survives_restart() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("synced.md", b"x");
    a.engine.push().await.unwrap();
    a.write("pending.md", b"y");
    a.engine.flush().unwrap();

    let again = cloud.restart(&a);

    assert_eq!(again.engine.pending(), a.engine.pending());
    assert_eq!(again.engine.remote_id("synced.md"), a.engine.remote_id("synced.md"));
    assert_eq!(again.engine.checkpoint(), a.engine.checkpoint());

    again.engine.push().await.unwrap();
    assert!(cloud.remote.find_by_path("pending.md").is_some());
    assert_eq!(tagged(&cloud.remote, "synced.md"), 1);
}

#[tokio::test]
async fn stats_accumulate() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("a.md", b"x");
    a.write("b.md", b"y");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    b.engine.pull(false).await.unwrap();

    let stats = a.engine.stats();
    assert_eq!(stats.pushes, 1);
    assert_eq!(stats.uploads, 2);
    assert_eq!(stats.last_synced_at, Some(a.engine.checkpoint().last_synced_at()));

    let stats = b.engine.stats();
    assert_eq!(stats.pulls, 1);
    assert_eq!(stats.downloads, 2);
}

// ============================================================================
// Filesystem-backed vaults
// ============================================================================

#[tokio::test]
async fn directory_vaults_sync_through_the_remote() {
    let cloud = TestCloud::new();
    let a = cloud.fs_device();
    a.write("notes/today.md", b"# today");
    a.engine.push().await.unwrap();

    let b = cloud.fs_device();
    b.engine.pull(false).await.unwrap();

    assert_eq!(b.read("notes/today.md").unwrap(), b"# today");
    assert!(b.root().join("notes").is_dir());
    assert!(!b.root().join(".vaultsync/sync-state.json").exists());
}
