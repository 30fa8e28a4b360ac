//! Two devices racing on the same paths.

use vaultsync_core::PendingOp;
use vaultsync_store::RemoteOp;
use vaultsync_testkit::prelude::*;

/// Two devices that both hold `files` synced.
async fn synced_pair(files: &[(&str, &str)]) -> (TestCloud, TestVault, TestVault) {
    let cloud = TestCloud::new();
    let a = cloud.device();
    for (p, text) in files {
        a.write(p, text.as_bytes());
    }
    a.engine.push().await.unwrap();
    let b = cloud.device();
    b.engine.pull(false).await.unwrap();
    (cloud, a, b)
}

#[tokio::test]
async fn local_modify_wins_over_remote_change_until_push() {
    let (cloud, a, b) = synced_pair(&[("a.md", "v1")]).await;
    a.write("a.md", b"from a");
    a.engine.push().await.unwrap();
    b.write("a.md", b"from b");

    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.kept_local, 1);
    assert_eq!(report.downloaded, 0);
    assert_eq!(b.text("a.md").unwrap(), "from b");
    assert_eq!(b.engine.pending(), vec![("a.md".to_string(), PendingOp::Modify)]);

    // Last writer in sync order wins.
    b.engine.push().await.unwrap();
    assert_eq!(cloud.remote.content_at("a.md").unwrap(), b"from b");
}

#[tokio::test]
async fn local_create_meeting_remote_object_becomes_update() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.write("n.md", b"from a");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    b.write("n.md", b"from b");
    let report = b.engine.push().await.unwrap();

    assert_eq!(report.pull.flipped, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.updated, 1);
    let copies = cloud
        .remote
        .objects()
        .iter()
        .filter(|o| o.path() == Some("n.md"))
        .count();
    assert_eq!(copies, 1);
    assert_eq!(cloud.remote.content_at("n.md").unwrap(), b"from b");
    assert!(b.engine.pending().is_empty());
}

#[tokio::test]
async fn remote_change_restores_local_delete() {
    let (cloud, a, b) = synced_pair(&[("a.md", "v1")]).await;
    b.delete("a.md").await;
    a.write("a.md", b"v2");
    a.engine.push().await.unwrap();

    b.engine.push().await.unwrap();

    assert_eq!(b.text("a.md").unwrap(), "v2");
    assert_eq!(cloud.remote.content_at("a.md").unwrap(), b"v2");
    assert_eq!(cloud.remote.call_count(RemoteOp::BatchDelete), 0);
    assert!(b.engine.pending().is_empty());
}

#[tokio::test]
async fn local_modify_of_remotely_removed_file_is_recreated() {
    let (cloud, a, b) = synced_pair(&[("a.md", "v1")]).await;
    b.write("a.md", b"still editing");
    a.delete("a.md").await;
    a.engine.push().await.unwrap();
    assert!(cloud.remote.find_by_path("a.md").is_none());

    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.flipped, 1);
    assert_eq!(report.deleted_local, 0);
    assert_eq!(b.engine.pending(), vec![("a.md".to_string(), PendingOp::Create)]);
    assert_eq!(b.text("a.md").unwrap(), "still editing");

    b.engine.push().await.unwrap();
    assert_eq!(cloud.remote.content_at("a.md").unwrap(), b"still editing");
}

#[tokio::test]
async fn removed_folder_with_new_local_child_is_kept() {
    let (cloud, a, b) = synced_pair(&[("proj/a.md", "a")]).await;
    b.write("proj/new.md", b"new");
    a.delete("proj").await;
    a.engine.push().await.unwrap();

    let report = b.engine.pull(false).await.unwrap();

    assert_eq!(report.deleted_local, 1);
    assert_eq!(report.flipped, 1);
    assert!(b.local.kind("proj/a.md").is_none());
    assert_eq!(b.text("proj/new.md").unwrap(), "new");
    assert_eq!(
        b.engine.pending(),
        vec![
            ("proj".to_string(), PendingOp::Create),
            ("proj/new.md".to_string(), PendingOp::Create),
        ]
    );

    b.engine.push().await.unwrap();
    assert!(cloud.remote.find_by_path("proj").is_some());
    assert!(cloud.remote.find_by_path("proj/new.md").is_some());
    assert!(cloud.remote.find_by_path("proj/a.md").is_none());
}

#[tokio::test]
async fn delete_on_both_sides_collapses() {
    let (cloud, a, b) = synced_pair(&[("a.md", "v1")]).await;
    a.delete("a.md").await;
    a.engine.push().await.unwrap();
    b.delete("a.md").await;
    assert_eq!(b.engine.pending(), vec![("a.md".to_string(), PendingOp::Delete)]);

    b.engine.pull(false).await.unwrap();
    assert!(b.engine.pending().is_empty());

    b.engine.push().await.unwrap();
    assert_eq!(cloud.remote.call_count(RemoteOp::BatchDelete), 1);
}

#[tokio::test]
async fn folder_created_on_both_sides_is_not_duplicated() {
    let cloud = TestCloud::new();
    let a = cloud.device();
    a.mkdir("shared");
    a.engine.push().await.unwrap();

    let b = cloud.device();
    b.mkdir("shared");
    b.engine.pull(false).await.unwrap();
    assert!(b.engine.pending().is_empty());

    b.engine.push().await.unwrap();
    let copies = cloud
        .remote
        .objects()
        .iter()
        .filter(|o| o.path() == Some("shared"))
        .count();
    assert_eq!(copies, 1);
}

#[tokio::test]
async fn remote_rename_moves_local_file() {
    let (_cloud, a, b) = synced_pair(&[("old.md", "body")]).await;
    a.rename("old.md", "new.md").await;
    a.engine.push().await.unwrap();

    b.engine.pull(false).await.unwrap();

    assert!(b.local.kind("old.md").is_none());
    assert_eq!(b.text("new.md").unwrap(), "body");
}
