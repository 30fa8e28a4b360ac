//! Directory-backed remote object store.
//!
//! Layout under the store root:
//!
//! ```text
//! manifest.json   object metadata, parent pointers, change feed
//! blobs/<id>      file content
//! ```

use crate::error::{StoreError, StoreResult};
use crate::memory_remote::{MemoryRemoteStore, RemoteState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use vaultsync_core::{
    ChangeEntry, Clock, ObjectProperties, RemoteError, RemoteObject, RemoteResult, RemoteStore,
    SearchFilter, SystemClock,
};

const MANIFEST: &str = "manifest.json";
const BLOBS: &str = "blobs";

/// A remote store persisted to a local directory.
///
/// Every successful mutating call rewrites the manifest before returning, so
/// the directory can be shared by several processes taking turns.
pub struct DirRemoteStore {
    root: PathBuf,
    inner: MemoryRemoteStore,
    write_lock: tokio::sync::Mutex<()>,
}

impl DirRemoteStore {
    /// Opens (or initializes) a store at `root` on the system clock.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    /// Opens (or initializes) a store at `root`.
    pub fn open_with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StoreError::InvalidRoot(root.display().to_string()));
        }
        std::fs::create_dir_all(root.join(BLOBS))?;

        let manifest = root.join(MANIFEST);
        let mut state: RemoteState = if manifest.exists() {
            serde_json::from_slice(&std::fs::read(&manifest)?)?
        } else {
            RemoteState::default()
        };

        for (id, object) in state.objects.iter_mut() {
            if object.meta.kind.is_file() {
                let blob = root.join(BLOBS).join(id);
                object.content = std::fs::read(&blob).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        StoreError::MissingBlob(id.clone())
                    } else {
                        StoreError::Io(e)
                    }
                })?;
            }
        }
        debug!(root = %root.display(), objects = state.objects.len(), "opened remote store");

        Ok(Self {
            inner: MemoryRemoteStore::from_state(state, clock),
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The in-memory model, for inspection.
    pub fn inner(&self) -> &MemoryRemoteStore {
        &self.inner
    }

    /// Writes the current model out once the call that changed it succeeded.
    ///
    /// Disk work runs on the blocking pool; the lock keeps concurrent calls
    /// from interleaving their manifest writes.
    async fn persisted<T>(&self, op: &'static str, written: &[&str], value: T) -> RemoteResult<T> {
        let _guard = self.write_lock.lock().await;
        let state = self.inner.export_state();
        let root = self.root.clone();
        let written: Vec<String> = written.iter().map(|id| id.to_string()).collect();
        let outcome = tokio::task::spawn_blocking(move || write_out(&root, &state, &written))
            .await
            .map_err(|e| RemoteError::rejected(op, e.to_string()))?;
        outcome.map_err(|e| {
            warn!(error = %e, "failed to persist remote store");
            RemoteError::rejected(op, e.to_string())
        })?;
        Ok(value)
    }
}

/// Writes the manifest and reconciles the blob directory.
fn write_out(root: &Path, state: &RemoteState, written: &[String]) -> StoreResult<()> {
    let blobs = root.join(BLOBS);

    for id in written {
        if let Some(object) = state.objects.get(id) {
            if object.meta.kind.is_file() {
                std::fs::write(blobs.join(id), &object.content)?;
            }
        }
    }
    for entry in std::fs::read_dir(&blobs)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !state.objects.contains_key(&name) {
            std::fs::remove_file(entry.path())?;
        }
    }

    let tmp = root.join("manifest.json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, root.join(MANIFEST))?;
    Ok(())
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn is_reachable(&self) -> bool {
        self.root.is_dir() && self.inner.is_reachable().await
    }

    async fn refresh_credentials(&self) -> RemoteResult<()> {
        self.inner.refresh_credentials().await
    }

    async fn ensure_root(&self, name: &str) -> RemoteResult<String> {
        let id = self.inner.ensure_root(name).await?;
        self.persisted("ensure_root", &[], id).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        let id = self
            .inner
            .create_folder(name, parent, properties, mtime)
            .await?;
        self.persisted("create_folder", &[], id).await
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        let id = self
            .inner
            .upload_file(bytes, name, parent, properties, mtime)
            .await?;
        self.persisted("upload_file", &[id.as_str()], id.clone()).await
    }

    async fn update_file(
        &self,
        id: &str,
        bytes: Option<Vec<u8>>,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        let id = self.inner.update_file(id, bytes, mtime).await?;
        self.persisted("update_file", &[id.as_str()], id.clone()).await
    }

    async fn batch_delete(&self, ids: &[String]) -> RemoteResult<()> {
        self.inner.batch_delete(ids).await?;
        self.persisted("batch_delete", &[], ()).await
    }

    async fn get_file(&self, id: &str) -> RemoteResult<Vec<u8>> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = DirRemoteStore::open(dir.path()).unwrap();
            let root = store.ensure_root("vault").await.unwrap();
            store
                .upload_file(
                    b"persisted".to_vec(),
                    "a.md",
                    Some(&root),
                    ObjectProperties::vault("a.md"),
                    None,
                )
                .await
                .unwrap()
        };

        let reopened = DirRemoteStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_file(&id).await.unwrap(), b"persisted");
        assert_eq!(reopened.search(&SearchFilter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletes_remove_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirRemoteStore::open(dir.path()).unwrap();
        let id = store
            .upload_file(b"x".to_vec(), "a.md", None, ObjectProperties::vault("a.md"), None)
            .await
            .unwrap();
        assert!(dir.path().join(BLOBS).join(&id).exists());

        store.batch_delete(&[id.clone()]).await.unwrap();
        assert!(!dir.path().join(BLOBS).join(&id).exists());

        let token = "0";
        let changes = store.get_changes(token).await.unwrap();
        assert!(changes.iter().any(|c| c.id == id && c.removed));
    }

    #[tokio::test]
    async fn concurrent_writes_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirRemoteStore::open(dir.path()).unwrap();
        let (a, b) = tokio::join!(
            store.upload_file(b"a".to_vec(), "a.md", None, ObjectProperties::vault("a.md"), None),
            store.upload_file(b"b".to_vec(), "b.md", None, ObjectProperties::vault("b.md"), None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let reopened = DirRemoteStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_file(&a).await.unwrap(), b"a");
        assert_eq!(reopened.get_file(&b).await.unwrap(), b"b");
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn missing_blob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DirRemoteStore::open(dir.path()).unwrap();
            store.inner().put_file("a.md", b"x");
            write_out(dir.path(), &store.inner().export_state(), &[]).unwrap();
        }
        let err = DirRemoteStore::open(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::MissingBlob(_)));
    }
}
