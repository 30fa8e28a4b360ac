//! In-memory remote object store.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vaultsync_core::path;
use vaultsync_core::{
    ChangeEntry, Clock, EntryKind, ObjectProperties, RemoteError, RemoteObject, RemoteResult,
    RemoteStore, SearchFilter, SystemClock,
};

/// Remote calls, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `refresh_credentials`
    RefreshCredentials,
    /// `ensure_root`
    EnsureRoot,
    /// `create_folder`
    CreateFolder,
    /// `upload_file`
    UploadFile,
    /// `update_file`
    UpdateFile,
    /// `batch_delete`
    BatchDelete,
    /// `get_file`
    GetFile,
    /// `get_file_metadata`
    GetMetadata,
    /// `search`
    Search,
    /// `get_changes`
    GetChanges,
    /// `start_page_token`
    StartPageToken,
}

impl RemoteOp {
    fn name(&self) -> &'static str {
        match self {
            RemoteOp::RefreshCredentials => "refresh_credentials",
            RemoteOp::EnsureRoot => "ensure_root",
            RemoteOp::CreateFolder => "create_folder",
            RemoteOp::UploadFile => "upload_file",
            RemoteOp::UpdateFile => "update_file",
            RemoteOp::BatchDelete => "batch_delete",
            RemoteOp::GetFile => "get_file",
            RemoteOp::GetMetadata => "get_file_metadata",
            RemoteOp::Search => "search",
            RemoteOp::GetChanges => "get_changes",
            RemoteOp::StartPageToken => "start_page_token",
        }
    }
}

/// One stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredObject {
    pub(crate) meta: RemoteObject,
    pub(crate) parent: Option<String>,
    /// Store-side change time; what `modified_after` compares against.
    pub(crate) touched_at: u64,
    #[serde(skip)]
    pub(crate) content: Vec<u8>,
}

/// Complete store state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RemoteState {
    pub(crate) objects: BTreeMap<String, StoredObject>,
    pub(crate) changes: Vec<ChangeEntry>,
    pub(crate) next_id: u64,
    pub(crate) root_id: Option<String>,
}

impl RemoteState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("obj-{}", self.next_id)
    }

    fn find_by_path(&self, vault_path: &str) -> Option<&StoredObject> {
        self.objects
            .values()
            .find(|o| o.meta.path() == Some(vault_path))
    }

    /// Ids of `id` and everything below it.
    fn subtree(&self, id: &str) -> Vec<String> {
        let mut out = vec![id.to_string()];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor].clone();
            out.extend(
                self.objects
                    .iter()
                    .filter(|(_, o)| o.parent.as_deref() == Some(current.as_str()))
                    .map(|(child, _)| child.clone()),
            );
            cursor += 1;
        }
        out
    }
}

#[derive(Debug, Default)]
struct Faults {
    ops: HashSet<RemoteOp>,
    names: HashSet<String>,
}

/// An in-memory remote object store.
///
/// Suitable for unit and integration tests; also the engine behind
/// [`crate::DirRemoteStore`].
///
/// # Example
///
/// ```rust
/// use vaultsync_core::{ObjectProperties, RemoteStore, SearchFilter};
/// use vaultsync_store::MemoryRemoteStore;
///
/// # tokio_test_block(async {
/// let remote = MemoryRemoteStore::new();
/// let root = remote.ensure_root("vault").await.unwrap();
/// remote
///     .upload_file(b"hi".to_vec(), "a.md", Some(&root), ObjectProperties::vault("a.md"), None)
///     .await
///     .unwrap();
/// assert_eq!(remote.search(&SearchFilter::all()).await.unwrap().len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryRemoteStore {
    state: RwLock<RemoteState>,
    clock: Arc<dyn Clock>,
    reachable: AtomicBool,
    token_expired: AtomicBool,
    refresh_revoked: AtomicBool,
    faults: RwLock<Faults>,
    calls: Mutex<HashMap<RemoteOp, u64>>,
}

impl MemoryRemoteStore {
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_state(RemoteState::default(), clock)
    }

    pub(crate) fn from_state(state: RemoteState, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(state),
            clock,
            reachable: AtomicBool::new(true),
            token_expired: AtomicBool::new(false),
            refresh_revoked: AtomicBool::new(false),
            faults: RwLock::new(Faults::default()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn export_state(&self) -> RemoteState {
        self.state.read().clone()
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Expires the access token; the next refresh renews it.
    pub fn expire_access_token(&self) {
        self.token_expired.store(true, Ordering::SeqCst);
    }

    /// Revokes the refresh credential; refreshes fail from now on.
    pub fn revoke_credentials(&self) {
        self.token_expired.store(true, Ordering::SeqCst);
        self.refresh_revoked.store(true, Ordering::SeqCst);
    }

    /// Makes every call of the given kind fail.
    pub fn fail(&self, op: RemoteOp) {
        self.faults.write().ops.insert(op);
    }

    /// Makes writes of objects with this name fail.
    pub fn fail_name(&self, name: impl Into<String>) {
        self.faults.write().names.insert(name.into());
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        let mut faults = self.faults.write();
        faults.ops.clear();
        faults.names.clear();
    }

    /// Number of calls of one kind so far.
    pub fn call_count(&self, op: RemoteOp) -> u64 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Total number of mutating calls so far.
    pub fn write_count(&self) -> u64 {
        [
            RemoteOp::CreateFolder,
            RemoteOp::UploadFile,
            RemoteOp::UpdateFile,
            RemoteOp::BatchDelete,
        ]
        .iter()
        .map(|op| self.call_count(*op))
        .sum()
    }

    /// Every annotated object.
    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state
            .read()
            .objects
            .values()
            .filter(|o| o.meta.path().is_some())
            .map(|o| o.meta.clone())
            .collect()
    }

    /// Object annotated with a vault path.
    pub fn find_by_path(&self, vault_path: &str) -> Option<RemoteObject> {
        self.state
            .read()
            .find_by_path(vault_path)
            .map(|o| o.meta.clone())
    }

    /// Content of a file object.
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.state.read().objects.get(id).map(|o| o.content.clone())
    }

    /// Content of the file annotated with a vault path.
    pub fn content_at(&self, vault_path: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .find_by_path(vault_path)
            .map(|o| o.content.clone())
    }

    /// Creates a folder at a vault path as another device would.
    ///
    /// Missing ancestors are created too. Returns the folder id.
    pub fn put_folder(&self, vault_path: &str) -> String {
        let mut state = self.state.write();
        self.put_entry(&mut state, vault_path, EntryKind::Folder, Vec::new(), false)
    }

    /// Creates or replaces a file at a vault path as another device would.
    pub fn put_file(&self, vault_path: &str, bytes: &[u8]) -> String {
        let mut state = self.state.write();
        self.put_entry(&mut state, vault_path, EntryKind::File, bytes.to_vec(), false)
    }

    /// Creates or replaces a config object as another device would.
    pub fn put_config_file(&self, vault_path: &str, bytes: &[u8]) -> String {
        let mut state = self.state.write();
        self.put_entry(&mut state, vault_path, EntryKind::File, bytes.to_vec(), true)
    }

    /// Removes the object at a vault path (and its subtree) as another device would.
    pub fn remove_path(&self, vault_path: &str) -> bool {
        let mut state = self.state.write();
        let Some(id) = state.find_by_path(vault_path).map(|o| o.meta.id.clone()) else {
            return false;
        };
        Self::delete_subtree(&mut state, &id);
        true
    }

    fn put_entry(
        &self,
        state: &mut RemoteState,
        vault_path: &str,
        kind: EntryKind,
        content: Vec<u8>,
        config: bool,
    ) -> String {
        let now = self.clock.now_millis();
        if let Some(existing) = state.find_by_path(vault_path).map(|o| o.meta.id.clone()) {
            if kind.is_file() {
                if let Some(object) = state.objects.get_mut(&existing) {
                    object.content = content;
                    object.touched_at = now;
                    object.meta.modified_at = now;
                }
                state.changes.push(ChangeEntry {
                    id: existing.clone(),
                    removed: false,
                });
            }
            return existing;
        }

        let parent = match path::parent(vault_path) {
            Some(parent_path) => Some(self.put_entry(
                state,
                parent_path,
                EntryKind::Folder,
                Vec::new(),
                config,
            )),
            None => state.root_id.clone(),
        };
        let properties = if config {
            ObjectProperties::config(vault_path)
        } else {
            ObjectProperties::vault(vault_path)
        };
        Self::insert(
            state,
            path::file_name(vault_path),
            kind,
            parent,
            properties,
            content,
            now,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        state: &mut RemoteState,
        name: &str,
        kind: EntryKind,
        parent: Option<String>,
        properties: ObjectProperties,
        content: Vec<u8>,
        modified_at: u64,
        touched_at: u64,
    ) -> String {
        let id = state.allocate_id();
        state.objects.insert(
            id.clone(),
            StoredObject {
                meta: RemoteObject {
                    id: id.clone(),
                    name: name.to_string(),
                    kind,
                    properties,
                    modified_at,
                },
                parent,
                touched_at,
                content,
            },
        );
        state.changes.push(ChangeEntry {
            id: id.clone(),
            removed: false,
        });
        id
    }

    fn delete_subtree(state: &mut RemoteState, id: &str) -> Vec<String> {
        let doomed = state.subtree(id);
        for victim in &doomed {
            state.objects.remove(victim);
            state.changes.push(ChangeEntry {
                id: victim.clone(),
                removed: true,
            });
        }
        doomed
    }

    /// Common gate: counts the call and applies connectivity, credential and
    /// injected faults.
    fn begin(&self, op: RemoteOp, name: Option<&str>) -> RemoteResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("network is down".into()));
        }
        if op != RemoteOp::RefreshCredentials && self.token_expired.load(Ordering::SeqCst) {
            return Err(RemoteError::Credentials("access token expired".into()));
        }
        let faults = self.faults.read();
        if faults.ops.contains(&op) {
            return Err(RemoteError::rejected(op.name(), "injected fault"));
        }
        if let Some(name) = name {
            if faults.names.contains(name) {
                return Err(RemoteError::rejected(
                    op.name(),
                    format!("injected fault for {name}"),
                ));
            }
        }
        Ok(())
    }

    fn check_parent(state: &RemoteState, parent: Option<&str>, op: RemoteOp) -> RemoteResult<()> {
        match parent {
            Some(id) => match state.objects.get(id) {
                Some(object) if object.meta.kind.is_folder() => Ok(()),
                Some(_) => Err(RemoteError::rejected(op.name(), "parent is not a folder")),
                None => Err(RemoteError::NotFound(id.to_string())),
            },
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn refresh_credentials(&self) -> RemoteResult<()> {
        self.begin(RemoteOp::RefreshCredentials, None)?;
        if self.refresh_revoked.load(Ordering::SeqCst) {
            return Err(RemoteError::Credentials("refresh token revoked".into()));
        }
        self.token_expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_root(&self, name: &str) -> RemoteResult<String> {
        self.begin(RemoteOp::EnsureRoot, None)?;
        let mut state = self.state.write();
        if let Some(root) = &state.root_id {
            if state.objects.contains_key(root) {
                return Ok(root.clone());
            }
        }
        let now = self.clock.now_millis();
        let id = state.allocate_id();
        state.objects.insert(
            id.clone(),
            StoredObject {
                meta: RemoteObject {
                    id: id.clone(),
                    name: name.to_string(),
                    kind: EntryKind::Folder,
                    properties: ObjectProperties::default(),
                    modified_at: now,
                },
                parent: None,
                touched_at: now,
                content: Vec::new(),
            },
        );
        state.root_id = Some(id.clone());
        Ok(id)
    }

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        self.begin(RemoteOp::CreateFolder, Some(name))?;
        let mut state = self.state.write();
        Self::check_parent(&state, parent, RemoteOp::CreateFolder)?;
        let now = self.clock.now_millis();
        let parent = parent.map(str::to_string).or_else(|| state.root_id.clone());
        Ok(Self::insert(
            &mut state,
            name,
            EntryKind::Folder,
            parent,
            properties,
            Vec::new(),
            mtime.unwrap_or(now),
            now,
        ))
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        self.begin(RemoteOp::UploadFile, Some(name))?;
        let mut state = self.state.write();
        Self::check_parent(&state, parent, RemoteOp::UploadFile)?;
        let now = self.clock.now_millis();
        let parent = parent.map(str::to_string).or_else(|| state.root_id.clone());
        Ok(Self::insert(
            &mut state,
            name,
            EntryKind::File,
            parent,
            properties,
            bytes,
            mtime.unwrap_or(now),
            now,
        ))
    }

    async fn update_file(
        &self,
        id: &str,
        bytes: Option<Vec<u8>>,
        mtime: Option<u64>,
    ) -> RemoteResult<String> {
        let name = self
            .state
            .read()
            .objects
            .get(id)
            .map(|o| o.meta.name.clone());
        self.begin(RemoteOp::UpdateFile, name.as_deref())?;

        let now = self.clock.now_millis();
        let mut state = self.state.write();
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if object.meta.kind.is_folder() && bytes.is_some() {
            return Err(RemoteError::rejected("update_file", "cannot write content to a folder"));
        }
        if let Some(bytes) = bytes {
            object.content = bytes;
        }
        object.meta.modified_at = mtime.unwrap_or(now);
        object.touched_at = now;
        state.changes.push(ChangeEntry {
            id: id.to_string(),
            removed: false,
        });
        Ok(id.to_string())
    }

    async fn batch_delete(&self, ids: &[String]) -> RemoteResult<()> {
        self.begin(RemoteOp::BatchDelete, None)?;
        let mut state = self.state.write();
        if let Some(missing) = ids.iter().find(|id| !state.objects.contains_key(id.as_str())) {
            return Err(RemoteError::NotFound(missing.clone()));
        }
        for id in ids {
            // An earlier id may already have taken this one with its subtree.
            if state.objects.contains_key(id) {
                Self::delete_subtree(&mut state, id);
            }
        }
        Ok(())
    }

    async fn get_file(&self, id: &str) -> RemoteResult<Vec<u8>> {
        self.begin(RemoteOp::GetFile, None)?;
        let state = self.state.read();
        match state.objects.get(id) {
            Some(object) if object.meta.kind.is_file() => Ok(object.content.clone()),
            Some(_) => Err(RemoteError::rejected("get_file", "object is a folder")),
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    async fn get_file_metadata(&self, id: &str) -> RemoteResult<RemoteObject> {
        self.begin(RemoteOp::GetMetadata, None)?;
        self.state
            .read()
            .objects
            .get(id)
            .map(|o| o.meta.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn search(&self, filter: &SearchFilter) -> RemoteResult<Vec<RemoteObject>> {
        self.begin(RemoteOp::Search, None)?;
        let state = self.state.read();
        Ok(state
            .objects
            .values()
            .filter(|o| filter.matches_properties(&o.meta))
            .filter(|o| filter.modified_after.map_or(true, |ts| o.touched_at > ts))
            .map(|o| o.meta.clone())
            .collect())
    }

    async fn get_changes(&self, token: &str) -> RemoteResult<Vec<ChangeEntry>> {
        self.begin(RemoteOp::GetChanges, None)?;
        let start: usize = token
            .parse()
            .map_err(|_| RemoteError::rejected("get_changes", format!("invalid token {token:?}")))?;
        let state = self.state.read();
        Ok(state
            .changes
            .get(start.min(state.changes.len())..)
            .unwrap_or_default()
            .to_vec())
    }

    async fn start_page_token(&self) -> RemoteResult<String> {
        self.begin(RemoteOp::StartPageToken, None)?;
        Ok(self.state.read().changes.len().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_core::ManualClock;

    fn store() -> MemoryRemoteStore {
        MemoryRemoteStore::with_clock(Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn root_is_idempotent_and_unannotated() {
        let remote = store();
        let a = remote.ensure_root("vault").await.unwrap();
        let b = remote.ensure_root("vault").await.unwrap();
        assert_eq!(a, b);
        assert!(remote.objects().is_empty());
    }

    #[tokio::test]
    async fn upload_and_download() {
        let remote = store();
        let root = remote.ensure_root("vault").await.unwrap();
        let id = remote
            .upload_file(
                b"body".to_vec(),
                "a.md",
                Some(&root),
                ObjectProperties::vault("a.md"),
                Some(77),
            )
            .await
            .unwrap();

        assert_eq!(remote.get_file(&id).await.unwrap(), b"body");
        let meta = remote.get_file_metadata(&id).await.unwrap();
        assert_eq!(meta.modified_at, 77);
        assert_eq!(meta.path(), Some("a.md"));
    }

    #[tokio::test]
    async fn search_uses_change_time() {
        let remote = store();
        remote.put_file("old.md", b"1");
        let token = remote.start_page_token().await.unwrap();
        let bound = remote
            .get_file_metadata(&remote.find_by_path("old.md").unwrap().id)
            .await
            .unwrap()
            .modified_at;

        remote.put_file("new.md", b"2");
        let found = remote
            .search(&SearchFilter::modified_after(bound))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path(), Some("new.md"));

        let changes = remote.get_changes(&token).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].removed);
    }

    #[tokio::test]
    async fn batch_delete_takes_subtree_and_feeds_removals() {
        let remote = store();
        remote.put_file("dir/sub/a.md", b"x");
        let token = remote.start_page_token().await.unwrap();
        let dir = remote.find_by_path("dir").unwrap();

        remote.batch_delete(&[dir.id.clone()]).await.unwrap();
        assert!(remote.objects().is_empty());

        let removed: Vec<_> = remote
            .get_changes(&token)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.removed)
            .collect();
        assert_eq!(removed.len(), 3);
    }

    #[tokio::test]
    async fn batch_delete_is_all_or_nothing() {
        let remote = store();
        let id = remote.put_file("a.md", b"x");
        let err = remote
            .batch_delete(&[id.clone(), "nope".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
        assert!(remote.content(&id).is_some());
    }

    #[tokio::test]
    async fn hidden_objects_need_hidden_search() {
        let remote = store();
        remote.put_config_file(".app/state.json", b"{}");
        remote.put_file("a.md", b"x");

        assert_eq!(remote.search(&SearchFilter::all()).await.unwrap().len(), 1);
        assert_eq!(
            remote
                .search(&SearchFilter::all().with_hidden())
                .await
                .unwrap()
                .len(),
            3
        );
        assert_eq!(
            remote
                .search(&SearchFilter::config_objects())
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn faults_and_connectivity() {
        let remote = store();
        remote.fail(RemoteOp::UploadFile);
        let err = remote
            .upload_file(Vec::new(), "a", None, ObjectProperties::vault("a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { op: "upload_file", .. }));

        remote.clear_faults();
        remote.fail_name("b.md");
        assert!(remote
            .upload_file(Vec::new(), "b.md", None, ObjectProperties::vault("b.md"), None)
            .await
            .is_err());

        remote.set_reachable(false);
        assert!(!remote.is_reachable().await);
        assert!(matches!(
            remote.start_page_token().await,
            Err(RemoteError::Unreachable(_))
        ));
        assert_eq!(remote.call_count(RemoteOp::UploadFile), 2);
    }

    #[tokio::test]
    async fn credentials_refresh() {
        let remote = store();
        remote.expire_access_token();
        assert!(matches!(
            remote.search(&SearchFilter::all()).await,
            Err(RemoteError::Credentials(_))
        ));
        remote.refresh_credentials().await.unwrap();
        assert!(remote.search(&SearchFilter::all()).await.is_ok());

        remote.revoke_credentials();
        assert!(remote.refresh_credentials().await.is_err());
    }

    #[tokio::test]
    async fn invalid_token_rejected() {
        let remote = store();
        assert!(remote.get_changes("not-a-number").await.is_err());
        assert!(remote.get_changes("999").await.unwrap().is_empty());
    }
}
