//! In-memory vault with an ordered write journal.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use vaultsync_core::path;
use vaultsync_core::{
    Clock, DisposalPolicy, EntryKind, LocalEntry, LocalError, LocalResult, LocalStore, SystemClock,
};

/// A write performed against a [`MemoryLocalStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalWrite {
    /// Folder created.
    CreateFolder(String),
    /// File created.
    CreateFile(String),
    /// File overwritten.
    ModifyFile(String),
    /// Entry moved to a trash.
    Trash {
        /// Vault path.
        path: String,
        /// True for the system trash.
        system: bool,
    },
    /// File removed.
    Remove(String),
    /// Folder removed.
    Rmdir(String),
}

impl LocalWrite {
    /// Vault path the write touched.
    pub fn path(&self) -> &str {
        match self {
            LocalWrite::CreateFolder(p)
            | LocalWrite::CreateFile(p)
            | LocalWrite::ModifyFile(p)
            | LocalWrite::Remove(p)
            | LocalWrite::Rmdir(p) => p,
            LocalWrite::Trash { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    content: Vec<u8>,
    modified_at: u64,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    local_trash: BTreeMap<String, Node>,
    system_trash: BTreeMap<String, Node>,
    journal: Vec<LocalWrite>,
    failing: HashSet<String>,
}

impl Inner {
    fn require_parent(&self, p: &str) -> LocalResult<()> {
        match path::parent(p) {
            None => Ok(()),
            Some(parent) => match self.nodes.get(parent) {
                Some(node) if node.kind.is_folder() => Ok(()),
                Some(_) => Err(LocalError::WrongKind(parent.to_string())),
                None => Err(LocalError::MissingParent(p.to_string())),
            },
        }
    }

    fn check_writable(&self, p: &str) -> LocalResult<()> {
        if self.failing.iter().any(|f| path::is_within(p, f)) {
            return Err(LocalError::io(
                p,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "write refused"),
            ));
        }
        Ok(())
    }

    fn subtree_keys(&self, p: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| path::is_within(k, p))
            .cloned()
            .collect()
    }

    fn take_subtree(&mut self, p: &str) -> Vec<(String, Node)> {
        self.subtree_keys(p)
            .into_iter()
            .filter_map(|k| self.nodes.remove(&k).map(|n| (k, n)))
            .collect()
    }
}

/// An in-memory vault.
///
/// Seeding through [`add_folder`](Self::add_folder) and
/// [`add_file`](Self::add_file) bypasses the journal, so tests can tell setup
/// apart from writes the engine performed.
pub struct MemoryLocalStore {
    inner: RwLock<Inner>,
    policy: DisposalPolicy,
    clock: Arc<dyn Clock>,
}

impl MemoryLocalStore {
    /// Creates an empty vault on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty vault on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy: DisposalPolicy::default(),
            clock,
        }
    }

    /// Sets the disposal policy.
    pub fn with_policy(mut self, policy: DisposalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Seeds a folder and any missing ancestors.
    pub fn add_folder(&self, p: &str) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.write();
        let mut chain: Vec<&str> = path::ancestors(p).collect();
        chain.reverse();
        chain.push(p);
        for dir in chain {
            inner.nodes.entry(dir.to_string()).or_insert(Node {
                kind: EntryKind::Folder,
                content: Vec::new(),
                modified_at: now,
            });
        }
    }

    /// Seeds or replaces a file, creating missing ancestors.
    pub fn add_file(&self, p: &str, bytes: &[u8]) {
        if let Some(parent) = path::parent(p) {
            self.add_folder(parent);
        }
        let now = self.clock.now_millis();
        self.inner.write().nodes.insert(
            p.to_string(),
            Node {
                kind: EntryKind::File,
                content: bytes.to_vec(),
                modified_at: now,
            },
        );
    }

    /// Content of a file, if present.
    pub fn content(&self, p: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .nodes
            .get(p)
            .filter(|n| n.kind.is_file())
            .map(|n| n.content.clone())
    }

    /// Kind of an entry, if present.
    pub fn kind(&self, p: &str) -> Option<EntryKind> {
        self.inner.read().nodes.get(p).map(|n| n.kind)
    }

    /// Modification time of an entry, if present.
    pub fn modified_at(&self, p: &str) -> Option<u64> {
        self.inner.read().nodes.get(p).map(|n| n.modified_at)
    }

    /// Every live path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.read().nodes.keys().cloned().collect()
    }

    /// Paths currently in the vault trash.
    pub fn trashed(&self) -> Vec<String> {
        self.inner.read().local_trash.keys().cloned().collect()
    }

    /// Paths currently in the system trash.
    pub fn system_trashed(&self) -> Vec<String> {
        self.inner.read().system_trash.keys().cloned().collect()
    }

    /// Writes performed so far, in order.
    pub fn journal(&self) -> Vec<LocalWrite> {
        self.inner.read().journal.clone()
    }

    /// Number of writes performed so far.
    pub fn write_count(&self) -> usize {
        self.inner.read().journal.len()
    }

    /// Forgets recorded writes.
    pub fn clear_journal(&self) {
        self.inner.write().journal.clear();
    }

    /// Makes every write at or below `p` fail.
    pub fn fail_writes_to(&self, p: impl Into<String>) {
        self.inner.write().failing.insert(p.into());
    }

    /// Removes injected write failures.
    pub fn clear_faults(&self) {
        self.inner.write().failing.clear();
    }

    fn entry(p: &str, node: &Node) -> LocalEntry {
        LocalEntry {
            path: p.to_string(),
            kind: node.kind,
            modified_at: node.modified_at,
            size: node.content.len() as u64,
        }
    }

    fn trash(&self, p: &str, system: bool) -> LocalResult<()> {
        let mut inner = self.inner.write();
        inner.check_writable(p)?;
        if !inner.nodes.contains_key(p) {
            return Err(LocalError::NotFound(p.to_string()));
        }
        let moved = inner.take_subtree(p);
        let bin = if system {
            &mut inner.system_trash
        } else {
            &mut inner.local_trash
        };
        bin.extend(moved);
        inner.journal.push(LocalWrite::Trash {
            path: p.to_string(),
            system,
        });
        Ok(())
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn list(&self, dir: &str) -> LocalResult<Vec<LocalEntry>> {
        let inner = self.inner.read();
        if !dir.is_empty() {
            match inner.nodes.get(dir) {
                Some(node) if node.kind.is_folder() => {}
                Some(_) => return Err(LocalError::WrongKind(dir.to_string())),
                None => return Err(LocalError::NotFound(dir.to_string())),
            }
        }
        Ok(inner
            .nodes
            .iter()
            .filter(|(p, _)| path::parent(p).unwrap_or("") == dir && p.as_str() != dir)
            .map(|(p, n)| Self::entry(p, n))
            .collect())
    }

    async fn stat(&self, p: &str) -> LocalResult<Option<LocalEntry>> {
        Ok(self.inner.read().nodes.get(p).map(|n| Self::entry(p, n)))
    }

    async fn read(&self, p: &str) -> LocalResult<Vec<u8>> {
        match self.inner.read().nodes.get(p) {
            Some(node) if node.kind.is_file() => Ok(node.content.clone()),
            Some(_) => Err(LocalError::WrongKind(p.to_string())),
            None => Err(LocalError::NotFound(p.to_string())),
        }
    }

    async fn create_folder(&self, p: &str) -> LocalResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.write();
        match inner.nodes.get(p) {
            Some(node) if node.kind.is_folder() => return Ok(()),
            Some(_) => return Err(LocalError::AlreadyExists(p.to_string())),
            None => {}
        }
        inner.check_writable(p)?;
        inner.require_parent(p)?;
        inner.nodes.insert(
            p.to_string(),
            Node {
                kind: EntryKind::Folder,
                content: Vec::new(),
                modified_at: now,
            },
        );
        inner.journal.push(LocalWrite::CreateFolder(p.to_string()));
        Ok(())
    }

    async fn create_file(&self, p: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(p) {
            return Err(LocalError::AlreadyExists(p.to_string()));
        }
        inner.check_writable(p)?;
        inner.require_parent(p)?;
        inner.nodes.insert(
            p.to_string(),
            Node {
                kind: EntryKind::File,
                content: bytes.to_vec(),
                modified_at: mtime.unwrap_or(now),
            },
        );
        inner.journal.push(LocalWrite::CreateFile(p.to_string()));
        Ok(())
    }

    async fn modify_file(&self, p: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.write();
        inner.check_writable(p)?;
        let node = inner
            .nodes
            .get_mut(p)
            .ok_or_else(|| LocalError::NotFound(p.to_string()))?;
        if node.kind.is_folder() {
            return Err(LocalError::WrongKind(p.to_string()));
        }
        node.content = bytes.to_vec();
        node.modified_at = mtime.unwrap_or(now);
        inner.journal.push(LocalWrite::ModifyFile(p.to_string()));
        Ok(())
    }

    async fn trash_local(&self, p: &str) -> LocalResult<()> {
        self.trash(p, false)
    }

    async fn trash_system(&self, p: &str) -> LocalResult<()> {
        self.trash(p, true)
    }

    async fn remove(&self, p: &str) -> LocalResult<()> {
        let mut inner = self.inner.write();
        inner.check_writable(p)?;
        match inner.nodes.get(p) {
            Some(node) if node.kind.is_file() => {}
            Some(_) => return Err(LocalError::WrongKind(p.to_string())),
            None => return Err(LocalError::NotFound(p.to_string())),
        }
        inner.nodes.remove(p);
        inner.journal.push(LocalWrite::Remove(p.to_string()));
        Ok(())
    }

    async fn rmdir(&self, p: &str, recursive: bool) -> LocalResult<()> {
        let mut inner = self.inner.write();
        inner.check_writable(p)?;
        match inner.nodes.get(p) {
            Some(node) if node.kind.is_folder() => {}
            Some(_) => return Err(LocalError::WrongKind(p.to_string())),
            None => return Err(LocalError::NotFound(p.to_string())),
        }
        if !recursive && inner.subtree_keys(p).len() > 1 {
            return Err(LocalError::NotEmpty(p.to_string()));
        }
        inner.take_subtree(p);
        inner.journal.push(LocalWrite::Rmdir(p.to_string()));
        Ok(())
    }

    fn disposal_policy(&self) -> DisposalPolicy {
        self.policy
    }
}
