//! Local hierarchical store interface.

use crate::path::EntryKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for local store operations.
pub type LocalResult<T> = Result<T, LocalError>;

/// Errors from the local store.
#[derive(Error, Debug)]
pub enum LocalError {
    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Parent folder of the path does not exist.
    #[error("parent folder missing for {0}")]
    MissingParent(String),

    /// Folder still has children.
    #[error("folder not empty: {0}")]
    NotEmpty(String),

    /// Operation does not apply to this entry kind.
    #[error("wrong entry kind for {0}")]
    WrongKind(String),

    /// Underlying I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Vault path involved.
        path: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

impl LocalError {
    /// Wraps an I/O error for a vault path.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// How removed entries are disposed of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisposalPolicy {
    /// Move into the vault's own trash folder.
    #[default]
    LocalTrash,
    /// Move into the operating system trash.
    SystemTrash,
    /// Remove permanently.
    Permanent,
}

impl std::str::FromStr for DisposalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-trash" | "local" => Ok(DisposalPolicy::LocalTrash),
            "system-trash" | "system" => Ok(DisposalPolicy::SystemTrash),
            "permanent" => Ok(DisposalPolicy::Permanent),
            other => Err(format!("unknown disposal policy: {other}")),
        }
    }
}

/// Metadata of one local entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Vault path.
    pub path: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Modification time (ms since epoch).
    pub modified_at: u64,
    /// Size in bytes; 0 for folders.
    pub size: u64,
}

/// The local hierarchical store.
///
/// Writes require the parent folder to exist; the reconcilers order their
/// calls so that it does.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Direct children of a folder. `""` lists the vault root.
    async fn list(&self, dir: &str) -> LocalResult<Vec<LocalEntry>>;

    /// Metadata of a path, or `None` if absent.
    async fn stat(&self, path: &str) -> LocalResult<Option<LocalEntry>>;

    /// Existence check.
    async fn exists(&self, path: &str) -> LocalResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// Reads a file.
    async fn read(&self, path: &str) -> LocalResult<Vec<u8>>;

    /// Creates a folder. Succeeds if it already exists.
    async fn create_folder(&self, path: &str) -> LocalResult<()>;

    /// Creates a new file.
    async fn create_file(&self, path: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()>;

    /// Overwrites an existing file.
    async fn modify_file(&self, path: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()>;

    /// Moves an entry into the vault trash.
    async fn trash_local(&self, path: &str) -> LocalResult<()>;

    /// Moves an entry into the system trash.
    async fn trash_system(&self, path: &str) -> LocalResult<()>;

    /// Removes a file.
    async fn remove(&self, path: &str) -> LocalResult<()>;

    /// Removes a folder, with its contents if `recursive`.
    async fn rmdir(&self, path: &str, recursive: bool) -> LocalResult<()>;

    /// Configured disposal policy.
    fn disposal_policy(&self) -> DisposalPolicy;
}

/// Lists every entry below `dir`, parents before children.
pub async fn list_recursive(store: &dyn LocalStore, dir: &str) -> LocalResult<Vec<LocalEntry>> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_string()];
    while let Some(current) = pending.pop() {
        for entry in store.list(&current).await? {
            if entry.kind.is_folder() {
                pending.push(entry.path.clone());
            }
            out.push(entry);
        }
    }
    out.sort_by(|a, b| {
        crate::path::depth(&a.path)
            .cmp(&crate::path::depth(&b.path))
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(out)
}

/// Removes an entry according to the store's disposal policy.
pub async fn dispose(store: &dyn LocalStore, path: &str, kind: EntryKind) -> LocalResult<()> {
    match store.disposal_policy() {
        DisposalPolicy::LocalTrash => store.trash_local(path).await,
        DisposalPolicy::SystemTrash => store.trash_system(path).await,
        DisposalPolicy::Permanent => match kind {
            EntryKind::File => store.remove(path).await,
            EntryKind::Folder => store.rmdir(path, true).await,
        },
    }
}
