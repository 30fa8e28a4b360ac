//! A vault rooted at a real directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use vaultsync_core::path;
use vaultsync_core::{DisposalPolicy, EntryKind, LocalEntry, LocalError, LocalResult, LocalStore};

/// Name of the vault's own trash folder, directly under the root.
pub const LOCAL_TRASH_DIR: &str = ".trash";

/// Local store over a directory tree.
#[derive(Debug, Clone)]
pub struct FsLocalStore {
    root: PathBuf,
    policy: DisposalPolicy,
    system_trash: Option<PathBuf>,
}

impl FsLocalStore {
    /// Opens the vault at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            policy: DisposalPolicy::default(),
            system_trash: None,
        }
    }

    /// Sets the disposal policy.
    pub fn with_policy(mut self, policy: DisposalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directory used as the system trash.
    ///
    /// Without one, system-trash disposal falls back to the vault trash.
    pub fn with_system_trash(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_trash = Some(dir.into());
        self
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, p: &str) -> PathBuf {
        if p.is_empty() {
            return self.root.clone();
        }
        p.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    async fn entry(&self, p: &str, full: &Path) -> LocalResult<Option<LocalEntry>> {
        let meta = match tokio::fs::metadata(full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LocalError::io(p, e)),
        };
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let kind = if meta.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        Ok(Some(LocalEntry {
            path: p.to_string(),
            kind,
            modified_at,
            size: if kind.is_file() { meta.len() } else { 0 },
        }))
    }

    async fn require_parent(&self, p: &str) -> LocalResult<()> {
        if let Some(parent) = path::parent(p) {
            if !tokio::fs::metadata(self.resolve(parent))
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                return Err(LocalError::MissingParent(p.to_string()));
            }
        }
        Ok(())
    }

    async fn set_mtime(&self, p: &str, full: PathBuf, mtime: Option<u64>) -> LocalResult<()> {
        let Some(mtime) = mtime else {
            return Ok(());
        };
        let when = UNIX_EPOCH + Duration::from_millis(mtime);
        let result = tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&full)
                .and_then(|f| f.set_modified(when))
        })
        .await
        .map_err(|e| LocalError::io(p, std::io::Error::other(e)))?;
        result.map_err(|e| LocalError::io(p, e))
    }

    /// Moves `p` under `bin`, keeping its vault-relative layout.
    ///
    /// An existing entry at the destination gets a timestamp suffix.
    async fn move_into(&self, p: &str, bin: &Path) -> LocalResult<()> {
        let from = self.resolve(p);
        if tokio::fs::symlink_metadata(&from).await.is_err() {
            return Err(LocalError::NotFound(p.to_string()));
        }
        let mut to = p.split('/').fold(bin.to_path_buf(), |acc, seg| acc.join(seg));
        if tokio::fs::symlink_metadata(&to).await.is_ok() {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let name = format!("{}.{stamp}", path::file_name(p));
            to.set_file_name(name);
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LocalError::io(p, e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| LocalError::io(p, e))?;
        debug!(path = p, to = %to.display(), "moved to trash");
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn list(&self, dir: &str) -> LocalResult<Vec<LocalEntry>> {
        let mut reader = tokio::fs::read_dir(self.resolve(dir)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LocalError::NotFound(dir.to_string())
            } else {
                LocalError::io(dir, e)
            }
        })?;

        let mut out = Vec::new();
        while let Some(child) = reader.next_entry().await.map_err(|e| LocalError::io(dir, e))? {
            let name = child.file_name().to_string_lossy().to_string();
            if dir.is_empty() && name == LOCAL_TRASH_DIR {
                continue;
            }
            let p = path::join(dir, &name);
            if let Some(entry) = self.entry(&p, &child.path()).await? {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn stat(&self, p: &str) -> LocalResult<Option<LocalEntry>> {
        self.entry(p, &self.resolve(p)).await
    }

    async fn read(&self, p: &str) -> LocalResult<Vec<u8>> {
        tokio::fs::read(self.resolve(p)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LocalError::NotFound(p.to_string())
            } else {
                LocalError::io(p, e)
            }
        })
    }

    async fn create_folder(&self, p: &str) -> LocalResult<()> {
        let full = self.resolve(p);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => return Err(LocalError::AlreadyExists(p.to_string())),
            Err(_) => {}
        }
        self.require_parent(p).await?;
        tokio::fs::create_dir(&full)
            .await
            .map_err(|e| LocalError::io(p, e))
    }

    async fn create_file(&self, p: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()> {
        let full = self.resolve(p);
        if tokio::fs::symlink_metadata(&full).await.is_ok() {
            return Err(LocalError::AlreadyExists(p.to_string()));
        }
        self.require_parent(p).await?;
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| LocalError::io(p, e))?;
        self.set_mtime(p, full, mtime).await
    }

    async fn modify_file(&self, p: &str, bytes: &[u8], mtime: Option<u64>) -> LocalResult<()> {
        let full = self.resolve(p);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(LocalError::WrongKind(p.to_string())),
            Err(_) => return Err(LocalError::NotFound(p.to_string())),
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| LocalError::io(p, e))?;
        self.set_mtime(p, full, mtime).await
    }

    async fn trash_local(&self, p: &str) -> LocalResult<()> {
        self.move_into(p, &self.root.join(LOCAL_TRASH_DIR)).await
    }

    async fn trash_system(&self, p: &str) -> LocalResult<()> {
        match &self.system_trash {
            Some(bin) => self.move_into(p, bin).await,
            None => {
                warn!(path = p, "no system trash configured, using vault trash");
                self.trash_local(p).await
            }
        }
    }

    async fn remove(&self, p: &str) -> LocalResult<()> {
        tokio::fs::remove_file(self.resolve(p)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LocalError::NotFound(p.to_string())
            } else {
                LocalError::io(p, e)
            }
        })
    }

    async fn rmdir(&self, p: &str, recursive: bool) -> LocalResult<()> {
        let full = self.resolve(p);
        let not_found = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LocalError::NotFound(p.to_string())
            } else {
                LocalError::io(p, e)
            }
        };
        if recursive {
            return tokio::fs::remove_dir_all(&full).await.map_err(not_found);
        }
        let mut reader = tokio::fs::read_dir(&full).await.map_err(not_found)?;
        if reader.next_entry().await.map_err(not_found)?.is_some() {
            return Err(LocalError::NotEmpty(p.to_string()));
        }
        tokio::fs::remove_dir(&full).await.map_err(not_found)
    }

    fn disposal_policy(&self) -> DisposalPolicy {
        self.policy
    }
}
