//! Error types for the sync engine.

use std::fmt;
use thiserror::Error;
use vaultsync_core::{CoreError, LocalError, RemoteError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Stage of a reconciliation, used in errors and progress reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Connectivity and credential checks.
    Session,
    /// Reverting entries chosen at review.
    Revert,
    /// Fetching remote changes.
    Fetch,
    /// Removing local entries deleted remotely.
    LocalDelete,
    /// Creating local folders.
    LocalFolders,
    /// Writing downloaded files.
    LocalFiles,
    /// Disposing of removed internal files.
    InternalCleanup,
    /// Deleting remote objects.
    RemoteDelete,
    /// Creating remote folders.
    RemoteFolders,
    /// Uploading new files.
    RemoteFiles,
    /// Uploading modified files.
    RemoteModify,
    /// Syncing internal config objects.
    Config,
    /// Uploading the state snapshot.
    Snapshot,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Session => "session",
            SyncPhase::Revert => "revert",
            SyncPhase::Fetch => "fetch",
            SyncPhase::LocalDelete => "local delete",
            SyncPhase::LocalFolders => "local folders",
            SyncPhase::LocalFiles => "local files",
            SyncPhase::InternalCleanup => "internal cleanup",
            SyncPhase::RemoteDelete => "remote delete",
            SyncPhase::RemoteFolders => "remote folders",
            SyncPhase::RemoteFiles => "remote files",
            SyncPhase::RemoteModify => "remote modify",
            SyncPhase::Config => "config sync",
            SyncPhase::Snapshot => "state snapshot",
        };
        f.write_str(name)
    }
}

/// One item that failed inside a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Vault path.
    pub path: String,
    /// Human-readable cause.
    pub message: String,
}

impl ItemFailure {
    /// Creates a failure record.
    pub fn new(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote store cannot be reached.
    #[error("remote store is unreachable")]
    Offline,

    /// Credentials are invalid and could not be refreshed.
    #[error("credential failure: {0}")]
    Credentials(String),

    /// A single remote call failed.
    #[error("{phase} failed: {source}")]
    Remote {
        /// Phase that was halted.
        phase: SyncPhase,
        /// Underlying error.
        #[source]
        source: RemoteError,
    },

    /// Some items of a fanned-out phase failed.
    #[error("{phase} failed for {} item(s)", failures.len())]
    PhaseFailed {
        /// Phase that was halted.
        phase: SyncPhase,
        /// Failed items.
        failures: Vec<ItemFailure>,
    },

    /// Local store error outside per-item handling.
    #[error("local store error: {0}")]
    Local(#[from] LocalError),

    /// Another sync is in progress.
    #[error("a sync is already running")]
    AlreadySyncing,

    /// Sync was cancelled at review.
    #[error("sync cancelled")]
    Cancelled,

    /// Core state error.
    #[error("state error: {0}")]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Wraps a remote error raised in `phase`.
    ///
    /// Credential and connectivity failures keep their own variants.
    pub fn remote(phase: SyncPhase, source: RemoteError) -> Self {
        match source {
            RemoteError::Unreachable(_) if phase == SyncPhase::Session => SyncError::Offline,
            RemoteError::Credentials(message) => SyncError::Credentials(message),
            source => SyncError::Remote { phase, source },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Offline => true,
            SyncError::AlreadySyncing => true,
            SyncError::PhaseFailed { .. } => true,
            SyncError::Remote { source, .. } => !matches!(source, RemoteError::Credentials(_)),
            _ => false,
        }
    }

    /// Phase that was halted, if any.
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncError::Remote { phase, .. } | SyncError::PhaseFailed { phase, .. } => Some(*phase),
            SyncError::Offline | SyncError::Credentials(_) => Some(SyncPhase::Session),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Offline.is_retryable());
        assert!(SyncError::AlreadySyncing.is_retryable());
        assert!(SyncError::remote(
            SyncPhase::RemoteFiles,
            RemoteError::Unreachable("reset".into())
        )
        .is_retryable());
        assert!(!SyncError::Credentials("revoked".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn remote_classification() {
        let err = SyncError::remote(SyncPhase::Session, RemoteError::Unreachable("down".into()));
        assert!(matches!(err, SyncError::Offline));

        let err = SyncError::remote(SyncPhase::Fetch, RemoteError::Credentials("expired".into()));
        assert!(matches!(err, SyncError::Credentials(_)));
        assert_eq!(err.phase(), Some(SyncPhase::Session));
    }

    #[test]
    fn error_display() {
        let err = SyncError::PhaseFailed {
            phase: SyncPhase::RemoteFiles,
            failures: vec![ItemFailure::new("a.md", "quota"), ItemFailure::new("b.md", "quota")],
        };
        assert_eq!(err.to_string(), "remote files failed for 2 item(s)");

        let err = SyncError::remote(SyncPhase::RemoteDelete, RemoteError::NotFound("obj-1".into()));
        assert!(err.to_string().starts_with("remote delete failed"));
    }
}
