//! Remote object store interface.

use crate::path::{self, EntryKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The access credential is missing, expired, or was refused.
    #[error("credential error: {0}")]
    Credentials(String),

    /// The referenced object does not exist.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// The remote rejected the call.
    #[error("{op} failed: {message}")]
    Rejected {
        /// Name of the call.
        op: &'static str,
        /// Message returned by the remote.
        message: String,
    },
}

impl RemoteError {
    /// Creates a rejection for the named call.
    pub fn rejected(op: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            op,
            message: message.into(),
        }
    }
}

/// Annotations attached to every object this engine creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    /// Canonical vault path of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Marks internal application-state objects.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub config: bool,
}

impl ObjectProperties {
    /// Properties for ordinary vault content.
    pub fn vault(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            config: false,
        }
    }

    /// Properties for an internal config object.
    pub fn config(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            config: true,
        }
    }
}

/// Metadata of one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Opaque, stable identifier.
    pub id: String,
    /// Display name (final path segment).
    pub name: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Engine annotations.
    pub properties: ObjectProperties,
    /// Modification time (ms since epoch).
    pub modified_at: u64,
}

impl RemoteObject {
    /// Vault path annotation, if any.
    pub fn path(&self) -> Option<&str> {
        self.properties.path.as_deref()
    }

    /// Returns true for config-flagged objects.
    pub fn is_config(&self) -> bool {
        self.properties.config
    }
}

/// Query for [`RemoteStore::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Exact path annotation to match.
    pub path: Option<String>,
    /// Restrict to config (`Some(true)`) or non-config (`Some(false)`) objects.
    pub config: Option<bool>,
    /// Only objects changed strictly after this timestamp.
    pub modified_after: Option<u64>,
    /// Surface objects whose path has a dot-prefixed segment.
    pub include_hidden: bool,
}

impl SearchFilter {
    /// Matches every visible annotated object.
    pub fn all() -> Self {
        Self::default()
    }

    /// Objects changed after `ts`.
    pub fn modified_after(ts: u64) -> Self {
        Self {
            modified_after: Some(ts),
            ..Self::default()
        }
    }

    /// Config-flagged objects, hidden ones included.
    pub fn config_objects() -> Self {
        Self {
            config: Some(true),
            include_hidden: true,
            ..Self::default()
        }
    }

    /// Also surface hidden-pattern objects.
    pub fn with_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    /// Restricts to one path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Checks the annotation part of the filter.
    ///
    /// Modification bounds are left to the store, which owns change time.
    pub fn matches_properties(&self, object: &RemoteObject) -> bool {
        let Some(object_path) = object.path() else {
            return false;
        };
        if let Some(path) = &self.path {
            if path != object_path {
                return false;
            }
        }
        if let Some(config) = self.config {
            if object.is_config() != config {
                return false;
            }
        }
        self.include_hidden || !path::is_hidden(object_path)
    }
}

/// One entry of the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Affected object.
    pub id: String,
    /// True if the object was removed.
    pub removed: bool,
}

/// The remote object store.
///
/// Every call reports failure through [`RemoteError`]; callers check each
/// result explicitly.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Connectivity check.
    async fn is_reachable(&self) -> bool;

    /// Ensures a valid access credential, refreshing it if expired.
    async fn refresh_credentials(&self) -> RemoteResult<()>;

    /// Returns the id of the root folder, creating it if absent.
    async fn ensure_root(&self, name: &str) -> RemoteResult<String>;

    /// Creates a folder.
    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String>;

    /// Uploads a new file.
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        parent: Option<&str>,
        properties: ObjectProperties,
        mtime: Option<u64>,
    ) -> RemoteResult<String>;

    /// Replaces a file's content and/or modification time.
    async fn update_file(
        &self,
        id: &str,
        bytes: Option<Vec<u8>>,
        mtime: Option<u64>,
    ) -> RemoteResult<String>;

    /// Deletes several objects in one call. Folders take their descendants.
    async fn batch_delete(&self, ids: &[String]) -> RemoteResult<()>;

    /// Downloads a file's content.
    async fn get_file(&self, id: &str) -> RemoteResult<Vec<u8>>;

    /// Reads one object's metadata.
    async fn get_file_metadata(&self, id: &str) -> RemoteResult<RemoteObject>;

    /// Lists annotated objects matching a filter.
    async fn search(&self, filter: &SearchFilter) -> RemoteResult<Vec<RemoteObject>>;

    /// Change feed entries recorded since `token`.
    async fn get_changes(&self, token: &str) -> RemoteResult<Vec<ChangeEntry>>;

    /// A token pointing at the current end of the change feed.
    async fn start_page_token(&self) -> RemoteResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(path: &str, config: bool) -> RemoteObject {
        RemoteObject {
            id: "1".into(),
            name: path::file_name(path).into(),
            kind: EntryKind::File,
            properties: ObjectProperties {
                path: Some(path.into()),
                config,
            },
            modified_at: 0,
        }
    }

    #[test]
    fn filter_hides_dot_paths_by_default() {
        let visible = object("notes/a.md", false);
        let hidden = object(".app/state.json", true);

        assert!(SearchFilter::all().matches_properties(&visible));
        assert!(!SearchFilter::all().matches_properties(&hidden));
        assert!(SearchFilter::all().with_hidden().matches_properties(&hidden));
    }

    #[test]
    fn filter_by_config_and_path() {
        let plain = object("a.md", false);
        let config = object(".app/x.json", true);

        assert!(!SearchFilter::config_objects().matches_properties(&plain));
        assert!(SearchFilter::config_objects().matches_properties(&config));
        assert!(SearchFilter::all().with_path("a.md").matches_properties(&plain));
        assert!(!SearchFilter::all().with_path("b.md").matches_properties(&plain));
    }

    #[test]
    fn unannotated_objects_never_match() {
        let mut root = object("x", false);
        root.properties.path = None;
        assert!(!SearchFilter::all().with_hidden().matches_properties(&root));
    }

    #[test]
    fn properties_serialization_skips_defaults() {
        let json = serde_json::to_string(&ObjectProperties::vault("a.md")).unwrap();
        assert_eq!(json, r#"{"path":"a.md"}"#);
        let json = serde_json::to_string(&ObjectProperties::config("c")).unwrap();
        assert!(json.contains("\"config\":true"));
    }
}
