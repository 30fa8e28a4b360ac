//! Persisted sync settings.

use crate::checkpoint::SyncCheckpoint;
use crate::error::CoreResult;
use crate::index::RemoteIdIndex;
use crate::oplog::{OperationLog, PendingOp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// The single persisted settings object.
///
/// Also mirrored to the remote as a config object so a fresh device can
/// bootstrap from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Long-lived credential used to mint access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Pending operations keyed by vault path.
    #[serde(default)]
    pub operations: BTreeMap<String, PendingOp>,
    /// Remote id → vault path.
    #[serde(default, rename = "driveIdToPath")]
    pub drive_id_to_path: BTreeMap<String, String>,
    /// Checkpoint timestamp (ms since epoch).
    #[serde(default)]
    pub last_synced_at: u64,
    /// Change-feed continuation token.
    #[serde(default)]
    pub changes_token: String,
}

impl SyncSettings {
    /// Builds settings from live state.
    pub fn capture(
        refresh_token: Option<String>,
        log: &OperationLog,
        index: &RemoteIdIndex,
        checkpoint: &SyncCheckpoint,
    ) -> Self {
        Self {
            refresh_token,
            operations: log.as_map().clone(),
            drive_id_to_path: index.as_map().clone(),
            last_synced_at: checkpoint.last_synced_at(),
            changes_token: checkpoint.changes_token().unwrap_or_default().to_string(),
        }
    }

    /// Splits settings into live state.
    pub fn into_parts(self) -> (Option<String>, OperationLog, RemoteIdIndex, SyncCheckpoint) {
        (
            self.refresh_token,
            OperationLog::from_map(self.operations),
            RemoteIdIndex::from_map(self.drive_id_to_path),
            SyncCheckpoint::new(self.last_synced_at, self.changes_token),
        )
    }

    /// Encodes the snapshot uploaded as the remote state object.
    pub fn to_snapshot_bytes(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a snapshot previously produced by [`Self::to_snapshot_bytes`].
    pub fn from_snapshot_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Where settings are persisted.
pub trait SettingsStore: Send + Sync {
    /// Loads settings; a store that was never written yields defaults.
    fn load(&self) -> CoreResult<SyncSettings>;

    /// Durably writes settings.
    fn save(&self, settings: &SyncSettings) -> CoreResult<()>;
}

/// Settings stored as a JSON file.
///
/// Writes go to a sibling temp file which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self) -> CoreResult<SyncSettings> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, settings: &SyncSettings) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(settings)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory settings store for tests.
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RwLock<SyncSettings>,
    saves: AtomicU64,
}

impl MemorySettings {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with settings.
    pub fn with_settings(settings: SyncSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            saves: AtomicU64::new(0),
        }
    }

    /// Last saved settings.
    pub fn current(&self) -> SyncSettings {
        self.settings.read().clone()
    }

    /// Number of times `save` was called.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> CoreResult<SyncSettings> {
        Ok(self.settings.read().clone())
    }

    fn save(&self, settings: &SyncSettings) -> CoreResult<()> {
        *self.settings.write() = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncSettings {
        let mut settings = SyncSettings {
            refresh_token: Some("rt".into()),
            last_synced_at: 42,
            changes_token: "17".into(),
            ..Default::default()
        };
        settings
            .operations
            .insert("notes/a.md".into(), PendingOp::Create);
        settings
            .drive_id_to_path
            .insert("id-9".into(), "notes".into());
        settings
    }

    #[test]
    fn json_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["refreshToken"], "rt");
        assert_eq!(json["operations"]["notes/a.md"], "create");
        assert_eq!(json["driveIdToPath"]["id-9"], "notes");
        assert_eq!(json["lastSyncedAt"], 42);
        assert_eq!(json["changesToken"], "17");
    }

    #[test]
    fn missing_fields_default() {
        let settings: SyncSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn parts_capture_each_other() {
        let (token, log, index, cp) = sample().into_parts();
        assert_eq!(log.get("notes/a.md"), Some(PendingOp::Create));
        assert_eq!(index.id_of("notes"), Some("id-9"));
        assert_eq!(cp.changes_token(), Some("17"));

        let back = SyncSettings::capture(token, &log, &index, &cp);
        assert_eq!(back, sample());
    }

    #[test]
    fn json_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSettings::new(dir.path().join("state/settings.json"));

        assert_eq!(store.load().unwrap(), SyncSettings::default());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn snapshot_bytes() {
        let bytes = sample().to_snapshot_bytes().unwrap();
        assert_eq!(SyncSettings::from_snapshot_bytes(&bytes).unwrap(), sample());
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemorySettings::new();
        store.save(&sample()).unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.current(), sample());
    }
}
