//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vaultsync_core::path;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Name of the remote folder holding the vault.
    pub root_folder: String,
    /// Vault folder holding internal application state.
    pub config_dir: String,
    /// Vault path of the mirrored state snapshot.
    pub snapshot_path: String,
    /// Maximum number of remote calls in flight.
    pub fan_out: usize,
    /// Delay before a settings write outside a sync (ms).
    pub save_debounce_ms: u64,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            root_folder: "vaultsync".into(),
            config_dir: ".vaultsync".into(),
            snapshot_path: ".vaultsync/sync-state.json".into(),
            fan_out: 8,
            save_debounce_ms: 500,
        }
    }

    /// Loads a configuration from JSON. Missing fields take defaults.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Sets the remote root folder name.
    pub fn with_root_folder(mut self, name: impl Into<String>) -> Self {
        self.root_folder = name.into();
        self
    }

    /// Sets the config directory.
    ///
    /// The snapshot moves along if it still sits in the old directory.
    pub fn with_config_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        if path::is_within(&self.snapshot_path, &self.config_dir) {
            let name = path::file_name(&self.snapshot_path).to_string();
            self.snapshot_path = path::join(&dir, &name);
        }
        self.config_dir = dir;
        self
    }

    /// Sets the snapshot path.
    pub fn with_snapshot_path(mut self, p: impl Into<String>) -> Self {
        self.snapshot_path = p.into();
        self
    }

    /// Sets the fan-out limit. Zero is treated as one.
    pub fn with_fan_out(mut self, limit: usize) -> Self {
        self.fan_out = limit.max(1);
        self
    }

    /// Sets the settings save debounce.
    pub fn with_save_debounce(mut self, delay: Duration) -> Self {
        self.save_debounce_ms = delay.as_millis() as u64;
        self
    }

    /// Settings save debounce.
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Effective fan-out limit.
    pub fn fan_out(&self) -> usize {
        self.fan_out.max(1)
    }

    /// Returns true for paths owned by the application rather than the user.
    pub fn is_internal(&self, p: &str) -> bool {
        !self.config_dir.is_empty() && path::is_within(p, &self.config_dir)
    }

    /// Returns true for the state snapshot path.
    pub fn is_snapshot(&self, p: &str) -> bool {
        p == self.snapshot_path
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
