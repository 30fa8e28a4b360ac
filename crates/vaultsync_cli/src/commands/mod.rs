//! CLI command implementations.

pub mod pull;
pub mod push;
pub mod status;
pub mod track;

use std::path::PathBuf;
use std::sync::Arc;
use vaultsync_core::{DisposalPolicy, JsonFileSettings};
use vaultsync_engine::{AutoApprove, PushReview, SyncConfig, SyncEngine};
use vaultsync_store::{DirRemoteStore, FsLocalStore};

/// Settings file name used when `--state` is not given.
pub const DEFAULT_STATE_FILE: &str = ".vaultsync-state.json";

/// Locations and options shared by every command.
pub struct Session {
    /// Vault root.
    pub vault: PathBuf,
    /// Remote store root.
    pub remote: PathBuf,
    /// Settings file.
    pub state: PathBuf,
    /// Optional JSON config file.
    pub config: Option<PathBuf>,
    /// Disposal policy for removed entries.
    pub policy: DisposalPolicy,
}

impl Session {
    /// Loads the sync configuration, or the default one.
    pub fn sync_config(&self) -> Result<SyncConfig, Box<dyn std::error::Error>> {
        match &self.config {
            Some(path) => Ok(SyncConfig::from_json(&std::fs::read(path)?)?),
            None => Ok(SyncConfig::default()),
        }
    }

    /// Builds an engine over the vault and remote directories.
    pub fn engine(
        &self,
        review: Option<Arc<dyn PushReview>>,
    ) -> Result<SyncEngine, Box<dyn std::error::Error>> {
        if !self.vault.is_dir() {
            return Err(format!("No vault found at {:?}", self.vault).into());
        }
        let remote = Arc::new(DirRemoteStore::open(&self.remote)?);
        let local = Arc::new(FsLocalStore::new(&self.vault).with_policy(self.policy));
        let settings = Arc::new(JsonFileSettings::new(&self.state));
        let engine = SyncEngine::builder(remote, local, settings)
            .config(self.sync_config()?)
            .review(review.unwrap_or_else(|| Arc::new(AutoApprove)))
            .build()?;
        Ok(engine)
    }
}
