//! Shared reconciliation state and collaborator access.

use crate::config::SyncConfig;
use crate::error::{ItemFailure, SyncError, SyncPhase, SyncResult};
use crate::observer::SyncObserver;
use crate::scheduler::{depth_batches, run_batches, BatchOrder};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};
use vaultsync_core::{
    path, Clock, CoreResult, EntryKind, LocalStore, ObjectProperties, OperationLog, RemoteError,
    RemoteIdIndex, RemoteObject, RemoteStore, SearchFilter, SyncCheckpoint, SyncSettings,
};

/// A remote write made by this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnWrite {
    /// Modification time sent with the write.
    pub modified_at: u64,
    /// Clock reading once the write returned.
    pub written_at: u64,
}

/// Mutable sync state: log, index and checkpoint.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Pending local operations.
    pub log: OperationLog,
    /// Remote id ↔ path mapping.
    pub index: RemoteIdIndex,
    /// Last successful reconciliation.
    pub checkpoint: SyncCheckpoint,
    /// Long-lived remote credential, carried through persistence.
    pub refresh_token: Option<String>,
    /// Remote writes the checkpoint does not cover yet, by object id.
    /// Not persisted; after a restart they are fetched back once.
    pub own_writes: BTreeMap<String, OwnWrite>,
}

impl SharedState {
    /// Restores state from persisted settings.
    pub fn from_settings(settings: SyncSettings) -> Self {
        let (refresh_token, log, index, checkpoint) = settings.into_parts();
        Self {
            log,
            index,
            checkpoint,
            refresh_token,
            own_writes: BTreeMap::new(),
        }
    }

    /// Advances the checkpoint and forgets own writes that predate it.
    pub fn commit(&mut self, synced_at: u64, token: impl Into<String>) -> CoreResult<()> {
        self.checkpoint.advance(synced_at, token)?;
        self.own_writes.retain(|_, w| w.written_at >= synced_at);
        Ok(())
    }

    /// Returns true if `object` is still exactly what this device wrote.
    pub fn is_own_write(&self, object: &RemoteObject) -> bool {
        self.own_writes
            .get(&object.id)
            .is_some_and(|w| w.modified_at == object.modified_at)
    }

    /// Captures state for persistence.
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings::capture(
            self.refresh_token.clone(),
            &self.log,
            &self.index,
            &self.checkpoint,
        )
    }
}

/// An open sync session.
///
/// The clock is read before the change token, so the checkpoint committed
/// for this session never claims more than the search and the change feed
/// have covered.
#[derive(Debug, Clone)]
pub(crate) struct SyncSession {
    pub(crate) started_at: u64,
    pub(crate) token: String,
}

/// Everything a reconciler needs.
///
/// Lock scopes never span an `.await`; reconcilers copy what they need out
/// of [`SharedState`], call the collaborators, then write results back.
pub struct ReconcileContext {
    pub(crate) config: SyncConfig,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) observer: Arc<dyn SyncObserver>,
    state: Mutex<SharedState>,
    root_id: Mutex<Option<String>>,
}

impl ReconcileContext {
    /// Creates a context over restored state.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SyncObserver>,
        state: SharedState,
    ) -> Self {
        Self {
            config,
            remote,
            local,
            clock,
            observer,
            state: Mutex::new(state),
            root_id: Mutex::new(None),
        }
    }

    /// Runs `f` with the state locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Captures state for persistence.
    pub fn settings(&self) -> SyncSettings {
        self.state.lock().to_settings()
    }

    /// Checks connectivity and credentials, then takes the session start
    /// time and a fresh change token.
    ///
    /// An expired access credential is refreshed once.
    pub(crate) async fn open_session(&self) -> SyncResult<SyncSession> {
        if !self.remote.is_reachable().await {
            return Err(SyncError::Offline);
        }
        let started_at = self.clock.now_millis();
        let token = self.start_page_token().await?;
        debug!(started_at, %token, "session open");
        Ok(SyncSession { started_at, token })
    }

    async fn start_page_token(&self) -> SyncResult<String> {
        match self.remote.start_page_token().await {
            Ok(token) => Ok(token),
            Err(RemoteError::Credentials(reason)) => {
                debug!(%reason, "refreshing credentials");
                self.remote
                    .refresh_credentials()
                    .await
                    .map_err(|e| SyncError::Credentials(e.to_string()))?;
                self.remote
                    .start_page_token()
                    .await
                    .map_err(|e| SyncError::remote(SyncPhase::Session, e))
            }
            Err(e) => Err(SyncError::remote(SyncPhase::Session, e)),
        }
    }

    /// Id of the remote root folder, created on first use.
    pub(crate) async fn ensure_root(&self) -> SyncResult<String> {
        if let Some(id) = self.root_id.lock().clone() {
            return Ok(id);
        }
        let id = self
            .remote
            .ensure_root(&self.config.root_folder)
            .await
            .map_err(|e| SyncError::remote(SyncPhase::Session, e))?;
        *self.root_id.lock() = Some(id.clone());
        Ok(id)
    }

    /// Modification time to send with a remote write of `p`: the vault's,
    /// or now if the vault has none.
    pub(crate) async fn write_mtime(&self, p: &str) -> u64 {
        match self.local.stat(p).await {
            Ok(Some(entry)) => entry.modified_at,
            _ => self.clock.now_millis(),
        }
    }

    /// Remembers a remote write so the next pull does not fetch it back.
    pub(crate) fn record_own_write(&self, id: &str, modified_at: u64) {
        let written_at = self.clock.now_millis();
        self.with_state(|s| {
            s.own_writes.insert(
                id.to_string(),
                OwnWrite {
                    modified_at,
                    written_at,
                },
            );
        });
    }

    /// Id of the config object at `p`, if one exists remotely.
    pub(crate) async fn find_config_object(&self, p: &str) -> Result<Option<String>, RemoteError> {
        let found = self
            .remote
            .search(&SearchFilter::config_objects().with_path(p))
            .await?;
        Ok(found.into_iter().next().map(|o| o.id))
    }

    /// Remote parent id for a path: the indexed parent folder, or the root
    /// for top-level entries.
    pub(crate) fn parent_id(&self, p: &str) -> Option<String> {
        match path::parent(p) {
            Some(parent) => self.with_state(|s| s.index.id_of(parent).map(str::to_string)),
            None => self.root_id.lock().clone(),
        }
    }

    /// Annotations for a new remote object at `p`.
    pub(crate) fn properties(&self, p: &str) -> ObjectProperties {
        if self.config.is_internal(p) {
            ObjectProperties::config(p)
        } else {
            ObjectProperties::vault(p)
        }
    }

    /// Local kind of a path, or `None` if it is gone.
    pub(crate) async fn local_kind(&self, p: &str) -> Option<EntryKind> {
        match self.local.stat(p).await {
            Ok(entry) => entry.map(|e| e.kind),
            Err(e) => {
                debug!(path = p, error = %e, "stat failed");
                None
            }
        }
    }

    /// Ancestors of `paths` with no remote id, excluding the paths themselves.
    pub(crate) fn unindexed_ancestors<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        self.with_state(|s| {
            paths
                .into_iter()
                .flat_map(path::ancestors)
                .filter(|a| s.index.id_of(a).is_none())
                .map(str::to_string)
                .collect()
        })
    }

    /// Creates remote folders for `folders`, parents first.
    ///
    /// Folders that already have an id are skipped, and an internal folder
    /// another device created is adopted. Ids are recorded as each call
    /// completes. Returns the number of folders created.
    pub(crate) async fn create_remote_folders(
        &self,
        folders: BTreeSet<String>,
        phase: SyncPhase,
    ) -> SyncResult<usize> {
        let pending: Vec<String> = self.with_state(|s| {
            folders
                .into_iter()
                .filter(|f| s.index.id_of(f).is_none())
                .collect()
        });
        if pending.is_empty() {
            return Ok(0);
        }

        let total = pending.len();
        let done = std::sync::atomic::AtomicUsize::new(0);
        let batches = depth_batches(pending, BatchOrder::Create);
        let outcome = run_batches(batches, self.config.fan_out(), |p: String| {
            let done = &done;
            async move {
                let parent = self
                    .parent_id(&p)
                    .ok_or_else(|| RemoteError::NotFound(format!("parent of {p}")))?;
                let existing = if self.config.is_internal(&p) {
                    self.find_config_object(&p).await?
                } else {
                    None
                };
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let mtime = self.write_mtime(&p).await;
                        let id = self
                            .remote
                            .create_folder(
                                path::file_name(&p),
                                Some(&parent),
                                self.properties(&p),
                                Some(mtime),
                            )
                            .await?;
                        debug!(path = %p, %id, "created remote folder");
                        self.record_own_write(&id, mtime);
                        id
                    }
                };
                self.with_state(|s| {
                    s.index.record(id, p.clone());
                    s.log.remove(&p);
                });
                let n = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                self.observer.progress(phase, n, total);
                Ok::<_, RemoteError>(())
            }
        })
        .await;

        if !outcome.is_success() {
            return Err(self.phase_failed(phase, outcome.failed));
        }
        info!(count = outcome.completed, %phase, "created remote folders");
        Ok(outcome.completed)
    }

    /// Reports item failures and builds the phase error.
    pub(crate) fn phase_failed<E: std::fmt::Display>(
        &self,
        phase: SyncPhase,
        failed: Vec<(String, E)>,
    ) -> SyncError {
        let failures: Vec<ItemFailure> = failed
            .into_iter()
            .map(|(p, e)| ItemFailure::new(p, e))
            .collect();
        for failure in &failures {
            self.observer.failure(&format!("{phase}: {failure}"));
        }
        SyncError::PhaseFailed { phase, failures }
    }
}
