//! Sync engine facade.

use crate::config::SyncConfig;
use crate::context::{ReconcileContext, SharedState};
use crate::error::{SyncError, SyncResult};
use crate::observer::{SyncObserver, TracingObserver};
use crate::pull::{self, PullReport};
use crate::push::{self, PushReport};
use crate::review::{AutoApprove, PushReview};
use crate::saver::DebouncedSaver;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use vaultsync_core::{
    Clock, LocalEvent, LocalStore, PendingOp, RemoteStore, SettingsStore, SyncCheckpoint,
    SyncSettings, SystemClock,
};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is pulling changes from the remote.
    Pulling,
    /// Engine is pushing local changes.
    Pushing,
    /// Engine has completed a sync.
    Synced,
    /// The last sync failed.
    Error,
}

impl SyncState {
    /// Returns true if a sync is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Pushes completed.
    pub pushes: u64,
    /// Standalone pulls completed.
    pub pulls: u64,
    /// Files uploaded or updated.
    pub uploads: u64,
    /// Files downloaded.
    pub downloads: u64,
    /// Remote objects deleted.
    pub remote_deletes: u64,
    /// Local entries deleted.
    pub local_deletes: u64,
    /// Paths where pending local work met a remote change.
    pub conflicts: u64,
    /// Checkpoint time of the last successful sync.
    pub last_synced_at: Option<u64>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Releases the syncing flag on drop.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn SyncObserver>,
    review: Arc<dyn PushReview>,
}

impl SyncEngineBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the observer receiving notices.
    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the push review hook.
    pub fn review(mut self, review: Arc<dyn PushReview>) -> Self {
        self.review = review;
        self
    }

    /// Loads persisted settings and builds the engine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let state = SharedState::from_settings(self.settings.load()?);
        debug!(
            pending = state.log.len(),
            indexed = state.index.len(),
            "loaded sync state"
        );
        let ctx = Arc::new(ReconcileContext::new(
            self.config,
            self.remote,
            self.local,
            self.clock,
            self.observer,
            state,
        ));

        let source_ctx = Arc::clone(&ctx);
        let saver = DebouncedSaver::new(
            self.settings,
            Arc::new(move || source_ctx.settings()),
            ctx.config.save_debounce(),
        );

        Ok(SyncEngine {
            ctx,
            saver,
            review: self.review,
            syncing: AtomicBool::new(false),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        })
    }
}

/// Keeps a vault and a remote store in sync.
///
/// One sync runs at a time; a push or pull started while another is running
/// is rejected with [`SyncError::AlreadySyncing`].
pub struct SyncEngine {
    ctx: Arc<ReconcileContext>,
    saver: DebouncedSaver,
    review: Arc<dyn PushReview>,
    syncing: AtomicBool,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl SyncEngine {
    /// Starts building an engine over the given collaborators.
    pub fn builder(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config: SyncConfig::default(),
            remote,
            local,
            settings,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
            review: Arc::new(AutoApprove),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    /// Pending operations in path order.
    pub fn pending(&self) -> Vec<(String, PendingOp)> {
        self.ctx.with_state(|s| s.log.snapshot())
    }

    /// Remote id recorded for a path.
    pub fn remote_id(&self, p: &str) -> Option<String> {
        self.ctx.with_state(|s| s.index.id_of(p).map(str::to_string))
    }

    /// Number of indexed remote objects.
    pub fn indexed(&self) -> usize {
        self.ctx.with_state(|s| s.index.len())
    }

    /// Current checkpoint.
    pub fn checkpoint(&self) -> SyncCheckpoint {
        self.ctx.with_state(|s| s.checkpoint.clone())
    }

    /// Current state as it would be persisted.
    pub fn settings(&self) -> SyncSettings {
        self.ctx.settings()
    }

    /// Records a local mutation.
    ///
    /// Events touching internal paths are ignored; they travel through the
    /// config sync instead.
    pub fn record(&self, event: LocalEvent) {
        if event.paths().iter().any(|p| self.ctx.config.is_internal(p)) {
            debug!(?event, "ignoring internal path");
            return;
        }
        self.ctx.with_state(|s| s.log.record(&event));
        self.saver.schedule();
    }

    /// Writes settings now.
    pub fn flush(&self) -> SyncResult<()> {
        Ok(self.saver.flush()?)
    }

    /// Pushes pending local operations, pulling remote changes first.
    pub async fn push(&self) -> SyncResult<PushReport> {
        let _guard = self.begin()?;
        self.set_state(SyncState::Pushing);

        let result = async {
            let session = self.ctx.open_session().await?;
            push::run(&self.ctx, self.review.as_ref(), session).await
        }
        .await;

        match &result {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.pushes += 1;
                stats.uploads += (report.uploaded + report.updated) as u64;
                stats.remote_deletes += report.deleted_remote as u64;
                Self::count_pull(&mut stats, &report.pull);
                stats.last_synced_at = Some(self.checkpoint().last_synced_at());
                stats.last_error = None;
            }
            Err(SyncError::Cancelled) => {
                self.ctx.observer.notice("push cancelled");
            }
            Err(_) => {}
        }
        self.finish(result)
    }

    /// Pulls remote changes.
    ///
    /// The checkpoint moves to the session start. An up-to-date pull only
    /// moves the change token. A silent pull leaves the checkpoint where it
    /// is and reports nothing to the observer.
    pub async fn pull(&self, silent: bool) -> SyncResult<PullReport> {
        let _guard = self.begin()?;
        self.set_state(SyncState::Pulling);

        let result = async {
            let session = self.ctx.open_session().await?;
            let report = pull::reconcile(&self.ctx).await?;
            if !silent {
                self.ctx.with_state(|s| {
                    let synced_at = if report.up_to_date {
                        s.checkpoint.last_synced_at()
                    } else {
                        session.started_at
                    };
                    s.commit(synced_at, session.token)
                })?;
            }
            Ok::<_, SyncError>(report)
        }
        .await;

        if let Ok(report) = &result {
            let mut stats = self.stats.write();
            stats.pulls += 1;
            Self::count_pull(&mut stats, report);
            stats.last_error = None;
            if !silent {
                stats.last_synced_at = Some(self.checkpoint().last_synced_at());
                drop(stats);
                if report.up_to_date {
                    self.ctx.observer.notice("already up to date");
                } else {
                    self.ctx.observer.notice(&format!(
                        "pulled {} change(s), {} removal(s)",
                        report.fetched, report.removed
                    ));
                }
            }
        }
        self.finish(result)
    }

    fn count_pull(stats: &mut SyncStats, report: &PullReport) {
        stats.downloads += report.downloaded as u64;
        stats.local_deletes += report.deleted_local as u64;
        stats.conflicts += (report.kept_local + report.flipped) as u64;
    }

    fn begin(&self) -> SyncResult<SyncGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::AlreadySyncing)?;
        Ok(SyncGuard(&self.syncing))
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Persists state and settles the engine state after a sync attempt.
    fn finish<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        if let Err(e) = self.saver.flush() {
            warn!(error = %e, "failed to save settings");
            if result.is_ok() {
                self.set_state(SyncState::Error);
                return Err(e.into());
            }
        }
        match &result {
            Ok(_) => self.set_state(SyncState::Synced),
            Err(SyncError::Cancelled) => self.set_state(SyncState::Idle),
            Err(e) => {
                self.ctx.observer.failure(&format!("sync failed: {e}"));
                self.stats.write().last_error = Some(e.to_string());
                self.set_state(SyncState::Error);
            }
        }
        result
    }
}
