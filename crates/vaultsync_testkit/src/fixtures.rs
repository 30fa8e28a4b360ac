//! Test fixtures and device helpers.
//!
//! A [`TestCloud`] owns one in-memory remote and one manual clock; every
//! [`TestVault`] it hands out is a separate device syncing against them.

use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;
use vaultsync_core::{
    path, Clock, DisposalPolicy, EntryKind, LocalEvent, LocalStore, ManualClock, MemorySettings,
    RemoteStore, SettingsStore,
};
use vaultsync_engine::{AutoApprove, PushReview, SyncConfig, SyncEngine, SyncObserver, SyncPhase};
use vaultsync_store::{FsLocalStore, MemoryLocalStore, MemoryRemoteStore};

/// Observer that keeps everything it is told.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    notices: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    progress: Mutex<Vec<(SyncPhase, usize, usize)>>,
}

impl RecordingObserver {
    /// Creates an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices received so far.
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }

    /// Failures received so far.
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }

    /// Progress reports received so far.
    pub fn progress(&self) -> Vec<(SyncPhase, usize, usize)> {
        self.progress.lock().clone()
    }

    /// Returns true if any notice contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.notices.lock().iter().any(|n| n.contains(needle))
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.notices.lock().clear();
        self.failures.lock().clear();
        self.progress.lock().clear();
    }
}

impl SyncObserver for RecordingObserver {
    fn notice(&self, message: &str) {
        self.notices.lock().push(message.to_string());
    }

    fn failure(&self, message: &str) {
        self.failures.lock().push(message.to_string());
    }

    fn progress(&self, phase: SyncPhase, done: usize, total: usize) {
        self.progress.lock().push((phase, done, total));
    }
}

/// A remote shared by any number of devices.
pub struct TestCloud {
    /// The remote store.
    pub remote: Arc<MemoryRemoteStore>,
    /// Clock shared by the remote and every device.
    pub clock: Arc<ManualClock>,
}

impl TestCloud {
    /// Creates an empty cloud.
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
        Self { remote, clock }
    }

    /// A fresh device with default config that approves every push.
    pub fn device(&self) -> TestVault {
        self.device_with(SyncConfig::default(), Arc::new(AutoApprove))
    }

    /// A fresh device with the given config and review hook.
    pub fn device_with(&self, config: SyncConfig, review: Arc<dyn PushReview>) -> TestVault {
        self.attach(
            self.remote.clone(),
            config,
            review,
            self.vault(DisposalPolicy::default()),
            Arc::new(MemorySettings::new()),
        )
    }

    /// A fresh device whose vault disposes of removed entries per `policy`.
    pub fn device_with_policy(&self, policy: DisposalPolicy) -> TestVault {
        self.attach(
            self.remote.clone(),
            SyncConfig::default(),
            Arc::new(AutoApprove),
            self.vault(policy),
            Arc::new(MemorySettings::new()),
        )
    }

    /// A fresh device that reaches the cloud through `remote`, usually a
    /// wrapper around [`TestCloud::remote`].
    pub fn device_through(&self, remote: Arc<dyn RemoteStore>) -> TestVault {
        self.attach(
            remote,
            SyncConfig::default(),
            Arc::new(AutoApprove),
            self.vault(DisposalPolicy::default()),
            Arc::new(MemorySettings::new()),
        )
    }

    /// The same device after a restart: same vault, same persisted settings.
    pub fn restart(&self, device: &TestVault) -> TestVault {
        self.attach(
            self.remote.clone(),
            device.engine.config().clone(),
            Arc::new(AutoApprove),
            device.local.clone(),
            device.settings.clone(),
        )
    }

    /// A device whose vault lives in a temporary directory.
    pub fn fs_device(&self) -> FsVault {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let local = Arc::new(FsLocalStore::new(dir.path()));
        let observer = Arc::new(RecordingObserver::new());
        let clock: Arc<dyn Clock> = self.clock.clone();
        let engine = SyncEngine::builder(
            self.remote.clone(),
            local.clone(),
            Arc::new(MemorySettings::new()),
        )
        .clock(clock)
        .observer(observer.clone())
        .build()
        .expect("Failed to build engine");
        FsVault {
            engine,
            local,
            observer,
            _dir: dir,
        }
    }

    fn vault(&self, policy: DisposalPolicy) -> Arc<MemoryLocalStore> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        Arc::new(MemoryLocalStore::with_clock(clock).with_policy(policy))
    }

    fn attach(
        &self,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
        review: Arc<dyn PushReview>,
        local: Arc<MemoryLocalStore>,
        settings: Arc<MemorySettings>,
    ) -> TestVault {
        let observer = Arc::new(RecordingObserver::new());
        let clock: Arc<dyn Clock> = self.clock.clone();
        let store: Arc<dyn SettingsStore> = settings.clone();
        let engine = SyncEngine::builder(remote, local.clone(), store)
            .config(config)
            .clock(clock)
            .observer(observer.clone())
            .review(review)
            .build()
            .expect("Failed to build engine");
        TestVault {
            engine,
            local,
            settings,
            observer,
        }
    }
}

impl Default for TestCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// One device: an engine over an in-memory vault.
///
/// The mutation helpers change the vault and report the change to the
/// engine, the way a vault watcher would.
pub struct TestVault {
    /// The engine under test.
    pub engine: SyncEngine,
    /// The device's vault.
    pub local: Arc<MemoryLocalStore>,
    /// The device's persisted settings.
    pub settings: Arc<MemorySettings>,
    /// Everything the engine reported.
    pub observer: Arc<RecordingObserver>,
}

impl TestVault {
    /// Creates or overwrites a file, creating missing folders first.
    pub fn write(&self, p: &str, bytes: &[u8]) {
        self.create_ancestors(p);
        let existed = self.local.kind(p).is_some();
        self.local.add_file(p, bytes);
        let event = if existed {
            LocalEvent::Modified { path: p.to_string() }
        } else {
            LocalEvent::Created {
                path: p.to_string(),
                kind: EntryKind::File,
            }
        };
        self.engine.record(event);
    }

    /// Creates a folder and any missing ancestors.
    pub fn mkdir(&self, p: &str) {
        self.create_ancestors(p);
        if self.local.kind(p).is_none() {
            self.local.add_folder(p);
            self.engine.record(LocalEvent::Created {
                path: p.to_string(),
                kind: EntryKind::Folder,
            });
        }
    }

    /// Deletes a file or a whole folder.
    pub async fn delete(&self, p: &str) {
        let kind = self.local.kind(p).expect("Nothing to delete");
        let removed = match kind {
            EntryKind::File => self.local.remove(p).await,
            EntryKind::Folder => self.local.rmdir(p, true).await,
        };
        removed.expect("Failed to delete");
        self.engine.record(LocalEvent::Deleted {
            path: p.to_string(),
            kind,
        });
    }

    /// Moves a file.
    pub async fn rename(&self, from: &str, to: &str) {
        let bytes = self.local.content(from).expect("Nothing to rename");
        self.local.remove(from).await.expect("Failed to remove");
        self.create_ancestors(to);
        self.local.add_file(to, &bytes);
        self.engine.record(LocalEvent::Renamed {
            from: from.to_string(),
            to: to.to_string(),
            kind: EntryKind::File,
        });
    }

    /// Content of a vault file as text.
    pub fn text(&self, p: &str) -> Option<String> {
        self.local
            .content(p)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    fn create_ancestors(&self, p: &str) {
        let mut missing: Vec<&str> = path::ancestors(p)
            .filter(|a| self.local.kind(a).is_none())
            .collect();
        missing.reverse();
        for dir in missing {
            self.local.add_folder(dir);
            self.engine.record(LocalEvent::Created {
                path: dir.to_string(),
                kind: EntryKind::Folder,
            });
        }
    }
}

/// A device whose vault is a real directory.
pub struct FsVault {
    /// The engine under test.
    pub engine: SyncEngine,
    /// The device's vault.
    pub local: Arc<FsLocalStore>,
    /// Everything the engine reported.
    pub observer: Arc<RecordingObserver>,
    _dir: TempDir,
}

impl FsVault {
    /// Vault root on disk.
    pub fn root(&self) -> &std::path::Path {
        self.local.root()
    }

    /// Writes a file under the vault root and records the event.
    pub fn write(&self, p: &str, bytes: &[u8]) {
        let target = self.root().join(p);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create folders");
        }
        let existed = target.exists();
        std::fs::write(&target, bytes).expect("Failed to write file");
        let event = if existed {
            LocalEvent::Modified { path: p.to_string() }
        } else {
            LocalEvent::Created {
                path: p.to_string(),
                kind: EntryKind::File,
            }
        };
        self.engine.record(event);
    }

    /// Reads a file under the vault root.
    pub fn read(&self, p: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root().join(p)).ok()
    }
}

