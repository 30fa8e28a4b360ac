//! Operator-facing notices and progress.

use crate::error::SyncPhase;
use tracing::{debug, info, warn};

/// Receives human-readable notices and progress from the engine.
pub trait SyncObserver: Send + Sync {
    /// A message for the operator.
    fn notice(&self, message: &str);

    /// A failure the operator should see.
    fn failure(&self, message: &str) {
        self.notice(message);
    }

    /// `done` of `total` items in `phase` have settled.
    fn progress(&self, _phase: SyncPhase, _done: usize, _total: usize) {}
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn notice(&self, message: &str) {
        info!(target: "vaultsync", "{message}");
    }

    fn failure(&self, message: &str) {
        warn!(target: "vaultsync", "{message}");
    }

    fn progress(&self, phase: SyncPhase, done: usize, total: usize) {
        debug!(target: "vaultsync", %phase, done, total, "progress");
    }
}
