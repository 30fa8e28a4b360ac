//! # vaultsync Engine
//!
//! Reconciliation engine keeping a local vault and a remote object store in
//! sync.
//!
//! This crate provides:
//! - Sync state machine (idle → pulling/pushing → synced)
//! - Remote-to-local reconciliation with conflict rules
//! - Local-to-remote reconciliation with review and revert
//! - Depth-ordered, bounded-concurrency scheduling
//! - Debounced settings persistence
//!
//! ## Architecture
//!
//! Every push runs a **pull-then-push** cycle:
//! 1. Open a session and capture the change token
//! 2. Let the user review pending operations
//! 3. Pull remote changes and resolve them against pending local work
//! 4. Delete, create and upload on the remote
//! 5. Sync config files and upload the state snapshot
//! 6. Advance the checkpoint
//!
//! ## Key Invariants
//!
//! - Only one sync runs at a time
//! - Parents are created before children, children deleted before parents
//! - No state lock is held across an await point
//! - The checkpoint only advances after a complete cycle

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod conflict;
mod context;
mod engine;
mod error;
mod observer;
mod pull;
mod push;
mod review;
mod saver;
mod scheduler;

pub use config::SyncConfig;
pub use conflict::{resolve, resolve_folder_removal, RemoteEvent, Resolution};
pub use context::{OwnWrite, ReconcileContext, SharedState};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncState, SyncStats};
pub use error::{ItemFailure, SyncError, SyncPhase, SyncResult};
pub use observer::{SyncObserver, TracingObserver};
pub use pull::PullReport;
pub use push::PushReport;
pub use review::{AutoApprove, PushReview, ReviewDecision, RevertTarget};
pub use saver::{DebouncedSaver, SettingsSource};
pub use scheduler::{
    depth_batches, plan_minimal_deletes, run_batches, run_bounded, BatchOrder, BatchOutcome,
};
