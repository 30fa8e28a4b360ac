//! # vaultsync Core
//!
//! Data model and collaborator interfaces for vaultsync.
//!
//! This crate provides:
//! - `OperationLog` and the pure per-path transition function
//! - `RemoteIdIndex`, the bidirectional remote id / local path map
//! - `SyncCheckpoint` and the persisted `SyncSettings` object
//! - `RemoteStore` and `LocalStore` collaborator traits
//! - Vault path helpers and the `Clock` abstraction
//!
//! This crate performs no synchronization itself; the reconcilers live in
//! `vaultsync_engine`.
//!
//! ## Key Invariants
//!
//! - A path has at most one pending operation
//! - Cancelling transitions remove the entry entirely
//! - A path maps to at most one live remote id
//! - The checkpoint never moves backward

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod clock;
mod error;
mod index;
mod local;
mod oplog;
pub mod path;
mod remote;
mod settings;

pub use checkpoint::SyncCheckpoint;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use index::RemoteIdIndex;
pub use local::{
    dispose, list_recursive, DisposalPolicy, LocalEntry, LocalError, LocalResult, LocalStore,
};
pub use oplog::{transition, EventKind, LocalEvent, OperationLog, PendingEntry, PendingOp};
pub use path::EntryKind;
pub use remote::{
    ChangeEntry, ObjectProperties, RemoteError, RemoteObject, RemoteResult, RemoteStore,
    SearchFilter,
};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore, SyncSettings};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
