//! # vaultsync Store
//!
//! Reference collaborators for the vaultsync engine.
//!
//! This crate provides:
//! - [`MemoryRemoteStore`] - an in-memory object store with a change feed,
//!   fault injection and call counters
//! - [`DirRemoteStore`] - the same model persisted to a directory, so two
//!   vaults on one machine can sync through it
//! - [`MemoryLocalStore`] - an in-memory vault with an ordered write journal
//! - [`FsLocalStore`] - a vault rooted at a real directory
//!
//! # Architecture
//!
//! The remote model mirrors a hosted drive: objects carry opaque ids, a
//! parent pointer and `path` annotations; every write is stamped with the
//! store's own change time, which is what "modified after" searches compare
//! against; removals are appended to a change feed addressed by numeric
//! continuation tokens.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod dir_remote;
mod error;
mod fs_local;
mod memory_local;
mod memory_remote;

pub use dir_remote::DirRemoteStore;
pub use error::{StoreError, StoreResult};
pub use fs_local::{FsLocalStore, LOCAL_TRASH_DIR};
pub use memory_local::{LocalWrite, MemoryLocalStore};
pub use memory_remote::{MemoryRemoteStore, RemoteOp};
