//! # vaultsync Testkit
//!
//! Test utilities for vaultsync.
//!
//! This crate provides:
//! - A shared in-memory cloud and per-device vault fixtures
//! - A recording observer for asserting on notices
//! - Property-based generators for vault paths and local events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vaultsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices() {
//!     let cloud = TestCloud::new();
//!     let a = cloud.device();
//!     a.write("notes/a.md", b"hi");
//!     a.engine.push().await.unwrap();
//!
//!     let b = cloud.device();
//!     b.engine.pull(false).await.unwrap();
//!     assert_eq!(b.local.content("notes/a.md").unwrap(), b"hi");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
