//! Sync checkpoint.

use crate::error::{CoreError, CoreResult};

/// Resume point for the next reconciliation.
///
/// `last_synced_at` bounds the "recently modified" query; `changes_token`
/// is the continuation cursor into the remote change feed.
///
/// # Invariants
///
/// - Advances only after a full reconciliation succeeds
/// - Never moves backward
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCheckpoint {
    last_synced_at: u64,
    changes_token: String,
}

impl SyncCheckpoint {
    /// Creates a checkpoint from persisted state.
    pub fn new(last_synced_at: u64, changes_token: impl Into<String>) -> Self {
        Self {
            last_synced_at,
            changes_token: changes_token.into(),
        }
    }

    /// Timestamp (ms since epoch) of the last completed sync. 0 if never.
    pub fn last_synced_at(&self) -> u64 {
        self.last_synced_at
    }

    /// Change-feed continuation token, if one has been obtained.
    pub fn changes_token(&self) -> Option<&str> {
        if self.changes_token.is_empty() {
            None
        } else {
            Some(&self.changes_token)
        }
    }

    /// Returns true if no sync has ever completed.
    pub fn is_initial(&self) -> bool {
        self.last_synced_at == 0 && self.changes_token.is_empty()
    }

    /// Moves the checkpoint forward.
    pub fn advance(&mut self, synced_at: u64, token: impl Into<String>) -> CoreResult<()> {
        if synced_at < self.last_synced_at {
            return Err(CoreError::CheckpointRegression {
                current: self.last_synced_at,
                attempted: synced_at,
            });
        }
        self.last_synced_at = synced_at;
        self.changes_token = token.into();
        Ok(())
    }
}
