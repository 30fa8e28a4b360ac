//! Confirmation hook consulted before a push.

use vaultsync_core::{path, PendingEntry};

/// Entries to undo instead of pushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertTarget {
    /// Exactly one path.
    Path(String),
    /// A path and everything below it.
    Subtree(String),
}

impl RevertTarget {
    /// Returns true if the target covers `p`.
    pub fn covers(&self, p: &str) -> bool {
        match self {
            RevertTarget::Path(target) => target == p,
            RevertTarget::Subtree(root) => path::is_within(p, root),
        }
    }
}

/// Outcome of a review.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReviewDecision {
    /// Push, after reverting the listed targets.
    Proceed {
        /// Entries to undo locally and drop from the log.
        revert: Vec<RevertTarget>,
    },
    /// Abort the push with no side effects.
    #[default]
    Cancel,
}

impl ReviewDecision {
    /// Push everything.
    pub fn proceed() -> Self {
        ReviewDecision::Proceed { revert: Vec::new() }
    }
}

/// Decides whether a push goes ahead.
pub trait PushReview: Send + Sync {
    /// Called with the pending entries in path order.
    fn review(&self, entries: &[PendingEntry]) -> ReviewDecision;
}

/// Approves every push unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl PushReview for AutoApprove {
    fn review(&self, _entries: &[PendingEntry]) -> ReviewDecision {
        ReviewDecision::proceed()
    }
}

impl<F> PushReview for F
where
    F: Fn(&[PendingEntry]) -> ReviewDecision + Send + Sync,
{
    fn review(&self, entries: &[PendingEntry]) -> ReviewDecision {
        self(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_core::{EntryKind, PendingOp};

    #[test]
    fn targets_cover_paths() {
        let one = RevertTarget::Path("notes/a.md".into());
        assert!(one.covers("notes/a.md"));
        assert!(!one.covers("notes/a.md/x"));

        let tree = RevertTarget::Subtree("notes".into());
        assert!(tree.covers("notes"));
        assert!(tree.covers("notes/a.md"));
        assert!(!tree.covers("notes2/a.md"));
    }

    #[test]
    fn closures_review() {
        let reviewer = |entries: &[PendingEntry]| {
            if entries.len() > 1 {
                ReviewDecision::Cancel
            } else {
                ReviewDecision::proceed()
            }
        };
        let one = [PendingEntry::new("a.md", PendingOp::Create, EntryKind::File)];
        assert_eq!(reviewer.review(&one), ReviewDecision::proceed());
        assert_eq!(AutoApprove.review(&[]), ReviewDecision::proceed());
    }
}
