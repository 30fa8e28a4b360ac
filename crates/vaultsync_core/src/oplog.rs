//! Operation log for pending local mutations.

use crate::path::EntryKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of pending operation recorded for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOp {
    /// Entry exists locally and has never been pushed.
    Create,
    /// Entry exists on both sides and local content changed.
    Modify,
    /// Entry was removed locally.
    Delete,
}

impl std::fmt::Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            PendingOp::Create => "create",
            PendingOp::Modify => "modify",
            PendingOp::Delete => "delete",
        })
    }
}

/// A local mutation as reported by the store watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Entry appeared.
    Create,
    /// File content changed.
    Modify,
    /// Entry disappeared.
    Delete,
}

/// Applies one local event to the current pending state of a path.
///
/// Returns the new state; `None` means no entry should be kept.
pub fn transition(
    current: Option<PendingOp>,
    event: EventKind,
    kind: EntryKind,
) -> Option<PendingOp> {
    match (event, current) {
        // Existed remotely, was marked deleted, and reappeared: an edit.
        (EventKind::Create, Some(PendingOp::Delete)) => match kind {
            EntryKind::File => Some(PendingOp::Modify),
            EntryKind::Folder => None,
        },
        (EventKind::Create, None) => Some(PendingOp::Create),
        (EventKind::Create, other) => other,

        // Never pushed, fully cancels.
        (EventKind::Delete, Some(PendingOp::Create)) => None,
        (EventKind::Delete, _) => Some(PendingOp::Delete),

        (EventKind::Modify, Some(op @ (PendingOp::Create | PendingOp::Modify))) => Some(op),
        (EventKind::Modify, _) => Some(PendingOp::Modify),
    }
}

/// A local mutation event carrying the paths it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// A file or folder was created.
    Created {
        /// Vault path.
        path: String,
        /// File or folder.
        kind: EntryKind,
    },
    /// A file's content changed.
    Modified {
        /// Vault path.
        path: String,
    },
    /// A file or folder was removed.
    Deleted {
        /// Vault path.
        path: String,
        /// File or folder.
        kind: EntryKind,
    },
    /// An entry moved from one path to another.
    Renamed {
        /// Previous vault path.
        from: String,
        /// New vault path.
        to: String,
        /// File or folder.
        kind: EntryKind,
    },
}

impl LocalEvent {
    /// Paths affected by this event.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            LocalEvent::Created { path, .. }
            | LocalEvent::Modified { path }
            | LocalEvent::Deleted { path, .. } => vec![path.as_str()],
            LocalEvent::Renamed { from, to, .. } => vec![from.as_str(), to.as_str()],
        }
    }
}

/// A pending operation together with the entry kind it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Vault path.
    pub path: String,
    /// Pending operation.
    pub op: PendingOp,
    /// File or folder.
    pub kind: EntryKind,
}

impl PendingEntry {
    /// Creates a new entry.
    pub fn new(path: impl Into<String>, op: PendingOp, kind: EntryKind) -> Self {
        Self {
            path: path.into(),
            op,
            kind,
        }
    }
}

/// Per-path log of local mutations awaiting push.
///
/// # Invariants
///
/// - A path has at most one pending operation
/// - Transitions that cancel out remove the entry
/// - Iteration order is the sorted path order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationLog {
    ops: BTreeMap<String, PendingOp>,
}

impl OperationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log from persisted state.
    pub fn from_map(ops: BTreeMap<String, PendingOp>) -> Self {
        Self { ops }
    }

    /// Returns the pending operation for a path.
    pub fn get(&self, path: &str) -> Option<PendingOp> {
        self.ops.get(path).copied()
    }

    /// Overwrites the pending operation for a path.
    ///
    /// Used by reconciler bookkeeping; local events go through [`Self::apply`].
    pub fn set(&mut self, path: impl Into<String>, op: PendingOp) {
        self.ops.insert(path.into(), op);
    }

    /// Removes the entry for a path.
    pub fn remove(&mut self, path: &str) -> Option<PendingOp> {
        self.ops.remove(path)
    }

    /// Removes every entry at or below `dir`.
    pub fn remove_within(&mut self, dir: &str) -> Vec<(String, PendingOp)> {
        let doomed: Vec<String> = self
            .ops
            .keys()
            .filter(|p| crate::path::is_within(p, dir))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|p| self.ops.remove(&p).map(|op| (p, op)))
            .collect()
    }

    /// Applies a local event to one path.
    ///
    /// Returns the resulting state.
    pub fn apply(&mut self, path: &str, event: EventKind, kind: EntryKind) -> Option<PendingOp> {
        let next = transition(self.get(path), event, kind);
        match next {
            Some(op) => {
                self.ops.insert(path.to_string(), op);
            }
            None => {
                self.ops.remove(path);
            }
        }
        next
    }

    /// Records a local event. Renames run as delete then create.
    pub fn record(&mut self, event: &LocalEvent) {
        match event {
            LocalEvent::Created { path, kind } => {
                self.apply(path, EventKind::Create, *kind);
            }
            LocalEvent::Modified { path } => {
                self.apply(path, EventKind::Modify, EntryKind::File);
            }
            LocalEvent::Deleted { path, kind } => {
                self.apply(path, EventKind::Delete, *kind);
            }
            LocalEvent::Renamed { from, to, kind } => {
                self.apply(from, EventKind::Delete, *kind);
                self.apply(to, EventKind::Create, *kind);
            }
        }
    }

    /// Iterates over entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, PendingOp)> {
        self.ops.iter().map(|(p, op)| (p.as_str(), *op))
    }

    /// Paths currently pending the given operation.
    pub fn paths_with(&self, op: PendingOp) -> Vec<String> {
        self.ops
            .iter()
            .filter(|(_, o)| **o == op)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Sorted copy of all entries.
    pub fn snapshot(&self) -> Vec<(String, PendingOp)> {
        self.ops.iter().map(|(p, op)| (p.clone(), *op)).collect()
    }

    /// Borrow of the underlying map, for persistence.
    pub fn as_map(&self) -> &BTreeMap<String, PendingOp> {
        &self.ops
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Clears all entries.
    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
