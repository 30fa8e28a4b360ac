//! Conflict resolution between pending local operations and remote events.

use vaultsync_core::{EntryKind, PendingOp};

/// What happened to a path on the remote since the last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Object created or updated.
    Changed,
    /// Object removed.
    Removed {
        /// The path is now held by another live object.
        remapped: bool,
    },
}

/// Decision for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Download remote content and write it locally.
    Download,
    /// Create the folder locally if missing.
    CreateFolder,
    /// Leave local state and the pending entry alone.
    KeepLocal,
    /// Local create collides with a remote object: push it as an update.
    FlipToModify,
    /// Remote object is gone: push the local file as a new object.
    FlipToCreate,
    /// Local and remote already agree; drop the pending entry.
    ClearEntry,
    /// Remote wins over a local delete: bring the entry back and drop the
    /// pending delete.
    Restore,
    /// Delete the local entry.
    DeleteLocal,
}

/// Decides how a remote event interacts with the pending local operation.
///
/// Concurrent modifications resolve as last writer wins in sync order: the
/// device that pushes later overwrites the remote copy.
pub fn resolve(local: Option<PendingOp>, kind: EntryKind, event: RemoteEvent) -> Resolution {
    use PendingOp::{Create, Delete, Modify};

    match (event, local, kind) {
        (RemoteEvent::Changed, None, EntryKind::File) => Resolution::Download,
        (RemoteEvent::Changed, None, EntryKind::Folder) => Resolution::CreateFolder,
        (RemoteEvent::Changed, Some(Modify), EntryKind::File) => Resolution::KeepLocal,
        (RemoteEvent::Changed, Some(Create), EntryKind::File) => Resolution::FlipToModify,
        (RemoteEvent::Changed, Some(Create | Modify), EntryKind::Folder) => Resolution::ClearEntry,
        (RemoteEvent::Changed, Some(Delete), _) => Resolution::Restore,

        // The upsert pass owns paths that a live object still maps to.
        (RemoteEvent::Removed { remapped: true }, _, _) => Resolution::KeepLocal,
        (RemoteEvent::Removed { .. }, None, _) => Resolution::DeleteLocal,
        (RemoteEvent::Removed { .. }, Some(Modify), EntryKind::File) => Resolution::FlipToCreate,
        (RemoteEvent::Removed { .. }, Some(Modify), EntryKind::Folder) => Resolution::KeepLocal,
        (RemoteEvent::Removed { .. }, Some(Create), _) => Resolution::KeepLocal,
        (RemoteEvent::Removed { .. }, Some(Delete), _) => Resolution::ClearEntry,
    }
}

/// Decides a remote folder removal when some local descendants survive it.
///
/// A folder that still holds entries not being deleted is kept and pushed
/// back as a new folder.
pub fn resolve_folder_removal(local: Option<PendingOp>, has_survivors: bool) -> Resolution {
    match resolve(local, EntryKind::Folder, RemoteEvent::Removed { remapped: false }) {
        Resolution::DeleteLocal if has_survivors => Resolution::FlipToCreate,
        other => other,
    }
}
