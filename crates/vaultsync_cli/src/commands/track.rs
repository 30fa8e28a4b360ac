//! Track command implementation.

use super::Session;
use vaultsync_core::{path, EntryKind, LocalEvent};

/// A local change reported on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Entry created.
    Create {
        /// Vault path.
        path: String,
        /// Entry is a folder.
        folder: bool,
    },
    /// File modified.
    Modify {
        /// Vault path.
        path: String,
    },
    /// Entry deleted.
    Delete {
        /// Vault path.
        path: String,
        /// Entry was a folder.
        folder: bool,
    },
    /// Entry moved.
    Rename {
        /// Previous vault path.
        from: String,
        /// New vault path.
        to: String,
        /// Entry is a folder.
        folder: bool,
    },
}

fn kind(folder: bool) -> EntryKind {
    if folder {
        EntryKind::Folder
    } else {
        EntryKind::File
    }
}

impl Change {
    /// Converts to an engine event, normalizing paths.
    pub fn into_event(self) -> Result<LocalEvent, Box<dyn std::error::Error>> {
        Ok(match self {
            Change::Create { path: p, folder } => LocalEvent::Created {
                path: path::normalize(&p)?,
                kind: kind(folder),
            },
            Change::Modify { path: p } => LocalEvent::Modified {
                path: path::normalize(&p)?,
            },
            Change::Delete { path: p, folder } => LocalEvent::Deleted {
                path: path::normalize(&p)?,
                kind: kind(folder),
            },
            Change::Rename { from, to, folder } => LocalEvent::Renamed {
                from: path::normalize(&from)?,
                to: path::normalize(&to)?,
                kind: kind(folder),
            },
        })
    }
}

/// Runs the track command.
pub fn run(session: &Session, change: Change) -> Result<(), Box<dyn std::error::Error>> {
    let event = change.into_event()?;
    if event.paths().iter().any(|p| p.is_empty()) {
        return Err("Path must not be the vault root".into());
    }
    let engine = session.engine(None)?;
    engine.record(event);
    engine.flush()?;

    for (p, op) in engine.pending() {
        println!("  {op:<6} {p}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        let event = Change::Create {
            path: "notes\\a.md".into(),
            folder: false,
        }
        .into_event()
        .unwrap();
        assert_eq!(
            event,
            LocalEvent::Created {
                path: "notes/a.md".into(),
                kind: EntryKind::File,
            }
        );
    }

    #[test]
    fn parent_segments_are_rejected() {
        let change = Change::Delete {
            path: "../outside".into(),
            folder: true,
        };
        assert!(change.into_event().is_err());
    }

    #[test]
    fn track_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        std::fs::create_dir_all(&vault).unwrap();
        let session = Session {
            state: dir.path().join("state.json"),
            remote: dir.path().join("remote"),
            vault,
            config: None,
            policy: Default::default(),
        };

        run(
            &session,
            Change::Rename {
                from: "old.md".into(),
                to: "new.md".into(),
                folder: false,
            },
        )
        .unwrap();

        let saved: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&session.state).unwrap()).unwrap();
        assert_eq!(saved["operations"]["new.md"], "create");
        assert_eq!(saved["operations"]["old.md"], "delete");
    }
}
