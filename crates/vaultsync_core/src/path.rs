//! Vault path helpers.
//!
//! Vault paths are `/`-separated, relative to the vault root, with no leading
//! or trailing separator. The empty string denotes the root itself.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Whether a path refers to a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file with content.
    File,
    /// A folder that may contain other entries.
    Folder,
}

impl EntryKind {
    /// Returns true for folders.
    pub fn is_folder(&self) -> bool {
        matches!(self, EntryKind::Folder)
    }

    /// Returns true for files.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }
}

/// Normalizes a user-supplied path into vault form.
///
/// Backslashes become separators, empty and `.` segments are dropped.
/// `..` segments are rejected.
pub fn normalize(path: &str) -> CoreResult<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(CoreError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Number of segments in a path. The root has depth 0.
pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('/').count()
    }
}

/// Parent of a path, or `None` for top-level entries and the root.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Final segment of a path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a directory and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Proper ancestors of a path, nearest first.
///
/// `"a/b/c"` yields `"a/b"` then `"a"`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = path;
    std::iter::from_fn(move || {
        let next = parent(current)?;
        current = next;
        Some(next)
    })
}

/// Returns true if `path` equals `dir` or lies underneath it.
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Returns true if `path` lies strictly underneath `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    path != dir && is_within(path, dir)
}

/// Returns true if any segment is dot-prefixed.
pub fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}
