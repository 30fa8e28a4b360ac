//! Bidirectional remote id / local path index.

use std::collections::{BTreeMap, HashMap};

/// Maps remote object ids to vault paths, with a derived inverse.
///
/// The forward map (`id → path`) is the persisted source of truth. The inverse
/// is kept in step by every mutating method and can be recomputed with
/// [`RemoteIdIndex::rebuild_inverse`] after bulk edits.
///
/// # Invariants
///
/// - Ids are stable for the lifetime of a remote object
/// - A path maps to at most one live id
#[derive(Debug, Clone, Default)]
pub struct RemoteIdIndex {
    by_id: BTreeMap<String, String>,
    by_path: HashMap<String, String>,
}

impl RemoteIdIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index from the persisted forward map.
    ///
    /// If two ids claim the same path, the one sorting last wins the inverse.
    pub fn from_map(by_id: BTreeMap<String, String>) -> Self {
        let mut index = Self {
            by_id,
            by_path: HashMap::new(),
        };
        index.rebuild_inverse();
        index
    }

    /// Recomputes the path → id map from the forward map.
    pub fn rebuild_inverse(&mut self) {
        self.by_path = self
            .by_id
            .iter()
            .map(|(id, path)| (path.clone(), id.clone()))
            .collect();
    }

    /// Associates `id` with `path`.
    ///
    /// A previous id at the same path, and a previous path for the same id,
    /// are both dropped.
    pub fn record(&mut self, id: impl Into<String>, path: impl Into<String>) {
        let id = id.into();
        let path = path.into();

        if let Some(old_id) = self.by_path.get(&path) {
            if *old_id != id {
                let old_id = old_id.clone();
                self.by_id.remove(&old_id);
            }
        }
        if let Some(old_path) = self.by_id.insert(id.clone(), path.clone()) {
            if old_path != path && self.by_path.get(&old_path) == Some(&id) {
                self.by_path.remove(&old_path);
            }
        }
        self.by_path.insert(path, id);
    }

    /// Path for a remote id.
    pub fn path_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    /// Remote id for a path.
    pub fn id_of(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Removes an id, returning the path it mapped to.
    pub fn remove_id(&mut self, id: &str) -> Option<String> {
        let path = self.by_id.remove(id)?;
        if self.by_path.get(&path).map(String::as_str) == Some(id) {
            self.by_path.remove(&path);
        }
        Some(path)
    }

    /// Removes the id mapped to a path, returning it.
    pub fn remove_path(&mut self, path: &str) -> Option<String> {
        let id = self.by_path.remove(path)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Removes every entry at or below `dir`, returning `(id, path)` pairs.
    pub fn remove_within(&mut self, dir: &str) -> Vec<(String, String)> {
        let doomed: Vec<(String, String)> = self
            .by_id
            .iter()
            .filter(|(_, path)| crate::path::is_within(path, dir))
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect();
        for (id, _) in &doomed {
            self.remove_id(id);
        }
        doomed
    }

    /// Iterates over `(id, path)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_id.iter().map(|(id, p)| (id.as_str(), p.as_str()))
    }

    /// Borrow of the forward map, for persistence.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.by_id
    }

    /// Returns the number of indexed ids.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_lookup() {
        let mut index = RemoteIdIndex::new();
        index.record("id-1", "notes/a.md");

        assert_eq!(index.path_of("id-1"), Some("notes/a.md"));
        assert_eq!(index.id_of("notes/a.md"), Some("id-1"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn one_live_id_per_path() {
        let mut index = RemoteIdIndex::new();
        index.record("old", "a.md");
        index.record("new", "a.md");

        assert_eq!(index.id_of("a.md"), Some("new"));
        assert_eq!(index.path_of("old"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn moving_an_id_frees_old_path() {
        let mut index = RemoteIdIndex::new();
        index.record("id", "a.md");
        index.record("id", "b.md");

        assert_eq!(index.id_of("a.md"), None);
        assert_eq!(index.id_of("b.md"), Some("id"));
    }

    #[test]
    fn remove_by_id_and_path() {
        let mut index = RemoteIdIndex::new();
        index.record("1", "a");
        index.record("2", "b");

        assert_eq!(index.remove_id("1"), Some("a".to_string()));
        assert_eq!(index.id_of("a"), None);
        assert_eq!(index.remove_path("b"), Some("2".to_string()));
        assert!(index.is_empty());
        assert_eq!(index.remove_id("missing"), None);
    }

    #[test]
    fn remove_subtree() {
        let mut index = RemoteIdIndex::new();
        index.record("1", "dir");
        index.record("2", "dir/x.md");
        index.record("3", "dirt.md");

        let removed = index.remove_within("dir");
        assert_eq!(removed.len(), 2);
        assert_eq!(index.id_of("dirt.md"), Some("3"));
    }

    #[test]
    fn from_map_rebuilds_inverse() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), "one.md".to_string());
        map.insert("y".to_string(), "two.md".to_string());

        let index = RemoteIdIndex::from_map(map);
        assert_eq!(index.id_of("two.md"), Some("y"));
    }
}
