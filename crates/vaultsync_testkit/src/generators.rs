//! Property-based test generators using proptest.
//!
//! Names come from a tiny alphabet so generated events collide on the same
//! paths often enough to exercise the log transitions.

use proptest::prelude::*;
use vaultsync_core::{EntryKind, LocalEvent};

/// Strategy for a single path segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "notes", "daily"]).prop_map(str::to_string)
}

/// Strategy for vault paths one to three segments deep.
pub fn vault_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(segment_strategy(), 1..=3).prop_map(|segments| segments.join("/"))
}

/// Strategy for an entry kind.
pub fn entry_kind_strategy() -> impl Strategy<Value = EntryKind> {
    prop_oneof![Just(EntryKind::File), Just(EntryKind::Folder)]
}

/// Strategy for one local event.
pub fn local_event_strategy() -> impl Strategy<Value = LocalEvent> {
    prop_oneof![
        (vault_path_strategy(), entry_kind_strategy())
            .prop_map(|(path, kind)| LocalEvent::Created { path, kind }),
        vault_path_strategy().prop_map(|path| LocalEvent::Modified { path }),
        (vault_path_strategy(), entry_kind_strategy())
            .prop_map(|(path, kind)| LocalEvent::Deleted { path, kind }),
        (vault_path_strategy(), vault_path_strategy())
            .prop_filter("rename must move", |(from, to)| from != to)
            .prop_map(|(from, to)| LocalEvent::Renamed {
                from,
                to,
                kind: EntryKind::File,
            }),
    ]
}

/// Strategy for a sequence of local events.
pub fn event_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<LocalEvent>> {
    prop::collection::vec(local_event_strategy(), 0..max_len)
}

/// Strategy for a set of file paths with contents, at most `max` entries.
pub fn vault_files_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(
        vault_path_strategy().prop_map(|p| format!("{p}.md")),
        prop::collection::vec(any::<u8>(), 0..64),
        0..max,
    )
    .prop_map(|files| files.into_iter().collect())
}
