//! Hierarchy-aware batch scheduling.
//!
//! Folder operations are grouped by depth so that a folder is created
//! before anything inside it and deleted after everything inside it. Each
//! group runs with bounded concurrency and settles completely before the
//! next one starts.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use vaultsync_core::path;

/// Direction of a depth-ordered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    /// Shallow first: parents before children.
    Create,
    /// Deep first: children before parents.
    Delete,
}

/// Groups paths into depth batches.
///
/// Batch order follows `order`; paths inside a batch are sorted and
/// deduplicated.
pub fn depth_batches<I, S>(paths: I, order: BatchOrder) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut by_depth: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for p in paths {
        let p = p.into();
        by_depth.entry(path::depth(&p)).or_default().insert(p);
    }
    let batches = by_depth.into_values().map(|set| set.into_iter().collect());
    match order {
        BatchOrder::Create => batches.collect(),
        BatchOrder::Delete => batches.rev().collect(),
    }
}

/// Reduces a delete set to its top-most members.
///
/// A path whose ancestor is also in the set is covered by that ancestor's
/// delete and dropped.
pub fn plan_minimal_deletes<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let set: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
    set.iter()
        .filter(|p| !path::ancestors(p).any(|a| set.contains(a)))
        .cloned()
        .collect()
}

/// Runs `op` over `items` with at most `limit` calls in flight.
///
/// Every item runs to completion; results come back in completion order.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Vec<(T, R)>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .map(|item| {
            let fut = op(item.clone());
            async move { (item, fut.await) }
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

/// Outcome of a batched run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<E> {
    /// Items that succeeded.
    pub completed: usize,
    /// Items that failed, from the batch that stopped the run.
    pub failed: Vec<(String, E)>,
    /// Batches never started because an earlier one failed.
    pub skipped: usize,
}

impl<E> BatchOutcome<E> {
    /// Returns true if every item succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs depth batches in order with a barrier between them.
///
/// A batch containing a failure lets its siblings finish, then stops the
/// run; later batches depend on it and are not started.
pub async fn run_batches<T, E, F, Fut>(
    batches: Vec<Vec<String>>,
    limit: usize,
    op: F,
) -> BatchOutcome<E>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut outcome = BatchOutcome {
        completed: 0,
        failed: Vec::new(),
        skipped: 0,
    };
    let total = batches.len();
    for (index, batch) in batches.into_iter().enumerate() {
        for (p, result) in run_bounded(batch, limit, &op).await {
            match result {
                Ok(_) => outcome.completed += 1,
                Err(e) => outcome.failed.push((p, e)),
            }
        }
        if !outcome.failed.is_empty() {
            outcome.skipped = total - index - 1;
            break;
        }
    }
    outcome
}
