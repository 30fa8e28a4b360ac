//! Push command implementation.

use super::Session;
use std::sync::Arc;
use vaultsync_core::{path, PendingEntry};
use vaultsync_engine::{ReviewDecision, RevertTarget, SyncError};

/// Runs the push command.
pub async fn run(
    session: &Session,
    dry_run: bool,
    revert: Vec<String>,
    revert_tree: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut targets = Vec::with_capacity(revert.len() + revert_tree.len());
    for p in revert {
        targets.push(RevertTarget::Path(path::normalize(&p)?));
    }
    for p in revert_tree {
        targets.push(RevertTarget::Subtree(path::normalize(&p)?));
    }

    let review = move |entries: &[PendingEntry]| {
        for entry in entries {
            let mark = if targets.iter().any(|t| t.covers(&entry.path)) {
                "revert"
            } else {
                "push"
            };
            println!("  {:<6} {:<6} {} ({:?})", mark, entry.op, entry.path, entry.kind);
        }
        if dry_run {
            ReviewDecision::Cancel
        } else {
            ReviewDecision::Proceed {
                revert: targets.clone(),
            }
        }
    };
    let engine = session.engine(Some(Arc::new(review)))?;

    match engine.push().await {
        Ok(report) => {
            println!(
                "Pushed: {} uploaded, {} updated, {} folder(s) created, {} deleted, {} config object(s)",
                report.uploaded,
                report.updated,
                report.folders_created,
                report.deleted_remote,
                report.config_synced
            );
            if report.reverted > 0 {
                println!("Reverted {} local change(s)", report.reverted);
            }
            if report.pull.writes() > 0 {
                println!("Pulled {} remote change(s) first", report.pull.writes());
            }
            Ok(())
        }
        Err(SyncError::Cancelled) if dry_run => {
            println!("Dry run: {} pending operation(s), nothing pushed", engine.pending().len());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
