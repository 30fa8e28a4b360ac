//! Status command implementation.

use super::Session;
use serde::Serialize;
use vaultsync_core::{JsonFileSettings, SettingsStore};

/// Sync status of a vault.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Vault path.
    pub vault: String,
    /// Pending operations as `(path, op)`.
    pub pending: Vec<(String, String)>,
    /// Number of indexed remote objects.
    pub indexed: usize,
    /// Checkpoint time (ms since epoch), 0 if never synced.
    pub last_synced_at: u64,
    /// Change-feed token of the checkpoint.
    pub changes_token: String,
}

/// Runs the status command.
///
/// Reads the settings file only; the remote is not contacted.
pub fn run(session: &Session, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let settings = JsonFileSettings::new(&session.state).load()?;
    let report = StatusReport {
        vault: session.vault.display().to_string(),
        pending: settings
            .operations
            .iter()
            .map(|(p, op)| (p.clone(), op.to_string()))
            .collect(),
        indexed: settings.drive_id_to_path.len(),
        last_synced_at: settings.last_synced_at,
        changes_token: settings.changes_token,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_text(&report),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("Vault:        {}", report.vault);
    println!("Indexed:      {} remote object(s)", report.indexed);
    if report.last_synced_at == 0 {
        println!("Last synced:  never");
    } else {
        println!("Last synced:  {} ms since epoch", report.last_synced_at);
        println!("Change token: {}", report.changes_token);
    }
    if report.pending.is_empty() {
        println!("Nothing pending");
        return;
    }
    println!("Pending:");
    for (p, op) in &report.pending {
        println!("  {op:<6} {p}");
    }
}
