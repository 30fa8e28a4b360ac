//! Pull command implementation.

use super::Session;

/// Runs the pull command.
pub async fn run(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let engine = session.engine(None)?;
    let report = engine.pull(false).await?;

    if report.up_to_date {
        println!("Already up to date");
        return Ok(());
    }
    println!(
        "Pulled {} change(s): {} downloaded, {} folder(s) created, {} deleted locally",
        report.fetched + report.removed,
        report.downloaded,
        report.folders_created,
        report.deleted_local
    );
    if report.kept_local + report.flipped > 0 {
        println!(
            "Kept {} local change(s) over remote ones",
            report.kept_local + report.flipped
        );
    }
    for failure in &report.failures {
        eprintln!("  failed: {failure}");
    }
    Ok(())
}
