use anyhow::{Context, Result};
use catalog_sync::SyncOrchestrator;

use super::format;

pub fn run(orchestrator: &SyncOrchestrator, json: bool) -> Result<()> {
    let status = orchestrator.status();
    let last_run = orchestrator
        .last_run()
        .context("failed to read the last run summary")?;

    if json {
        let value = serde_json::json!({
            "status": status,
            "last_run": last_run,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    format::print_status(&status);
    println!();
    match last_run {
        Some(summary) => format::print_summary(&summary),
        None => println!("No runs recorded yet."),
    }

    Ok(())
}
