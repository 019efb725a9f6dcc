use anyhow::{Context, Result};
use catalog_sync::SyncOrchestrator;

use super::format;

pub fn run(orchestrator: &SyncOrchestrator) -> Result<()> {
    let status = orchestrator.status();
    if !status.active {
        println!("No lock is held.");
        return Ok(());
    }

    if !status.lock_stale {
        eprintln!(
            "warning: lock is only {} old; a sync may still be running",
            format::format_age(status.lock_age_secs)
        );
    }

    orchestrator
        .force_release_lock()
        .context("failed to release the sync lock")?;
    println!(
        "Released lock held for {}.",
        format::format_age(status.lock_age_secs)
    );
    Ok(())
}
