use anyhow::{Context, Result};
use catalog_sync::SyncOrchestrator;

pub fn run(orchestrator: &SyncOrchestrator) -> Result<()> {
    if !orchestrator.status().active {
        println!("No sync is running.");
        return Ok(());
    }

    orchestrator
        .request_abort()
        .context("failed to record abort request")?;
    println!("Abort requested. The running sync will stop after its current page.");
    Ok(())
}
