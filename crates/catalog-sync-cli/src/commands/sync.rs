use anyhow::Result;
use catalog_sync::{Feedback, SyncOrchestrator, SyncOutcome, SyncRequest};

use super::format;

/// Print feedback items to stderr.
pub fn print_feedback(feedback: &[Feedback]) {
    for item in feedback {
        eprintln!("{item}");
    }
}

/// Run one sync. Ctrl-C asks the run to stop at the next page boundary.
pub async fn run(orchestrator: &SyncOrchestrator, request: SyncRequest) -> Result<()> {
    println!(
        "Running {} sync from {}...",
        request.mode,
        orchestrator.settings().distributor
    );

    let handle = orchestrator.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current page");
            if let Err(e) = handle.request_abort() {
                tracing::error!(error = %e, "failed to record abort request");
            }
        }
    });

    let outcome = orchestrator.run(request).await;
    interrupt.abort();

    match outcome {
        SyncOutcome::Completed(summary) => {
            print_feedback(&summary.feedback);
            format::print_summary(&summary);
            Ok(())
        }
        SyncOutcome::Aborted(summary) => {
            print_feedback(&summary.feedback);
            format::print_summary(&summary);
            anyhow::bail!("sync aborted before the last page")
        }
        SyncOutcome::Failed(summary) => {
            print_feedback(&summary.feedback);
            format::print_summary(&summary);
            anyhow::bail!(
                "sync failed: {}",
                summary.error.as_deref().unwrap_or("unknown error")
            )
        }
        SyncOutcome::AlreadyRunning(status) => {
            format::print_status(&status);
            anyhow::bail!(
                "another sync is running; pass --force or run `catalog-sync unlock` if it is stuck"
            )
        }
    }
}
