use catalog_sync::clock::now_epoch_secs;
use catalog_sync::{LocalProduct, RunOutcome, RunStatus, RunSummary, SkipReason};

const MAX_TITLE_WIDTH: usize = 40;

pub fn print_summary(summary: &RunSummary) {
    println!(
        "Last run: {} {} sync from {} ({})",
        outcome_label(summary.outcome),
        summary.mode,
        summary.distributor,
        match summary.finished_at {
            Some(finished) => format!(
                "finished {} ago, took {}",
                format_age(now_epoch_secs().saturating_sub(finished)),
                format_age(finished.saturating_sub(summary.started_at))
            ),
            None => "unfinished".to_owned(),
        }
    );
    if summary.forced {
        println!("  forced over an existing lock");
    }
    println!(
        "  pages:     {} of {} processed",
        summary.pages_processed.len(),
        summary.total_pages
    );
    if !summary.failed_pages.is_empty() {
        println!("  failed:    {}", join_numbers(&summary.failed_pages));
    }
    println!(
        "  items:     {} processed ({} created, {} updated), {} expected",
        summary.processed, summary.created, summary.updated, summary.items_expected
    );
    println!("  skipped:   {}", summary.skipped);
    for (reason, count) in &summary.skip_reasons {
        println!("    {:<20} {count}", skip_label(*reason));
    }
    println!("  category updates: {}", summary.category_updates);
    if summary.swept {
        println!("  discontinued:     {} deleted", summary.deleted);
    } else {
        println!("  discontinued:     sweep skipped");
    }
    if let Some(error) = &summary.error {
        println!("  error: {error}");
    }
}

pub fn print_status(status: &RunStatus) {
    if !status.active {
        println!("No sync running.");
        return;
    }

    println!(
        "Sync running for {}{}",
        format_age(status.lock_age_secs),
        if status.lock_stale {
            " (stale, consider `catalog-sync unlock`)"
        } else {
            ""
        }
    );
    println!(
        "  phase: {}, page {} of {}, {} of {} items",
        status.phase, status.current_page, status.total_pages, status.processed, status.expected
    );
    if status.abort_requested {
        println!("  abort requested");
    }
}

pub fn print_product_table(products: &[LocalProduct]) {
    if products.is_empty() {
        return;
    }

    let sku_width = products
        .iter()
        .map(|p| p.sku.chars().count())
        .max()
        .unwrap_or(0);
    let title_width = products
        .iter()
        .map(|p| p.title.chars().count())
        .max()
        .unwrap_or(0)
        .min(MAX_TITLE_WIDTH);
    let now = now_epoch_secs();

    for product in products {
        println!(
            "  {:<sku_width$}  {:<title_width$}  {:>6}  {:>10}  {}",
            product.sku,
            truncate(&product.title, title_width),
            product.stock,
            format_cents(product.price_cents),
            format_age(now.saturating_sub(product.last_synced_at)),
        );
    }
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Running => "running",
        RunOutcome::Completed => "completed",
        RunOutcome::Aborted => "aborted",
        RunOutcome::Failed => "failed",
    }
}

fn skip_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::MissingSku => "missing sku",
        SkipReason::NotInStore => "not in store",
        SkipReason::UnmatchedCategory => "unmatched category",
        SkipReason::ItemError => "item error",
    }
}

fn join_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Coarse human duration: `42s`, `5m 3s`, `2h 10m`, `3d 4h`.
pub fn format_age(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {}s", secs / 60, secs % 60),
        3600..86_400 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
