use std::path::Path;

use anyhow::{Context, Result};
use catalog_sync::{Order, OrderClient};
use catalog_sync_http::DistributorClient;

use crate::config::AppConfig;

pub async fn run(config: &AppConfig, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read order file: {}", file.display()))?;
    let order: Order = serde_json::from_str(&contents)
        .with_context(|| format!("invalid order file: {}", file.display()))?;

    let client = DistributorClient::new(config.distributor_config())
        .context("failed to build distributor client")?;

    println!(
        "Submitting order {} ({} units across {} lines)...",
        order.reference,
        order.total_quantity(),
        order.lines.len()
    );

    let confirmation = client.submit_order(&order).await?;

    println!(
        "Order {} accepted as {}{}",
        confirmation.reference,
        confirmation.order_id,
        confirmation
            .status
            .as_deref()
            .map(|s| format!(" ({s})"))
            .unwrap_or_default()
    );
    Ok(())
}
