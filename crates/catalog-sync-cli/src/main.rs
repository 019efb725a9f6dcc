mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_sync::{CatalogFilter, SyncContext, SyncMode, SyncOrchestrator, SyncRequest};
use catalog_sync_http::DistributorClient;
use catalog_sync_store::CatalogStore;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(about = "Mirror a distributor's product catalog into a local store")]
struct Cli {
    /// Path to the SQLite database (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the remote catalog into the local store
    Sync {
        /// Only refresh stock and price on products already stored
        #[arg(long)]
        partial: bool,
        /// Take the lock even if another run holds it
        #[arg(long)]
        force: bool,
        /// Restrict the run to these SKUs (comma separated)
        #[arg(long, value_delimiter = ',', conflicts_with = "category")]
        sku: Vec<String>,
        /// Restrict the run to these categories (comma separated)
        #[arg(long, value_delimiter = ',')]
        category: Vec<String>,
    },
    /// Show the running sync, if any, and the last recorded run
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask a running sync to stop at its next page boundary
    Abort,
    /// Clear a stuck sync lock
    Unlock,
    /// Submit a drop-ship order read from a JSON file
    Order {
        /// Order file
        file: PathBuf,
    },
    /// List products in the local store
    Products {
        /// Maximum rows to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("could not determine data directory")?;
    let dir = base.join("catalog-sync");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory: {}", dir.display()))?;
    Ok(dir)
}

fn db_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(data_dir()?.join("catalog.db")),
    }
}

fn open_store(explicit: Option<PathBuf>) -> Result<Arc<CatalogStore>> {
    let path = db_path(explicit)?;
    let store = CatalogStore::open(&path)
        .with_context(|| format!("failed to open database: {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(config: &AppConfig, store: Arc<CatalogStore>) -> Result<SyncOrchestrator> {
    let client = DistributorClient::new(config.distributor_config())
        .context("failed to build distributor client")?;
    Ok(SyncOrchestrator::new(SyncContext {
        client: Arc::new(client),
        products: store.clone(),
        taxonomy: store.clone(),
        kv: store,
        settings: config.sync_settings(),
    }))
}

/// Command-line filters win over the `[filter]` section.
fn resolve_filter(
    config: &AppConfig,
    sku: Vec<String>,
    category: Vec<String>,
) -> Result<CatalogFilter> {
    if !sku.is_empty() {
        return Ok(CatalogFilter::Skus(sku));
    }
    if !category.is_empty() {
        return Ok(CatalogFilter::Categories(category));
    }
    config.filter.to_filter()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref());

    match cli.command {
        Command::Sync {
            partial,
            force,
            sku,
            category,
        } => {
            if config.distributor.api_url.trim().is_empty() {
                anyhow::bail!("distributor api_url is not configured");
            }
            let request = SyncRequest {
                mode: if partial { SyncMode::Partial } else { SyncMode::Full },
                filter: resolve_filter(&config, sku, category)?,
                force,
            };
            let orchestrator = build_orchestrator(&config, open_store(cli.db)?)?;
            commands::sync::run(&orchestrator, request).await
        }
        Command::Status { json } => {
            let orchestrator = build_orchestrator(&config, open_store(cli.db)?)?;
            commands::status::run(&orchestrator, json)
        }
        Command::Abort => {
            let orchestrator = build_orchestrator(&config, open_store(cli.db)?)?;
            commands::abort::run(&orchestrator)
        }
        Command::Unlock => {
            let orchestrator = build_orchestrator(&config, open_store(cli.db)?)?;
            commands::unlock::run(&orchestrator)
        }
        Command::Order { file } => commands::order::run(&config, &file).await,
        Command::Products { limit } => {
            let store = open_store(cli.db)?;
            commands::products::run(&store, limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn sku_flag_splits_on_commas() {
        let cli = Cli::parse_from(["catalog-sync", "sync", "--sku", "A-1,A-2", "--partial"]);
        match cli.command {
            Command::Sync { sku, partial, .. } => {
                assert_eq!(sku, vec!["A-1", "A-2"]);
                assert!(partial);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn sku_and_category_conflict() {
        let result = Cli::try_parse_from([
            "catalog-sync",
            "sync",
            "--sku",
            "A-1",
            "--category",
            "Tools",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_override_config_filter() {
        let mut config = AppConfig::default();
        config.filter.categories = vec!["Garden".into()];

        let filter = resolve_filter(&config, vec!["A-1".into()], Vec::new()).unwrap();
        assert_eq!(filter, CatalogFilter::Skus(vec!["A-1".into()]));

        let filter = resolve_filter(&config, Vec::new(), Vec::new()).unwrap();
        assert_eq!(filter, CatalogFilter::Categories(vec!["Garden".into()]));
    }
}
