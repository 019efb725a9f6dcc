use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use catalog_sync::{CatalogFilter, CategoryPolicy, Credentials, SyncSettings};
use catalog_sync_http::DistributorConfig;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `distributor.api_id`.
pub const API_ID_ENV: &str = "CATALOG_SYNC_API_ID";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub distributor: DistributorSection,
    pub sync: SyncSection,
    pub filter: FilterSection,
}

/// Where the distributor lives and who we are to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributorSection {
    pub label: String,
    pub api_url: String,
    pub order_url: Option<String>,
    pub api_id: String,
    pub locale: String,
    /// Prefix for `{sku}.jpg` when an item carries no image URL.
    pub image_base_url: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for DistributorSection {
    fn default() -> Self {
        Self {
            label: "distributor".into(),
            api_url: String::new(),
            order_url: None,
            api_id: String::new(),
            locale: "en_US".into(),
            image_base_url: None,
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

/// Run tuning. Defaults match [`SyncSettings::new`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSection {
    pub page_delay_ms: u64,
    pub batch_size: usize,
    pub stale_after_days: u64,
    pub sweep_limit: usize,
    pub verify_deletions: bool,
    pub lock_ttl_secs: u64,
    pub stale_lock_secs: u64,
    pub category_policy: CategoryPolicy,
    pub fallback_category: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            page_delay_ms: 1000,
            batch_size: 50,
            stale_after_days: 7,
            sweep_limit: 100,
            verify_deletions: false,
            lock_ttl_secs: 3600,
            stale_lock_secs: 600,
            category_policy: CategoryPolicy::Strict,
            fallback_category: "Uncategorized".into(),
        }
    }
}

/// Default catalog filter. SKUs and categories are mutually exclusive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterSection {
    pub skus: Vec<String>,
    pub categories: Vec<String>,
}

impl FilterSection {
    pub fn to_filter(&self) -> Result<CatalogFilter> {
        match (self.skus.is_empty(), self.categories.is_empty()) {
            (true, true) => Ok(CatalogFilter::All),
            (false, true) => Ok(CatalogFilter::Skus(self.skus.clone())),
            (true, false) => Ok(CatalogFilter::Categories(self.categories.clone())),
            (false, false) => {
                anyhow::bail!("[filter] may set either `skus` or `categories`, not both")
            }
        }
    }
}

impl AppConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.distributor.api_id, &self.distributor.locale)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::new(&self.distributor.label, self.credentials());
        settings.page_size = self.distributor.page_size;
        settings.page_delay = Duration::from_millis(self.sync.page_delay_ms);
        settings.batch_size = self.sync.batch_size;
        settings.stale_after =
            Duration::from_secs(self.sync.stale_after_days.saturating_mul(86_400));
        settings.sweep_limit = self.sync.sweep_limit;
        settings.verify_deletions = self.sync.verify_deletions;
        settings.lock_ttl = Duration::from_secs(self.sync.lock_ttl_secs);
        settings.stale_lock_after = Duration::from_secs(self.sync.stale_lock_secs);
        settings.category_policy = self.sync.category_policy;
        settings.fallback_category = self.sync.fallback_category.clone();
        settings
    }

    pub fn distributor_config(&self) -> DistributorConfig {
        let mut config = DistributorConfig::new(
            &self.distributor.label,
            &self.distributor.api_url,
            self.credentials(),
        );
        config.order_url = self.distributor.order_url.clone();
        config.image_base_url = self.distributor.image_base_url.clone();
        config.timeout = Duration::from_secs(self.distributor.timeout_secs);
        config
    }

    /// Replace `api_id` with a non-empty override.
    pub fn with_api_id_override(mut self, api_id: Option<String>) -> Self {
        if let Some(api_id) = api_id
            && !api_id.trim().is_empty()
        {
            self.distributor.api_id = api_id;
        }
        self
    }
}

/// Config file path: `~/.config/catalog-sync/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("catalog-sync").join("config.toml"))
}

/// Load config from `path` (or the default location), falling back to
/// defaults if the file is missing or unparseable.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let path = path.map(Path::to_path_buf).or_else(config_path);
    let config = path.and_then(|path| read_config(&path)).unwrap_or_default();
    config.with_api_id_override(std::env::var(API_ID_ENV).ok())
}

fn read_config(path: &Path) -> Option<AppConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config, using defaults"
            );
            None
        }
    }
}
