use crate::item::{CatalogFilter, Credentials, PageResult, SyncMode};

/// Errors that escape a catalog client.
///
/// Transient failures are retried inside the client and surface as a
/// `PageResult` carrying an `error` marker, so only problems that retrying
/// cannot fix come back through this type.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("distributor error: {0}")]
    Remote(String),
}

/// Paginated access to a distributor's catalog.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// Human-readable label identifying the distributor.
    fn label(&self) -> &str;

    /// Fetch one page of the catalog. `page_size` is clamped to
    /// [`crate::MAX_PAGE_SIZE`] by implementations.
    async fn fetch_page(
        &self,
        credentials: &Credentials,
        mode: SyncMode,
        filter: &CatalogFilter,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult, CatalogError>;
}
