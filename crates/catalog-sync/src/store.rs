use serde::{Deserialize, Serialize};

use crate::item::{Dimensions, StockStatus};

/// Opaque identifier assigned by the product store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub i64);

/// Opaque identifier assigned by the taxonomy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryRef(pub i64);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A product as held by the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalProduct {
    pub id: ProductId,
    pub sku: String,
    pub title: String,
    pub description: String,
    pub stock: u32,
    pub stock_status: StockStatus,
    pub price_cents: u64,
    pub retail_price_cents: Option<u64>,
    pub dimensions: Option<Dimensions>,
    pub categories: Vec<CategoryRef>,
    pub image: Option<String>,
    /// Distributor label that created the product.
    pub source: String,
    pub last_synced_at: u64,
}

/// Fields needed to insert a product the first time its SKU is seen.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub sku: String,
    pub title: String,
    pub description: String,
    pub source: String,
    pub synced_at: u64,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    pub synced_at: u64,
    pub stock: Option<u32>,
    pub stock_status: Option<StockStatus>,
    pub price_cents: Option<u64>,
    pub retail_price_cents: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub dimensions: Option<Dimensions>,
}

/// A product whose last sync is older than some cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleProduct {
    pub id: ProductId,
    pub sku: String,
    pub last_synced_at: u64,
}

/// A taxonomy term products can be filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTerm {
    pub id: CategoryRef,
    pub name: String,
}

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write (e.g. duplicate SKU).
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Externally owned product catalog the sync engine writes into.
///
/// Writes are grouped per sub-batch through `begin_batch`/`commit_batch`.
/// Each sub-batch commits on its own: a failure in one does not roll back
/// the ones before it.
#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    /// Look up a product by SKU. May be served from an index or cache.
    async fn find_by_sku(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError>;

    /// Look up a product by SKU, bypassing any cache layer.
    async fn find_by_sku_direct(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError> {
        self.find_by_sku(sku).await
    }

    /// Insert a new product. Returns `StoreError::Conflict` if the SKU exists.
    async fn create(&self, product: &NewProduct) -> Result<ProductId, StoreError>;

    async fn update(&self, id: ProductId, update: &ProductUpdate) -> Result<(), StoreError>;

    /// Permanently remove a product.
    async fn delete(&self, id: ProductId) -> Result<(), StoreError>;

    async fn set_categories(
        &self,
        id: ProductId,
        categories: &[CategoryRef],
    ) -> Result<(), StoreError>;

    async fn set_image(&self, id: ProductId, image: &str) -> Result<(), StoreError>;

    /// Products from `source` whose last sync happened before `cutoff`
    /// (epoch seconds), oldest first.
    async fn list_stale(&self, source: &str, cutoff: u64) -> Result<Vec<StaleProduct>, StoreError>;

    async fn begin_batch(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Commit the current sub-batch and release any per-batch caches.
    async fn commit_batch(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Externally owned category taxonomy.
#[async_trait::async_trait]
pub trait TaxonomyStore: Send + Sync {
    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryTerm>, StoreError>;

    async fn create_category(&self, name: &str) -> Result<CategoryTerm, StoreError>;

    /// All categories in creation order.
    async fn list_categories(&self) -> Result<Vec<CategoryTerm>, StoreError>;

    async fn list_category_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_categories()
            .await?
            .into_iter()
            .map(|term| term.name)
            .collect())
    }
}
