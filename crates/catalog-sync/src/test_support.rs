use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::{CatalogClient, CatalogError};
use crate::clock::now_epoch_secs;
use crate::item::{CatalogFilter, CatalogItem, Credentials, PageResult, StockStatus, SyncMode};
use crate::store::{
    CategoryRef, CategoryTerm, LocalProduct, NewProduct, ProductId, ProductStore, ProductUpdate,
    StaleProduct, StoreError, TaxonomyStore,
};

/// Catalog item with a description, some stock, and a price.
pub fn catalog_item(sku: &str, category: &str) -> CatalogItem {
    CatalogItem {
        description: format!("{sku} item"),
        stock: 5,
        price_cents: 1999,
        category: category.to_owned(),
        ..CatalogItem::new(sku)
    }
}

/// Number pages in order and fill in totals and per-page category lists.
pub fn catalog_pages(pages: Vec<Vec<CatalogItem>>) -> Vec<PageResult> {
    let total_pages = pages.len() as u32;
    let total_items = pages.iter().map(Vec::len).sum::<usize>() as u32;
    pages
        .into_iter()
        .enumerate()
        .map(|(index, items)| {
            let mut categories: Vec<String> = Vec::new();
            for item in &items {
                if !item.category.is_empty() && !categories.contains(&item.category) {
                    categories.push(item.category.clone());
                }
            }
            PageResult {
                items,
                categories,
                page_number: index as u32 + 1,
                total_pages,
                total_items,
                error: None,
            }
        })
        .collect()
}

#[derive(Default)]
struct ProductState {
    by_sku: BTreeMap<String, LocalProduct>,
    next_id: i64,
    fail_writes: HashSet<String>,
    image_writes: usize,
    commits: usize,
}

/// In-memory product store that counts writes and can be told to fail.
#[derive(Default)]
pub struct InMemoryProductStore {
    state: Mutex<ProductState>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sku: &str) -> Option<LocalProduct> {
        self.state.lock().unwrap().by_sku.get(sku).cloned()
    }

    pub fn all(&self) -> Vec<LocalProduct> {
        self.state.lock().unwrap().by_sku.values().cloned().collect()
    }

    /// Seed a product owned by the "acme" source.
    pub fn insert_sku(&self, sku: &str, title: &str) -> ProductId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = ProductId(state.next_id);
        state
            .by_sku
            .insert(sku.to_owned(), blank_product(id, sku, title, "acme", now_epoch_secs()));
        id
    }

    pub fn set_last_synced_at(&self, sku: &str, at: u64) {
        if let Some(product) = self.state.lock().unwrap().by_sku.get_mut(sku) {
            product.last_synced_at = at;
        }
    }

    /// Make every write touching `sku` fail.
    pub fn fail_writes_for(&self, sku: &str) {
        self.state.lock().unwrap().fail_writes.insert(sku.to_owned());
    }

    pub fn image_writes(&self) -> usize {
        self.state.lock().unwrap().image_writes
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    fn with_product<T>(
        &self,
        id: ProductId,
        apply: impl FnOnce(&mut LocalProduct) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().unwrap();
        let ProductState {
            by_sku, fail_writes, ..
        } = &mut *state;
        let product = by_sku
            .values_mut()
            .find(|product| product.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        if fail_writes.contains(&product.sku) {
            return Err(StoreError::Database(format!("write refused for {}", product.sku)));
        }
        Ok(apply(product))
    }
}

fn blank_product(id: ProductId, sku: &str, title: &str, source: &str, at: u64) -> LocalProduct {
    LocalProduct {
        id,
        sku: sku.to_owned(),
        title: title.to_owned(),
        description: String::new(),
        stock: 0,
        stock_status: StockStatus::OutOfStock,
        price_cents: 0,
        retail_price_cents: None,
        dimensions: None,
        categories: Vec::new(),
        image: None,
        source: source.to_owned(),
        last_synced_at: at,
    }
}

#[async_trait::async_trait]
impl ProductStore for InMemoryProductStore {
    async fn find_by_sku(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError> {
        Ok(self.get(sku))
    }

    async fn create(&self, product: &NewProduct) -> Result<ProductId, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes.contains(&product.sku) {
            return Err(StoreError::Database(format!("write refused for {}", product.sku)));
        }
        if state.by_sku.contains_key(&product.sku) {
            return Err(StoreError::Conflict(format!("sku {} exists", product.sku)));
        }
        state.next_id += 1;
        let id = ProductId(state.next_id);
        let mut created = blank_product(
            id,
            &product.sku,
            &product.title,
            &product.source,
            product.synced_at,
        );
        created.description = product.description.clone();
        state.by_sku.insert(product.sku.clone(), created);
        Ok(id)
    }

    async fn update(&self, id: ProductId, update: &ProductUpdate) -> Result<(), StoreError> {
        self.with_product(id, |product| {
            product.last_synced_at = update.synced_at;
            if let Some(stock) = update.stock {
                product.stock = stock;
            }
            if let Some(status) = update.stock_status {
                product.stock_status = status;
            }
            if let Some(price) = update.price_cents {
                product.price_cents = price;
            }
            if let Some(retail) = update.retail_price_cents {
                product.retail_price_cents = Some(retail);
            }
            if let Some(title) = &update.title {
                product.title = title.clone();
            }
            if let Some(description) = &update.description {
                product.description = description.clone();
            }
            if let Some(dimensions) = update.dimensions {
                product.dimensions = Some(dimensions);
            }
        })
    }

    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.by_sku.len();
        state.by_sku.retain(|_, product| product.id != id);
        if state.by_sku.len() == before {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn set_categories(
        &self,
        id: ProductId,
        categories: &[CategoryRef],
    ) -> Result<(), StoreError> {
        self.with_product(id, |product| product.categories = categories.to_vec())
    }

    async fn set_image(&self, id: ProductId, image: &str) -> Result<(), StoreError> {
        self.with_product(id, |product| product.image = Some(image.to_owned()))?;
        self.state.lock().unwrap().image_writes += 1;
        Ok(())
    }

    async fn list_stale(&self, source: &str, cutoff: u64) -> Result<Vec<StaleProduct>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut stale: Vec<StaleProduct> = state
            .by_sku
            .values()
            .filter(|product| product.source == source && product.last_synced_at < cutoff)
            .map(|product| StaleProduct {
                id: product.id,
                sku: product.sku.clone(),
                last_synced_at: product.last_synced_at,
            })
            .collect();
        stale.sort_by_key(|product| product.last_synced_at);
        Ok(stale)
    }

    async fn commit_batch(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }
}

/// In-memory taxonomy that keeps categories in creation order.
#[derive(Default)]
pub struct InMemoryTaxonomyStore {
    terms: Mutex<Vec<CategoryTerm>>,
}

impl InMemoryTaxonomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(names: &[&str]) -> Self {
        let terms = names
            .iter()
            .enumerate()
            .map(|(index, name)| CategoryTerm {
                id: CategoryRef(index as i64 + 1),
                name: (*name).to_owned(),
            })
            .collect();
        Self {
            terms: Mutex::new(terms),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.terms
            .lock()
            .unwrap()
            .iter()
            .map(|term| term.name.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl TaxonomyStore for InMemoryTaxonomyStore {
    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryTerm>, StoreError> {
        Ok(self
            .terms
            .lock()
            .unwrap()
            .iter()
            .find(|term| term.name == name)
            .cloned())
    }

    async fn create_category(&self, name: &str) -> Result<CategoryTerm, StoreError> {
        let mut terms = self.terms.lock().unwrap();
        if terms.iter().any(|term| term.name == name) {
            return Err(StoreError::Conflict(format!("category {name} exists")));
        }
        let term = CategoryTerm {
            id: CategoryRef(terms.len() as i64 + 1),
            name: name.to_owned(),
        };
        terms.push(term.clone());
        Ok(term)
    }

    async fn list_categories(&self) -> Result<Vec<CategoryTerm>, StoreError> {
        Ok(self.terms.lock().unwrap().clone())
    }
}

type FetchHook = Box<dyn Fn(u32) + Send + Sync>;

/// Catalog client that replays scripted pages.
///
/// Requests filtered by SKU are answered from the lookup set instead, which
/// is what the discontinuation re-check uses.
pub struct ScriptedCatalogClient {
    pages: Vec<PageResult>,
    lookup: Vec<CatalogItem>,
    lookup_result: Option<PageResult>,
    failing: HashSet<u32>,
    latency: Duration,
    hook: Mutex<Option<FetchHook>>,
    fetched: Mutex<Vec<u32>>,
}

impl ScriptedCatalogClient {
    pub fn new(pages: Vec<PageResult>) -> Self {
        Self {
            pages,
            lookup: Vec::new(),
            lookup_result: None,
            failing: HashSet::new(),
            latency: Duration::ZERO,
            hook: Mutex::new(None),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_lookup(mut self, items: Vec<CatalogItem>) -> Self {
        self.lookup = items;
        self
    }

    pub fn with_lookup_result(mut self, result: PageResult) -> Self {
        self.lookup_result = Some(result);
        self
    }

    /// Answer `page` as if retries were exhausted.
    pub fn with_failing_page(mut self, page: u32) -> Self {
        self.failing.insert(page);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Run `hook` with the page number before each catalog page is answered.
    pub fn set_hook(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Catalog pages requested so far, in request order.
    pub fn fetched(&self) -> Vec<u32> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CatalogClient for ScriptedCatalogClient {
    fn label(&self) -> &str {
        "acme"
    }

    async fn fetch_page(
        &self,
        _credentials: &Credentials,
        _mode: SyncMode,
        filter: &CatalogFilter,
        page: u32,
        _page_size: u32,
    ) -> Result<PageResult, CatalogError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let CatalogFilter::Skus(skus) = filter {
            if let Some(result) = &self.lookup_result {
                return Ok(result.clone());
            }
            let items: Vec<CatalogItem> = self
                .lookup
                .iter()
                .filter(|item| skus.contains(&item.sku))
                .cloned()
                .collect();
            return Ok(PageResult::new(items));
        }

        self.fetched.lock().unwrap().push(page);
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(page);
        }

        if self.failing.contains(&page) {
            return Ok(PageResult::failed(page, "retries exhausted"));
        }
        self.pages
            .get(page.saturating_sub(1) as usize)
            .cloned()
            .ok_or_else(|| CatalogError::Remote(format!("no page {page}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_pages_fill_totals() {
        let pages = catalog_pages(vec![
            vec![catalog_item("A", "Tools"), catalog_item("B", "Garden")],
            vec![catalog_item("C", "Tools")],
        ]);

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].page_number, 2);
        assert!(pages.iter().all(|p| p.total_pages == 2 && p.total_items == 3));
        assert_eq!(pages[0].categories, vec!["Tools", "Garden"]);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = InMemoryProductStore::new();
        let product = NewProduct {
            sku: "A".into(),
            title: "A".into(),
            description: String::new(),
            source: "acme".into(),
            synced_at: 0,
        };
        store.create(&product).await.unwrap();
        assert!(matches!(
            store.create(&product).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn scripted_client_answers_lookups_separately() {
        let client = ScriptedCatalogClient::new(vec![])
            .with_lookup(vec![catalog_item("A", "Tools"), catalog_item("B", "Tools")]);
        let result = client
            .fetch_page(
                &Credentials::new("id", "en"),
                SyncMode::Partial,
                &CatalogFilter::Skus(vec!["B".into()]),
                1,
                10,
            )
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert!(client.fetched().is_empty());
    }
}
