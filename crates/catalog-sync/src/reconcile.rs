use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::category::CategoryResolver;
use crate::clock::now_epoch_secs;
use crate::feedback::Feedback;
use crate::item::{CatalogItem, SyncMode};
use crate::store::{CategoryRef, LocalProduct, NewProduct, ProductStore, ProductUpdate, StoreError};

/// Items per store transaction.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Why an item was not created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingSku,
    /// Partial sync saw a SKU with no local product.
    NotInStore,
    /// Strict category policy refused to create an uncategorizable product.
    UnmatchedCategory,
    /// The store rejected a read or write for this item.
    ItemError,
}

/// Counters for one call to [`ProductReconciler::reconcile_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Items created or updated.
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub category_updates: u64,
    pub skipped: u64,
    pub skip_reasons: BTreeMap<SkipReason, u64>,
    pub feedback: Vec<Feedback>,
}

impl BatchReport {
    fn skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_default() += 1;
    }
}

enum ItemOutcome {
    Created { category_updated: bool },
    Updated { category_updated: bool },
    Skipped(SkipReason),
}

/// Creates and updates local products from catalog items, remembering every
/// SKU seen during the run.
///
/// Writes are committed per sub-batch of `batch_size` items. A sub-batch
/// that fails to commit does not undo earlier ones.
pub struct ProductReconciler {
    products: Arc<dyn ProductStore>,
    categories: CategoryResolver,
    source: String,
    batch_size: usize,
    seen: HashSet<String>,
}

impl ProductReconciler {
    pub fn new(
        products: Arc<dyn ProductStore>,
        categories: CategoryResolver,
        source: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            products,
            categories,
            source: source.into(),
            batch_size: batch_size.max(1),
            seen: HashSet::new(),
        }
    }

    pub fn categories(&self) -> &CategoryResolver {
        &self.categories
    }

    pub fn categories_mut(&mut self) -> &mut CategoryResolver {
        &mut self.categories
    }

    /// SKUs seen so far this run, whether or not their write succeeded.
    pub fn confirmed_active(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn into_confirmed_active(self) -> HashSet<String> {
        self.seen
    }

    /// Reconcile one page of items in order. Per-item failures are logged and
    /// counted; they never abort the batch.
    pub async fn reconcile_batch(&mut self, items: &[CatalogItem], mode: SyncMode) -> BatchReport {
        let mut report = BatchReport::default();
        let now = now_epoch_secs();

        for chunk in items.chunks(self.batch_size) {
            if let Err(e) = self.products.begin_batch().await {
                tracing::warn!(error = %e, "could not open store batch; writing unbatched");
            }

            for item in chunk {
                match self.reconcile_item(item, mode, now, &mut report).await {
                    Ok(ItemOutcome::Created { category_updated }) => {
                        report.processed += 1;
                        report.created += 1;
                        report.category_updates += u64::from(category_updated);
                    }
                    Ok(ItemOutcome::Updated { category_updated }) => {
                        report.processed += 1;
                        report.updated += 1;
                        report.category_updates += u64::from(category_updated);
                    }
                    Ok(ItemOutcome::Skipped(reason)) => {
                        tracing::debug!(sku = %item.sku, ?reason, "item skipped");
                        report.skip(reason);
                    }
                    Err(e) => {
                        tracing::warn!(sku = %item.sku, error = %e, "failed to reconcile item");
                        report
                            .feedback
                            .push(Feedback::warning(format!("{}: {e}", item.sku)));
                        report.skip(SkipReason::ItemError);
                    }
                }
            }

            if let Err(e) = self.products.commit_batch().await {
                tracing::error!(error = %e, items = chunk.len(), "store batch failed to commit");
                report
                    .feedback
                    .push(Feedback::error(format!("batch commit failed: {e}")));
            }

            // Let other tasks run between sub-batches on small hosts.
            tokio::task::yield_now().await;
        }

        report
    }

    async fn lookup(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError> {
        match self.products.find_by_sku(sku).await? {
            Some(product) => Ok(Some(product)),
            // Indexes lag under heavy writes; confirm the miss at the source.
            None => self.products.find_by_sku_direct(sku).await,
        }
    }

    /// Insert a product for `item`, or return the one a concurrent writer
    /// inserted first. The bool is true when this call created it.
    async fn create(
        &self,
        item: &CatalogItem,
        now: u64,
    ) -> Result<(LocalProduct, bool), StoreError> {
        if let Some(existing) = self.products.find_by_sku_direct(&item.sku).await? {
            return Ok((existing, false));
        }

        let new_product = NewProduct {
            sku: item.sku.clone(),
            title: item.title(),
            description: item.description.clone(),
            source: self.source.clone(),
            synced_at: now,
        };

        let created = match self.products.create(&new_product).await {
            Ok(id) => {
                tracing::info!(sku = %item.sku, product_id = %id, "created product");
                true
            }
            Err(StoreError::Conflict(_)) => false,
            Err(e) => return Err(e),
        };

        let product = self
            .products
            .find_by_sku_direct(&item.sku)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("product {}", item.sku)))?;
        Ok((product, created))
    }

    async fn reconcile_item(
        &mut self,
        item: &CatalogItem,
        mode: SyncMode,
        now: u64,
        report: &mut BatchReport,
    ) -> Result<ItemOutcome, StoreError> {
        if item.sku.trim().is_empty() {
            return Ok(ItemOutcome::Skipped(SkipReason::MissingSku));
        }
        self.seen.insert(item.sku.clone());

        let resolved = mode
            .is_full()
            .then(|| self.categories.resolve(&item.category, &item.description));

        let (product, created) = match self.lookup(&item.sku).await? {
            Some(product) => (product, false),
            None if !mode.is_full() => return Ok(ItemOutcome::Skipped(SkipReason::NotInStore)),
            None => {
                if resolved.as_ref().is_some_and(|r| r.is_unmatched()) {
                    report.feedback.push(Feedback::warning(format!(
                        "{}: category {:?} matches nothing; not created",
                        item.sku, item.category
                    )));
                    return Ok(ItemOutcome::Skipped(SkipReason::UnmatchedCategory));
                }
                self.create(item, now).await?
            }
        };

        let mut update = ProductUpdate {
            synced_at: now,
            stock: Some(item.stock),
            stock_status: Some(item.stock_status()),
            price_cents: Some(item.price_cents),
            retail_price_cents: item.retail_price_cents,
            ..Default::default()
        };

        if mode.is_full() {
            update.title = Some(item.title());
            update.description = Some(item.description.clone());
            match item.parsed_dimensions() {
                Some(Ok(dimensions)) => update.dimensions = Some(dimensions),
                Some(Err(e)) => {
                    tracing::warn!(sku = %item.sku, error = %e, "skipping dimension update");
                    report
                        .feedback
                        .push(Feedback::warning(format!("{}: {e}", item.sku)));
                }
                None => {}
            }
        }

        self.products.update(product.id, &update).await?;

        let mut category_updated = false;
        if let Some(resolved) = resolved.filter(|r| !r.is_unmatched()) {
            let terms = resolved.terms();
            if !same_terms(&terms, &product.categories) {
                self.products.set_categories(product.id, &terms).await?;
                category_updated = true;
            }
        }

        if mode.is_full()
            && product.image.is_none()
            && let Some(image) = &item.image
            && let Err(e) = self.products.set_image(product.id, image).await
        {
            tracing::warn!(sku = %item.sku, image = %image, error = %e, "image assignment failed");
            report
                .feedback
                .push(Feedback::warning(format!("{}: image {image}: {e}", item.sku)));
        }

        Ok(if created {
            ItemOutcome::Created { category_updated }
        } else {
            ItemOutcome::Updated { category_updated }
        })
    }
}

fn same_terms(a: &[CategoryRef], b: &[CategoryRef]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryPolicy;
    use crate::store::TaxonomyStore;
    use crate::test_support::{InMemoryProductStore, InMemoryTaxonomyStore, catalog_item};

    async fn reconciler(
        store: &Arc<InMemoryProductStore>,
        categories: &[&str],
        mode: SyncMode,
    ) -> ProductReconciler {
        let taxonomy: Arc<dyn TaxonomyStore> =
            Arc::new(InMemoryTaxonomyStore::with_categories(categories));
        let mut resolver =
            CategoryResolver::new(taxonomy, mode, CategoryPolicy::Strict, "Uncategorized");
        resolver.ensure_special_categories().await.unwrap();
        resolver
            .ensure_regular_categories(categories.iter().copied())
            .await
            .unwrap();
        ProductReconciler::new(
            Arc::clone(store) as Arc<dyn ProductStore>,
            resolver,
            "acme",
            2,
        )
    }

    #[tokio::test]
    async fn full_mode_creates_missing_products() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let items = vec![catalog_item("A", "Tools"), catalog_item("B", "Tools")];
        let report = reconciler.reconcile_batch(&items, SyncMode::Full).await;

        assert_eq!(report.created, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.category_updates, 2);
        let product = store.get("A").unwrap();
        assert_eq!(product.source, "acme");
        assert_eq!(product.categories.len(), 1);
    }

    #[tokio::test]
    async fn partial_mode_never_creates() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Partial).await;

        let report = reconciler
            .reconcile_batch(&[catalog_item("A", "Tools")], SyncMode::Partial)
            .await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.skip_reasons[&SkipReason::NotInStore], 1);
        assert!(store.all().is_empty());
        assert!(reconciler.confirmed_active().contains("A"));
    }

    #[tokio::test]
    async fn partial_mode_updates_only_stock_and_price() {
        let store = Arc::new(InMemoryProductStore::new());
        store.insert_sku("A", "Old title");
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Partial).await;

        let mut item = catalog_item("A", "Tools");
        item.description = "New title".into();
        item.stock = 7;
        item.price_cents = 999;
        item.image = Some("https://img.example/A.jpg".into());

        let report = reconciler.reconcile_batch(&[item], SyncMode::Partial).await;
        assert_eq!(report.updated, 1);

        let product = store.get("A").unwrap();
        assert_eq!(product.stock, 7);
        assert_eq!(product.price_cents, 999);
        assert_eq!(product.title, "Old title");
        assert!(product.categories.is_empty());
        assert!(product.image.is_none());
    }

    #[tokio::test]
    async fn malformed_dimensions_do_not_fail_item() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let mut item = catalog_item("A", "Tools");
        item.dimensions = Some("1;2".into());
        let report = reconciler.reconcile_batch(&[item], SyncMode::Full).await;

        assert_eq!(report.created, 1);
        assert!(report.feedback.iter().any(|f| f.is_warning()));
        assert!(store.get("A").unwrap().dimensions.is_none());
    }

    #[tokio::test]
    async fn image_only_set_when_missing() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let mut item = catalog_item("A", "Tools");
        item.image = Some("first.jpg".into());
        reconciler.reconcile_batch(&[item.clone()], SyncMode::Full).await;

        item.image = Some("second.jpg".into());
        reconciler.reconcile_batch(&[item], SyncMode::Full).await;

        assert_eq!(store.get("A").unwrap().image.as_deref(), Some("first.jpg"));
        assert_eq!(store.image_writes(), 1);
    }

    #[tokio::test]
    async fn strict_policy_skips_uncategorizable_new_items() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let report = reconciler
            .reconcile_batch(&[catalog_item("A", "Garden")], SyncMode::Full)
            .await;

        assert_eq!(report.skip_reasons[&SkipReason::UnmatchedCategory], 1);
        assert!(store.get("A").is_none());
        assert!(reconciler.confirmed_active().contains("A"));
    }

    #[tokio::test]
    async fn one_bad_item_does_not_abort_batch() {
        let store = Arc::new(InMemoryProductStore::new());
        store.fail_writes_for("B");
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let items = vec![
            catalog_item("A", "Tools"),
            catalog_item("B", "Tools"),
            catalog_item("C", "Tools"),
        ];
        let report = reconciler.reconcile_batch(&items, SyncMode::Full).await;

        assert_eq!(report.created, 2);
        assert_eq!(report.skip_reasons[&SkipReason::ItemError], 1);
        assert!(store.get("C").is_some());
        assert!(reconciler.confirmed_active().contains("B"));
    }

    #[tokio::test]
    async fn missing_sku_is_skipped() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let report = reconciler
            .reconcile_batch(&[catalog_item("  ", "Tools")], SyncMode::Full)
            .await;
        assert_eq!(report.skip_reasons[&SkipReason::MissingSku], 1);
    }

    #[tokio::test]
    async fn unchanged_categories_are_not_rewritten() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;
        let items = vec![catalog_item("A", "Tools")];

        let first = reconciler.reconcile_batch(&items, SyncMode::Full).await;
        let second = reconciler.reconcile_batch(&items, SyncMode::Full).await;

        assert_eq!(first.category_updates, 1);
        assert_eq!(second.category_updates, 0);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);
    }

    #[tokio::test]
    async fn sub_batches_commit_independently() {
        let store = Arc::new(InMemoryProductStore::new());
        let mut reconciler = reconciler(&store, &["Tools"], SyncMode::Full).await;

        let items: Vec<_> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|sku| catalog_item(sku, "Tools"))
            .collect();
        reconciler.reconcile_batch(&items, SyncMode::Full).await;

        // batch size 2 → 3 sub-batches
        assert_eq!(store.commits(), 3);
    }
}
