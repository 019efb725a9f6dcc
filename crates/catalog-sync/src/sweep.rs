use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::client::CatalogClient;
use crate::clock::now_epoch_secs;
use crate::feedback::Feedback;
use crate::item::{CatalogFilter, Credentials, MAX_PAGE_SIZE, SyncMode};
use crate::store::{ProductStore, StaleProduct, StoreError};

/// Products untouched for this long become deletion candidates.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(7 * 86400);

/// Deletions per sweep; the remainder waits for the next run.
pub const DEFAULT_SWEEP_LIMIT: usize = 100;

/// Outcome of a discontinuation sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Stale products not seen this run, before the limit was applied.
    pub candidates: usize,
    pub deleted: u64,
    /// Candidates the remote re-check reported as still listed.
    pub retained: u64,
    pub feedback: Vec<Feedback>,
}

/// Remote re-check performed before deleting anything.
pub struct RemoteVerification {
    pub client: Arc<dyn CatalogClient>,
    pub credentials: Credentials,
}

/// Permanently deletes local products the distributor no longer lists.
///
/// Deletion is irreversible. The staleness window and the optional remote
/// re-check are the only guards against deleting a product that a partial
/// pagination simply failed to reach.
pub struct DiscontinuationSweeper {
    products: Arc<dyn ProductStore>,
    source: String,
    verification: Option<RemoteVerification>,
}

impl DiscontinuationSweeper {
    pub fn new(products: Arc<dyn ProductStore>, source: impl Into<String>) -> Self {
        Self {
            products,
            source: source.into(),
            verification: None,
        }
    }

    pub fn with_verification(mut self, verification: RemoteVerification) -> Self {
        self.verification = Some(verification);
        self
    }

    /// Delete up to `limit` products last synced more than `stale_threshold`
    /// ago whose SKU is not in `confirmed_active`.
    pub async fn sweep(
        &self,
        confirmed_active: &HashSet<String>,
        stale_threshold: Duration,
        limit: usize,
    ) -> Result<SweepReport, StoreError> {
        let cutoff = now_epoch_secs().saturating_sub(stale_threshold.as_secs());
        let stale = self.products.list_stale(&self.source, cutoff).await?;

        let mut candidates: Vec<StaleProduct> = stale
            .into_iter()
            .filter(|product| !confirmed_active.contains(&product.sku))
            .collect();

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        candidates.truncate(limit);

        if candidates.is_empty() {
            return Ok(report);
        }

        if let Some(verification) = &self.verification {
            match remote_listed(verification, &candidates).await {
                Ok(listed) => {
                    let before = candidates.len();
                    candidates.retain(|product| !listed.contains(&product.sku));
                    report.retained = (before - candidates.len()) as u64;
                }
                Err(message) => {
                    tracing::warn!(error = %message, "remote re-check failed; skipping deletions");
                    report.feedback.push(Feedback::warning(format!(
                        "discontinuation re-check failed, nothing deleted: {message}"
                    )));
                    return Ok(report);
                }
            }
        }

        for product in &candidates {
            match self.products.delete(product.id).await {
                Ok(()) => {
                    tracing::info!(
                        sku = %product.sku,
                        product_id = %product.id,
                        last_synced_at = product.last_synced_at,
                        "deleted discontinued product"
                    );
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(sku = %product.sku, error = %e, "failed to delete product");
                    report
                        .feedback
                        .push(Feedback::warning(format!("{}: delete failed: {e}", product.sku)));
                }
            }
        }

        Ok(report)
    }
}

/// SKUs among `candidates` that the distributor still lists.
async fn remote_listed(
    verification: &RemoteVerification,
    candidates: &[StaleProduct],
) -> Result<HashSet<String>, String> {
    let mut listed = HashSet::new();

    for chunk in candidates.chunks(MAX_PAGE_SIZE as usize) {
        let filter = CatalogFilter::Skus(chunk.iter().map(|p| p.sku.clone()).collect());
        let mut page = 1;
        loop {
            let result = verification
                .client
                .fetch_page(
                    &verification.credentials,
                    SyncMode::Partial,
                    &filter,
                    page,
                    chunk.len() as u32,
                )
                .await
                .map_err(|e| e.to_string())?;
            if let Some(error) = result.error {
                return Err(error);
            }
            listed.extend(result.items.into_iter().map(|item| item.sku));
            if page >= result.total_pages {
                break;
            }
            page += 1;
        }
    }

    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::PageResult;
    use crate::test_support::{InMemoryProductStore, ScriptedCatalogClient, catalog_item};

    const DAY: u64 = 86400;

    fn store_with(entries: &[(&str, u64)]) -> Arc<InMemoryProductStore> {
        let store = Arc::new(InMemoryProductStore::new());
        let now = now_epoch_secs();
        for (sku, age_days) in entries {
            store.insert_sku(sku, sku);
            store.set_last_synced_at(sku, now - age_days * DAY);
        }
        store
    }

    fn sweeper(store: &Arc<InMemoryProductStore>) -> DiscontinuationSweeper {
        DiscontinuationSweeper::new(Arc::clone(store) as Arc<dyn ProductStore>, "acme")
    }

    #[tokio::test]
    async fn deletes_stale_products_not_seen() {
        let store = store_with(&[("OLD", 10), ("FRESH", 1)]);
        let report = sweeper(&store)
            .sweep(&HashSet::new(), DEFAULT_STALE_AFTER, 10)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.get("OLD").is_none());
        assert!(store.get("FRESH").is_some());
    }

    #[tokio::test]
    async fn confirmed_active_skus_are_never_deleted() {
        let store = store_with(&[("OLD", 30)]);
        let active: HashSet<String> = ["OLD".to_owned()].into();

        let report = sweeper(&store)
            .sweep(&active, DEFAULT_STALE_AFTER, 10)
            .await
            .unwrap();

        assert_eq!(report.deleted, 0);
        assert!(store.get("OLD").is_some());
    }

    #[tokio::test]
    async fn respects_limit() {
        let store = store_with(&[("A", 10), ("B", 11), ("C", 12)]);
        let report = sweeper(&store)
            .sweep(&HashSet::new(), DEFAULT_STALE_AFTER, 2)
            .await
            .unwrap();

        assert_eq!(report.candidates, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn ignores_products_from_other_sources() {
        let store = store_with(&[("A", 10)]);
        let sweeper =
            DiscontinuationSweeper::new(Arc::clone(&store) as Arc<dyn ProductStore>, "other");
        let report = sweeper
            .sweep(&HashSet::new(), DEFAULT_STALE_AFTER, 10)
            .await
            .unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn remote_recheck_retains_listed_skus() {
        let store = store_with(&[("GONE", 10), ("STILL", 10)]);
        let client = Arc::new(ScriptedCatalogClient::new(vec![]).with_lookup(vec![
            catalog_item("STILL", "Tools"),
        ]));

        let report = sweeper(&store)
            .with_verification(RemoteVerification {
                client,
                credentials: Credentials::new("id", "en"),
            })
            .sweep(&HashSet::new(), DEFAULT_STALE_AFTER, 10)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained, 1);
        assert!(store.get("GONE").is_none());
        assert!(store.get("STILL").is_some());
    }

    #[tokio::test]
    async fn failed_recheck_deletes_nothing() {
        let store = store_with(&[("GONE", 10)]);
        let client = Arc::new(
            ScriptedCatalogClient::new(vec![]).with_lookup_result(PageResult::failed(1, "timeout")),
        );

        let report = sweeper(&store)
            .with_verification(RemoteVerification {
                client,
                credentials: Credentials::new("id", "en"),
            })
            .sweep(&HashSet::new(), DEFAULT_STALE_AFTER, 10)
            .await
            .unwrap();

        assert_eq!(report.deleted, 0);
        assert!(store.get("GONE").is_some());
        assert_eq!(report.feedback.len(), 1);
    }
}
