use std::sync::Arc;
use std::time::Duration;

use catalog_sync::clock::now_epoch_secs;
use catalog_sync::test_support::{ScriptedCatalogClient, catalog_item, catalog_pages};
use catalog_sync::{
    Credentials, ProductStore, SyncContext, SyncOrchestrator, SyncRequest, SyncSettings,
    TaxonomyStore,
};
use catalog_sync_store::CatalogStore;

fn orchestrator(store: &Arc<CatalogStore>, client: ScriptedCatalogClient) -> SyncOrchestrator {
    let mut settings = SyncSettings::new("acme", Credentials::new("api-123", "en"));
    settings.page_delay = Duration::ZERO;
    settings.batch_size = 2;
    SyncOrchestrator::new(SyncContext {
        client: Arc::new(client),
        products: store.clone(),
        taxonomy: store.clone(),
        kv: store.clone(),
        settings,
    })
}

fn catalog() -> ScriptedCatalogClient {
    let mut on_sale = catalog_item("C", "Garden");
    on_sale.description = "*Rake".into();
    on_sale.dimensions = Some("100;10;5;1.2".into());
    ScriptedCatalogClient::new(catalog_pages(vec![
        vec![catalog_item("A", "Tools"), catalog_item("B", "Tools")],
        vec![on_sale],
    ]))
}

#[tokio::test]
async fn full_sync_populates_store() {
    let store = Arc::new(CatalogStore::open_in_memory().unwrap());

    let outcome = orchestrator(&store, catalog()).run(SyncRequest::full()).await;

    assert!(outcome.is_completed(), "{outcome:?}");
    let products = store.list_products().unwrap();
    assert_eq!(products.len(), 3);

    let rake = store.find_by_sku("C").await.unwrap().unwrap();
    assert_eq!(rake.title, "Rake");
    assert_eq!(rake.dimensions.unwrap().length, 100.0);
    assert_eq!(rake.categories.len(), 2);

    let names = store.list_category_names().await.unwrap();
    for expected in ["Specials", "Back In Stock", "New Arrivals", "Tools", "Garden"] {
        assert!(names.contains(&expected.to_owned()), "missing {expected}");
    }
}

#[tokio::test]
async fn second_run_creates_nothing() {
    let store = Arc::new(CatalogStore::open_in_memory().unwrap());
    let orchestrator = orchestrator(&store, catalog());

    orchestrator.run(SyncRequest::full()).await;
    let second = orchestrator.run(SyncRequest::full()).await;

    let summary = second.summary().unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 3);
    assert_eq!(store.list_products().unwrap().len(), 3);
}

#[tokio::test]
async fn stale_products_are_swept() {
    let store = Arc::new(CatalogStore::open_in_memory().unwrap());
    let orchestrator = orchestrator(&store, catalog());
    orchestrator.run(SyncRequest::full()).await;

    store
        .create(&catalog_sync::NewProduct {
            sku: "GONE".into(),
            title: "Gone".into(),
            description: String::new(),
            source: "acme".into(),
            synced_at: now_epoch_secs() - 30 * 86400,
        })
        .await
        .unwrap();

    let outcome = orchestrator.run(SyncRequest::full()).await;

    assert_eq!(outcome.summary().unwrap().deleted, 1);
    assert!(store.find_by_sku("GONE").await.unwrap().is_none());
}

#[tokio::test]
async fn lock_and_summary_live_in_the_store() {
    let store = Arc::new(CatalogStore::open_in_memory().unwrap());
    let first = orchestrator(&store, catalog());
    first.run(SyncRequest::full()).await;

    // A second orchestrator over the same database sees the persisted run.
    let second = orchestrator(&store, catalog());
    let last = second.last_run().unwrap().unwrap();
    assert_eq!(last.created, 3);
    assert!(!second.status().active);
}
