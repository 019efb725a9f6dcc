use anyhow::{Context, Result};
use catalog_sync_store::CatalogStore;

use super::format;

pub fn run(store: &CatalogStore, limit: usize) -> Result<()> {
    let products = store.list_products().context("failed to list products")?;
    let total = products.len();
    let shown = &products[..total.min(limit)];

    format::print_product_table(shown);

    if total > shown.len() {
        println!("\n{} of {total} products (use --limit to show more)", shown.len());
    } else {
        println!("\n{total} products");
    }
    Ok(())
}
