use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use catalog_sync::clock::now_epoch_secs;
use catalog_sync::kv::expires_at;
use catalog_sync::{
    CategoryRef, CategoryTerm, Dimensions, KvStore, LocalProduct, NewProduct, ProductId,
    ProductStore, ProductUpdate, StaleProduct, StockStatus, StoreError, TaxonomyStore,
};

use crate::schema;

const PRODUCT_COLUMNS: &str = "id, sku, title, description, stock, stock_status, price_cents,
     retail_price_cents, length, width, height, weight, image, source, last_synced_at";

/// SQLite-backed product store, taxonomy, and key-value store.
///
/// One connection behind a mutex. Batches map onto a SQLite transaction
/// opened by `begin_batch` and closed by `commit_batch`.
pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    /// Open a store backed by a file on disk.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        // Another process (e.g. `catalog-sync abort`) may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err)?;
        schema::migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection mutex poisoned: {e}")))
    }

    /// Every product, ordered by SKU.
    pub fn list_products(&self) -> Result<Vec<LocalProduct>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY sku"))
            .map_err(db_err)?;
        let mut products = stmt
            .query_map([], row_to_product)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        for product in &mut products {
            product.categories = load_categories(&conn, product.id)?;
        }
        Ok(products)
    }

    /// Overwrite a product's sync timestamp (for testing staleness).
    pub fn set_last_synced_at(&self, sku: &str, epoch_secs: u64) -> Result<(), StoreError> {
        self.conn()?
            .execute(
                "UPDATE products SET last_synced_at = ?2 WHERE sku = ?1",
                params![sku, to_i64(epoch_secs)],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn find(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"),
                [sku],
                row_to_product,
            )
            .optional()
            .map_err(db_err)?;
        match product {
            Some(mut product) => {
                product.categories = load_categories(&conn, product.id)?;
                Ok(Some(product))
            }
            None => Ok(None),
        }
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<LocalProduct> {
    let stock: i64 = row.get(4)?;
    let stock_status: String = row.get(5)?;
    let price_cents: i64 = row.get(6)?;
    let retail_price_cents: Option<i64> = row.get(7)?;
    let dims: [Option<f64>; 4] = [row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?];
    let last_synced_at: i64 = row.get(14)?;

    let dimensions = match dims {
        [Some(length), Some(width), Some(height), Some(weight)] => Some(Dimensions {
            length,
            width,
            height,
            weight,
        }),
        _ => None,
    };

    Ok(LocalProduct {
        id: ProductId(row.get(0)?),
        sku: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        stock: u32::try_from(stock.max(0)).unwrap_or(u32::MAX),
        stock_status: StockStatus::parse(&stock_status),
        price_cents: price_cents.max(0) as u64,
        retail_price_cents: retail_price_cents.map(|c| c.max(0) as u64),
        dimensions,
        categories: Vec::new(),
        image: row.get(12)?,
        source: row.get(13)?,
        last_synced_at: last_synced_at.max(0) as u64,
    })
}

fn load_categories(conn: &Connection, id: ProductId) -> Result<Vec<CategoryRef>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT category_id FROM product_categories
             WHERE product_id = ?1
             ORDER BY position",
        )
        .map_err(db_err)?;
    stmt.query_map([id.0], |row| Ok(CategoryRef(row.get(0)?)))
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)
}

#[async_trait::async_trait]
impl ProductStore for CatalogStore {
    async fn find_by_sku(&self, sku: &str) -> Result<Option<LocalProduct>, StoreError> {
        self.find(sku)
    }

    async fn create(&self, product: &NewProduct) -> Result<ProductId, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO products (sku, title, description, source, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                product.sku,
                product.title,
                product.description,
                product.source,
                to_i64(product.synced_at),
            ],
        )
        .map_err(|e| {
            if is_constraint(&e) {
                StoreError::Conflict(format!("sku {} already exists", product.sku))
            } else {
                db_err(e)
            }
        })?;
        Ok(ProductId(conn.last_insert_rowid()))
    }

    async fn update(&self, id: ProductId, update: &ProductUpdate) -> Result<(), StoreError> {
        let dims = update.dimensions;
        let changed = self
            .conn()?
            .execute(
                "UPDATE products SET
                    last_synced_at     = ?2,
                    stock              = COALESCE(?3, stock),
                    stock_status       = COALESCE(?4, stock_status),
                    price_cents        = COALESCE(?5, price_cents),
                    retail_price_cents = COALESCE(?6, retail_price_cents),
                    title              = COALESCE(?7, title),
                    description        = COALESCE(?8, description),
                    length             = COALESCE(?9, length),
                    width              = COALESCE(?10, width),
                    height             = COALESCE(?11, height),
                    weight             = COALESCE(?12, weight)
                 WHERE id = ?1",
                params![
                    id.0,
                    to_i64(update.synced_at),
                    update.stock,
                    update.stock_status.map(|s| s.as_str()),
                    update.price_cents.map(to_i64),
                    update.retail_price_cents.map(to_i64),
                    update.title,
                    update.description,
                    dims.map(|d| d.length),
                    dims.map(|d| d.width),
                    dims.map(|d| d.height),
                    dims.map(|d| d.weight),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM product_categories WHERE product_id = ?1", [id.0])
            .map_err(db_err)?;
        let changed = conn
            .execute("DELETE FROM products WHERE id = ?1", [id.0])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn set_categories(
        &self,
        id: ProductId,
        categories: &[CategoryRef],
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM product_categories WHERE product_id = ?1", [id.0])
            .map_err(db_err)?;
        let mut stmt = conn
            .prepare(
                "INSERT OR IGNORE INTO product_categories (product_id, category_id, position)
                 VALUES (?1, ?2, ?3)",
            )
            .map_err(db_err)?;
        for (position, category) in categories.iter().enumerate() {
            stmt.execute(params![id.0, category.0, position as i64])
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn set_image(&self, id: ProductId, image: &str) -> Result<(), StoreError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE products SET image = ?2 WHERE id = ?1",
                params![id.0, image],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn list_stale(&self, source: &str, cutoff: u64) -> Result<Vec<StaleProduct>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, sku, last_synced_at FROM products
                 WHERE source = ?1 AND last_synced_at < ?2
                 ORDER BY last_synced_at, id",
            )
            .map_err(db_err)?;
        stmt.query_map(params![source, to_i64(cutoff)], |row| {
            let last_synced_at: i64 = row.get(2)?;
            Ok(StaleProduct {
                id: ProductId(row.get(0)?),
                sku: row.get(1)?,
                last_synced_at: last_synced_at.max(0) as u64,
            })
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)
    }

    async fn begin_batch(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN").map_err(db_err)?;
        }
        Ok(())
    }

    async fn commit_batch(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        if let Err(e) = conn.execute_batch("COMMIT") {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %rollback, "rollback after failed commit also failed");
            }
            return Err(db_err(e));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TaxonomyStore for CatalogStore {
    async fn find_category_by_name(&self, name: &str) -> Result<Option<CategoryTerm>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, name FROM categories WHERE name = ?1",
                [name],
                |row| {
                    Ok(CategoryTerm {
                        id: CategoryRef(row.get(0)?),
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    async fn create_category(&self, name: &str) -> Result<CategoryTerm, StoreError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])
            .map_err(|e| {
                if is_constraint(&e) {
                    StoreError::Conflict(format!("category {name} already exists"))
                } else {
                    db_err(e)
                }
            })?;
        Ok(CategoryTerm {
            id: CategoryRef(conn.last_insert_rowid()),
            name: name.to_owned(),
        })
    }

    async fn list_categories(&self) -> Result<Vec<CategoryTerm>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM categories ORDER BY id")
            .map_err(db_err)?;
        stmt.query_map([], |row| {
            Ok(CategoryTerm {
                id: CategoryRef(row.get(0)?),
                name: row.get(1)?,
            })
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)
    }
}

impl KvStore for CatalogStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        match row {
            Some((_, Some(at))) if at <= to_i64(now_epoch_secs()) => {
                conn.execute("DELETE FROM kv WHERE key = ?1", [key])
                    .map_err(db_err)?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at(ttl).map(to_i64)],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        // One statement, so SQLite's write lock makes it atomic across processes.
        let changed = self
            .conn()?
            .execute(
                "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                    SET value = excluded.value, expires_at = excluded.expires_at
                    WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?4",
                params![
                    key,
                    value,
                    expires_at(ttl).map(to_i64),
                    to_i64(now_epoch_secs())
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", [key])
            .map_err(db_err)?;
        Ok(())
    }
}
