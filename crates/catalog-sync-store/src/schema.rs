use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE products (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                sku                 TEXT NOT NULL UNIQUE,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                stock               INTEGER NOT NULL DEFAULT 0,
                stock_status        TEXT NOT NULL DEFAULT 'out_of_stock',
                price_cents         INTEGER NOT NULL DEFAULT 0,
                retail_price_cents  INTEGER,
                length              REAL,
                width               REAL,
                height              REAL,
                weight              REAL,
                image               TEXT,
                source              TEXT NOT NULL,
                last_synced_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_products_stale ON products(source, last_synced_at);

            CREATE TABLE categories (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                name    TEXT NOT NULL UNIQUE
            );

            CREATE TABLE product_categories (
                product_id  INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                position    INTEGER NOT NULL,
                PRIMARY KEY (product_id, category_id)
            );",
        ),
        M::up(
            "CREATE TABLE kv (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                expires_at  INTEGER
            );",
        ),
    ])
}
