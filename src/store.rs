use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::config::AppConfig;

/// One row of the `products` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_code: String,
    pub display_name: Option<String>,
    pub release_type: Option<String>,
    pub purchase_price: Option<f64>,
    pub local_image_path: Option<String>,
    pub notes: Option<String>,
}

/// Catalog fields the scraper never fills in.
#[derive(Debug, Clone, Default)]
pub struct CatalogDetails {
    pub release_type: Option<String>,
    pub purchase_price: Option<f64>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert the record or refresh its name and image path, atomically.
    async fn upsert_scraped(
        &self,
        product_code: &str,
        display_name: &str,
        image_path: &Path,
    ) -> Result<()>;

    async fn find(&self, product_code: &str) -> Result<Option<ProductRecord>>;

    /// Update catalog fields of an existing record. `false` if there is none.
    async fn record_details(&self, product_code: &str, details: CatalogDetails) -> Result<bool>;
}

// -------------------------
// SQLite
// -------------------------

/// Opens a fresh connection per operation.
pub struct SqliteRepository {
    path: PathBuf,
}

impl SqliteRepository {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            path: cfg.db_path.clone(),
        }
    }

    pub async fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS products (
                    product_code     TEXT PRIMARY KEY,
                    display_name     TEXT,
                    release_type     TEXT,
                    purchase_price   REAL,
                    local_image_path TEXT,
                    notes            TEXT
                );
                ",
            )?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&path)?;
            f(&conn)
        })
        .await
        .context("store task aborted")?
    }
}

fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

#[async_trait]
impl ProductStore for SqliteRepository {
    async fn upsert_scraped(
        &self,
        product_code: &str,
        display_name: &str,
        image_path: &Path,
    ) -> Result<()> {
        let code = product_code.to_string();
        let name = display_name.to_string();
        let image = image_path.to_string_lossy().into_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO products (product_code, display_name, local_image_path)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(product_code) DO UPDATE SET
                     display_name = excluded.display_name,
                     local_image_path = excluded.local_image_path",
                params![code, name, image],
            )?;
            debug!(product_code = %code, "record upserted");
            Ok(())
        })
        .await
    }

    async fn find(&self, product_code: &str) -> Result<Option<ProductRecord>> {
        let code = product_code.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT product_code, display_name, release_type, purchase_price,
                            local_image_path, notes
                     FROM products WHERE product_code = ?1",
                    params![code],
                    |r| {
                        Ok(ProductRecord {
                            product_code: r.get(0)?,
                            display_name: r.get(1)?,
                            release_type: r.get(2)?,
                            purchase_price: r.get(3)?,
                            local_image_path: r.get(4)?,
                            notes: r.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn record_details(&self, product_code: &str, details: CatalogDetails) -> Result<bool> {
        let code = product_code.to_string();
        self.with_conn(move |conn| {
            // absent fields keep their stored value
            let changed = conn.execute(
                "UPDATE products SET
                     release_type   = COALESCE(?2, release_type),
                     purchase_price = COALESCE(?3, purchase_price),
                     notes          = COALESCE(?4, notes)
                 WHERE product_code = ?1",
                params![
                    code,
                    details.release_type,
                    details.purchase_price,
                    details.notes
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}
