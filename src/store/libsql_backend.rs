//! libSQL backend: durable `TableStore` implementation.
//!
//! Each named table is one `grid_tables` row holding the header as JSON, plus
//! one `grid_rows` row per data row holding its cells as JSON. Positions are
//! contiguous from 0 so a 1-indexed grid row `r` lives at position `r - 2`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{CellUpdate, TableStore, fit_row};
use crate::table::{Row, Table};

/// libSQL table store.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlTableStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTableStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Table store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Header of a table, or `TableNotFound`.
async fn load_header(conn: &Connection, name: &str) -> Result<Vec<String>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT header FROM grid_tables WHERE name = ?1",
            params![name],
        )
        .await
        .map_err(|e| StoreError::Query(format!("load_header: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let json: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("load_header row parse: {e}")))?;
            decode(&json)
        }
        Ok(None) => Err(StoreError::TableNotFound(name.to_string())),
        Err(e) => Err(StoreError::Query(format!("load_header: {e}"))),
    }
}

async fn row_count(conn: &Connection, name: &str) -> Result<i64, StoreError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM grid_rows WHERE table_name = ?1",
            params![name],
        )
        .await
        .map_err(|e| StoreError::Query(format!("row_count: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| StoreError::Query(format!("row_count row parse: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(StoreError::Query(format!("row_count: {e}"))),
    }
}

async fn load_row(conn: &Connection, name: &str, position: i64) -> Result<Option<Row>, StoreError> {
    let mut rows = conn
        .query(
            "SELECT cells FROM grid_rows WHERE table_name = ?1 AND position = ?2",
            params![name, position],
        )
        .await
        .map_err(|e| StoreError::Query(format!("load_row: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => {
            let json: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("load_row row parse: {e}")))?;
            decode(&json).map(Some)
        }
        Ok(None) => Ok(None),
        Err(e) => Err(StoreError::Query(format!("load_row: {e}"))),
    }
}

async fn insert_rows(
    conn: &Connection,
    name: &str,
    start: i64,
    rows: &[Row],
) -> Result<(), StoreError> {
    for (offset, row) in rows.iter().enumerate() {
        conn.execute(
            "INSERT INTO grid_rows (table_name, position, cells) VALUES (?1, ?2, ?3)",
            params![name, start + offset as i64, encode(row)?],
        )
        .await
        .map_err(|e| StoreError::Query(format!("insert_rows: {e}")))?;
    }
    Ok(())
}

async fn store_header(conn: &Connection, name: &str, header: &[String]) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE grid_tables SET header = ?1, updated_at = datetime('now') WHERE name = ?2",
        params![encode(&header)?, name],
    )
    .await
    .map_err(|e| StoreError::Query(format!("store_header: {e}")))?;
    Ok(())
}

fn out_of_range(name: &str, update: &CellUpdate) -> StoreError {
    StoreError::OutOfRange {
        table: name.to_string(),
        row: update.row,
        col: update.col,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TableStore for LibSqlTableStore {
    async fn read_table(&self, name: &str) -> Result<Table, StoreError> {
        let conn = self.conn();
        let header = load_header(conn, name).await?;

        let mut rows = conn
            .query(
                "SELECT cells FROM grid_rows WHERE table_name = ?1 ORDER BY position",
                params![name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("read_table: {e}")))?;

        let mut data = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("read_table: {e}")))?
        {
            let json: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("read_table row parse: {e}")))?;
            data.push(decode(&json)?);
        }

        Ok(Table::new(header, data))
    }

    async fn append_rows(
        &self,
        name: &str,
        header: Option<&[String]>,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("append_rows begin: {e}")))?;

        let existing = load_header(&tx, name).await?;
        let count = row_count(&tx, name).await?;
        let blank = existing.is_empty() && count == 0;

        let width = match header {
            Some(h) if blank => {
                store_header(&tx, name, h).await?;
                h.len()
            }
            _ => existing.len(),
        };

        let fitted = if width == 0 {
            rows.to_vec()
        } else {
            rows.iter()
                .map(|row| fit_row(name, row, width))
                .collect::<Result<Vec<_>, _>>()?
        };

        insert_rows(&tx, name, count, &fitted).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("append_rows commit: {e}")))?;

        debug!(table = %name, rows = fitted.len(), "Appended rows");
        Ok(())
    }

    async fn update_cells(&self, name: &str, updates: &[CellUpdate]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("update_cells begin: {e}")))?;

        let mut header = load_header(&tx, name).await?;
        let mut header_dirty = false;
        let mut touched: BTreeMap<i64, Row> = BTreeMap::new();

        for update in updates {
            if update.row == 0 || update.col == 0 {
                return Err(out_of_range(name, update));
            }
            let col = update.col - 1;

            if update.row == 1 {
                let slot = header
                    .get_mut(col)
                    .ok_or_else(|| out_of_range(name, update))?;
                *slot = update.value.display();
                header_dirty = true;
                continue;
            }

            let position = (update.row - 2) as i64;
            if !touched.contains_key(&position) {
                let row = load_row(&tx, name, position)
                    .await?
                    .ok_or_else(|| out_of_range(name, update))?;
                touched.insert(position, row);
            }
            let cell = touched
                .get_mut(&position)
                .and_then(|row| row.get_mut(col))
                .ok_or_else(|| out_of_range(name, update))?;
            *cell = update.value.clone();
        }

        if header_dirty {
            store_header(&tx, name, &header).await?;
        }
        for (position, row) in &touched {
            tx.execute(
                "UPDATE grid_rows SET cells = ?1 WHERE table_name = ?2 AND position = ?3",
                params![encode(row)?, name, *position],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_cells: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("update_cells commit: {e}")))?;
        Ok(())
    }

    async fn rewrite_table(
        &self,
        name: &str,
        header: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let fitted = rows
            .iter()
            .map(|row| fit_row(name, row, header.len()))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| StoreError::Query(format!("rewrite_table begin: {e}")))?;

        load_header(&tx, name).await?;
        tx.execute(
            "DELETE FROM grid_rows WHERE table_name = ?1",
            params![name],
        )
        .await
        .map_err(|e| StoreError::Query(format!("rewrite_table clear: {e}")))?;
        store_header(&tx, name, header).await?;
        insert_rows(&tx, name, 0, &fitted).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(format!("rewrite_table commit: {e}")))?;
        Ok(())
    }

    async fn ensure_table(&self, name: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO grid_tables (name) VALUES (?1)",
                params![name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("ensure_table: {e}")))?;
        Ok(())
    }
}
