//! In-memory `TableStore` for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::traits::{CellUpdate, TableStore, fit_row};
use crate::table::{Row, Table};

/// Tables held in a map behind a mutex. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given blank tables.
    pub fn with_tables<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.lock();
            for name in names {
                tables.insert(name.to_string(), Table::default());
            }
        }
        store
    }

    /// Replace a table's contents wholesale (test setup).
    pub fn put(&self, name: &str, table: Table) {
        self.lock().insert(name.to_string(), table);
    }

    /// Snapshot a table, if it exists.
    pub fn snapshot(&self, name: &str) -> Option<Table> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Table>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn read_table(&self, name: &str) -> Result<Table, StoreError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    async fn append_rows(
        &self,
        name: &str,
        header: Option<&[String]>,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;

        let new_header = match header {
            Some(h) if table.is_blank() => Some(h.to_vec()),
            _ => None,
        };
        let width = new_header
            .as_ref()
            .map(Vec::len)
            .unwrap_or(table.header.len());

        let fitted = if width == 0 {
            rows.to_vec()
        } else {
            rows.iter()
                .map(|row| fit_row(name, row, width))
                .collect::<Result<Vec<_>, _>>()?
        };

        if let Some(h) = new_header {
            table.header = h;
        }
        table.rows.extend(fitted);
        Ok(())
    }

    async fn update_cells(&self, name: &str, updates: &[CellUpdate]) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;

        // Validate the whole batch first so a bad coordinate writes nothing.
        for update in updates {
            if !in_range(table, update.row, update.col) {
                return Err(StoreError::OutOfRange {
                    table: name.to_string(),
                    row: update.row,
                    col: update.col,
                });
            }
        }

        for update in updates {
            let col = update.col - 1;
            if update.row == 1 {
                table.header[col] = update.value.display();
            } else {
                table.rows[update.row - 2][col] = update.value.clone();
            }
        }
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

        let mut tables = self.lock();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;
        *table = Table::new(header.to_vec(), fitted);
        Ok(())
    }

    async fn ensure_table(&self, name: &str) -> Result<(), StoreError> {
        self.lock().entry(name.to_string()).or_default();
        Ok(())
    }
}

fn in_range(table: &Table, row: usize, col: usize) -> bool {
    if row == 0 || col == 0 {
        return false;
    }
    if row == 1 {
        return col <= table.header.len();
    }
    table
        .rows
        .get(row - 2)
        .is_some_and(|r| col <= r.len())
}
