//! `TableStore` trait: the spreadsheet-like grid every stage reads and appends to.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::table::{Cell, Row, Table};

/// One positional cell write.
///
/// Coordinates are 1-indexed grid positions: row 1 is the header, so the
/// first data row is row 2, and column 1 is the first column.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    pub value: Cell,
}

impl CellUpdate {
    pub fn new(row: usize, col: usize, value: impl Into<Cell>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }

    /// Address a data row by its 0-based index and a column by its 0-based index.
    pub fn for_data_row(data_index: usize, col_index: usize, value: impl Into<Cell>) -> Self {
        Self::new(data_index + 2, col_index + 1, value)
    }
}

/// Backend-agnostic tabular store.
///
/// Tables are addressed by name. Reading an absent table is an error; an
/// existing table may be blank (no header, no rows).
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read the full grid of a table.
    async fn read_table(&self, name: &str) -> Result<Table, StoreError>;

    /// Append rows at the current end.
    ///
    /// `header` is written only when the table is blank. Rows shorter than
    /// the header are padded with empty cells; wider rows are rejected before
    /// anything is written.
    async fn append_rows(
        &self,
        name: &str,
        header: Option<&[String]>,
        rows: &[Row],
    ) -> Result<(), StoreError>;

    /// Apply a batch of positional cell writes.
    async fn update_cells(&self, name: &str, updates: &[CellUpdate]) -> Result<(), StoreError>;

    /// Clear the table and write a new header and rows.
    ///
    /// Administrative only; the regular pipeline never calls this.
    async fn rewrite_table(
        &self,
        name: &str,
        header: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError>;

    /// Create a blank table if it does not exist yet.
    async fn ensure_table(&self, name: &str) -> Result<(), StoreError>;

    /// Write a single cell.
    async fn write_cell(
        &self,
        name: &str,
        row: usize,
        col: usize,
        value: Cell,
    ) -> Result<(), StoreError> {
        self.update_cells(name, &[CellUpdate { row, col, value }])
            .await
    }
}

/// Pad `row` to `width`, or report it as too wide.
pub(crate) fn fit_row(table: &str, row: &Row, width: usize) -> Result<Row, StoreError> {
    if row.len() > width {
        return Err(StoreError::RowWidth {
            table: table.to_string(),
            expected: width,
            actual: row.len(),
        });
    }
    let mut fitted = row.clone();
    fitted.resize(width, Cell::Empty);
    Ok(fitted)
}
