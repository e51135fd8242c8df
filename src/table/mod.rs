//! Tabular data model shared by every stage.
//!
//! A [`Table`] is a header plus rows of heterogeneous [`Cell`]s, mirroring the
//! spreadsheet-like grids the pipeline reads from and appends to.

pub mod csv;
pub mod normalize;
pub mod signature;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use normalize::normalize;
pub use signature::{Signature, SignatureSpec};

/// Processing-status column, first column of every raw row.
pub const STATUS_COLUMN: &str = "Status";

/// Provenance columns written after the status column, in order.
pub const METADATA_COLUMNS: [&str; 5] = [
    "Ingest Date",
    "Sender",
    "Subject",
    "Filename",
    "Original Row",
];

/// Number of leading provenance columns (status + metadata) on raw and clean rows.
/// Signature and duplicate comparison always skip exactly this many columns.
pub const METADATA_PREFIX_WIDTH: usize = 1 + METADATA_COLUMNS.len();

/// Name of the enrichment column appended to clean rows.
pub const VENDOR_TIER_COLUMN: &str = "Vendor Tier";

/// Value stored when a tier is missing or unmapped.
pub const UNMAPPED_TIER: &str = "N/A";

/// One scalar value in a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Date(DateTime<Utc>),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// True for `Empty` and for text that is the empty string.
    ///
    /// Whitespace-only text is not empty; callers that want trimming use
    /// [`Cell::display`] and trim themselves.
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Plain string conversion, without normalization.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => normalize::format_number(*n),
            Cell::Date(d) => normalize::format_instant(d),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Date(value)
    }
}

/// An ordered sequence of cells.
pub type Row = Vec<Cell>;

/// A header row plus data rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Row>) -> Self {
        Self { header, rows }
    }

    /// A table with neither header nor rows.
    pub fn is_blank(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    pub fn has_data(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Position of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// The cell at `(row, col)` (0-based, data rows only). Missing cells read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }
}

/// Full raw-store header for a CSV with the given data headers.
pub fn raw_header(data_headers: &[String]) -> Vec<String> {
    std::iter::once(STATUS_COLUMN)
        .chain(METADATA_COLUMNS)
        .map(str::to_string)
        .chain(data_headers.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_width_covers_status_and_metadata() {
        assert_eq!(METADATA_PREFIX_WIDTH, 6);
        let header = raw_header(&["Name".into(), "Tier".into()]);
        assert_eq!(header[0], STATUS_COLUMN);
        assert_eq!(header[METADATA_PREFIX_WIDTH], "Name");
        assert_eq!(header.len(), 8);
    }

    #[test]
    fn cell_emptiness() {
        assert!(Cell::Empty.is_empty());
        assert!(Cell::text("").is_empty());
        assert!(!Cell::text(" ").is_empty());
        assert!(!Cell::Number(0.0).is_empty());
    }

    #[test]
    fn missing_cells_read_as_empty() {
        let table = Table::new(vec!["A".into()], vec![vec![Cell::text("x")]]);
        assert_eq!(table.cell(0, 0), &Cell::text("x"));
        assert_eq!(table.cell(0, 5), &Cell::Empty);
        assert_eq!(table.cell(9, 0), &Cell::Empty);
    }

    #[test]
    fn cell_serde_is_tagged() {
        let json = serde_json::to_string(&Cell::Number(7.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":7.0}"#);
        let back: Cell = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Cell::Number(7.0));
        let empty: Cell = serde_json::from_str(r#"{"type":"empty"}"#).unwrap();
        assert_eq!(empty, Cell::Empty);
    }
}
