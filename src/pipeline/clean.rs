//! Cleaning and enrichment: move unprocessed raw rows into the clean table.
//!
//! Every unprocessed raw row gets its vendor tier appended, is compared by
//! signature against the whole clean table plus the rows already accepted in
//! this pass, and is appended only if new. All visited raw rows are then
//! stamped processed, survivors and duplicates alike.
//!
//! The append and the status update are two separate writes. If the status
//! update fails after the append succeeded, the next pass re-reads the same
//! rows and the signature check drops them again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{CleaningConfig, PipelineConfig};
use crate::error::{ConfigError, PipelineError};
use crate::pipeline::types::CleanReport;
use crate::store::{CellUpdate, TableStore};
use crate::table::signature::{SignatureSet, SignatureSpec};
use crate::table::{Cell, METADATA_PREFIX_WIDTH, Row, Table, UNMAPPED_TIER, VENDOR_TIER_COLUMN};

/// Reads the raw table and writes the clean table.
pub struct Cleaner {
    store: Arc<dyn TableStore>,
    config: Arc<PipelineConfig>,
}

impl Cleaner {
    pub fn new(store: Arc<dyn TableStore>, config: Arc<PipelineConfig>) -> Self {
        Self { store, config }
    }

    /// Run one cleaning pass.
    pub async fn clean(&self) -> Result<CleanReport, PipelineError> {
        self.clean_at(Utc::now()).await
    }

    /// Run one cleaning pass, stamping rows with `now`.
    pub async fn clean_at(&self, now: DateTime<Utc>) -> Result<CleanReport, PipelineError> {
        let tables = &self.config.tables;
        let cleaning = &self.config.cleaning;

        let raw = self.store.read_table(&tables.raw).await?;
        if !raw.has_data() {
            info!(table = %tables.raw, "No raw data to clean");
            return Ok(CleanReport::default());
        }

        let status_idx = require_column(&raw, &tables.raw, &cleaning.status_column)?;
        let tier_idx = require_column(&raw, &tables.raw, &cleaning.tier_column)?;

        let unprocessed: Vec<usize> = (0..raw.rows.len())
            .filter(|&i| raw.cell(i, status_idx).is_empty())
            .collect();
        if unprocessed.is_empty() {
            info!(table = %tables.raw, "All raw rows already processed");
            return Ok(CleanReport::default());
        }
        debug!(count = unprocessed.len(), "Unprocessed raw rows");

        let clean = self.store.read_table(&tables.clean).await?;
        let clean_header: Vec<String> = if clean.header.is_empty() {
            raw.header
                .iter()
                .cloned()
                .chain(std::iter::once(VENDOR_TIER_COLUMN.to_string()))
                .collect()
        } else {
            clean.header.clone()
        };

        let spec = cleaning.duplicate_check.then(|| {
            SignatureSpec::resolve(
                &clean_header,
                &cleaning.duplicate_check_columns,
                METADATA_PREFIX_WIDTH,
            )
        });
        let mut seen = match &spec {
            Some(spec) => SignatureSet::from_rows(spec, &clean.rows),
            None => SignatureSet::new(),
        };
        if !seen.is_empty() {
            debug!(known = seen.len(), "Seeded signatures from clean table");
        }

        let mut survivors: Vec<Row> = Vec::new();
        let mut duplicates = 0;
        for &i in &unprocessed {
            let row = enrich(&raw.rows[i], raw.header.len(), tier_idx, cleaning);
            let is_new = match &spec {
                Some(spec) => seen.insert(spec.signature(&row)),
                None => true,
            };
            if is_new {
                survivors.push(row);
            } else {
                duplicates += 1;
            }
        }

        if !survivors.is_empty() {
            self.store
                .append_rows(&tables.clean, Some(&clean_header), &survivors)
                .await?;
        }

        let stamp = processed_stamp(now);
        let updates: Vec<CellUpdate> = unprocessed
            .iter()
            .map(|&i| CellUpdate::for_data_row(i, status_idx, stamp.as_str()))
            .collect();
        self.store.update_cells(&tables.raw, &updates).await?;

        let report = CleanReport {
            rows_added: survivors.len(),
            rows_marked_processed: updates.len(),
            duplicates_dropped: duplicates,
        };
        info!(
            added = report.rows_added,
            marked = report.rows_marked_processed,
            duplicates = report.duplicates_dropped,
            "Cleaning pass finished"
        );
        Ok(report)
    }
}

fn require_column(table: &Table, table_name: &str, column: &str) -> Result<usize, ConfigError> {
    table
        .column_index(column)
        .ok_or_else(|| ConfigError::MissingColumn {
            table: table_name.to_string(),
            column: column.to_string(),
        })
}

/// Copy a raw row at full header width and append its vendor tier.
fn enrich(raw_row: &Row, width: usize, tier_idx: usize, cleaning: &CleaningConfig) -> Row {
    let mut row = raw_row.clone();
    row.resize(width.max(row.len()), Cell::Empty);
    let tier = vendor_tier(row.get(tier_idx), cleaning);
    row.push(Cell::Text(tier));
    row
}

/// Exact lookup on the trimmed tier cell; anything else is `N/A`.
pub fn vendor_tier(tier_cell: Option<&Cell>, cleaning: &CleaningConfig) -> String {
    let key = tier_cell.map(Cell::display).unwrap_or_default();
    cleaning
        .tier_map
        .get(key.trim())
        .cloned()
        .unwrap_or_else(|| UNMAPPED_TIER.to_string())
}

/// Status text written to processed raw rows.
pub fn processed_stamp(now: DateTime<Utc>) -> String {
    format!("Processed on {}", now.format("%Y-%m-%d %H:%M:%S UTC"))
}
