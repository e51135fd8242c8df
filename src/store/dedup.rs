//! Administrative duplicate removal.
//!
//! Rewrites a table keeping only the first row of each signature. The regular
//! pipeline never rewrites tables; this exists for operators cleaning up
//! after a bad import.

use serde::Serialize;
use tracing::info;

use crate::error::StoreError;
use crate::store::traits::TableStore;
use crate::table::signature::{SignatureSet, SignatureSpec};

/// What a dedup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub kept: usize,
    pub removed: usize,
}

/// Remove duplicate rows from `table`, comparing every column after the first
/// `prefix_width` columns. First occurrences win and order is preserved.
///
/// A table with no duplicates is left untouched.
pub async fn remove_duplicates(
    store: &dyn TableStore,
    table: &str,
    prefix_width: usize,
) -> Result<DedupReport, StoreError> {
    let current = store.read_table(table).await?;
    if !current.has_data() {
        info!(table = %table, "No rows to deduplicate");
        return Ok(DedupReport::default());
    }

    let spec = SignatureSpec::data_columns(prefix_width);
    let mut seen = SignatureSet::new();
    let kept: Vec<_> = current
        .rows
        .iter()
        .filter(|row| seen.insert(spec.signature(row)))
        .cloned()
        .collect();

    let report = DedupReport {
        kept: kept.len(),
        removed: current.rows.len() - kept.len(),
    };

    if report.removed > 0 {
        store.rewrite_table(table, &current.header, &kept).await?;
    }
    info!(
        table = %table,
        kept = report.kept,
        removed = report.removed,
        "Duplicate removal complete"
    );
    Ok(report)
}
