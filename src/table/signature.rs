//! Structural row identity.
//!
//! A [`Signature`] is the ordered list of normalized cells in the compared
//! columns. Two rows are the same record iff their signatures are equal;
//! there is no other notion of row identity. The full normalized values are
//! kept, so set membership is exact rather than hash-approximate.

use std::collections::HashSet;

use tracing::warn;

use super::{Cell, normalize};

/// Normalized, order-preserving composite key over a row's compared columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<String>);

impl Signature {
    pub fn values(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    /// Every column from the prefix boundary to the end of the row.
    DataColumns,
    /// Explicit positions, in the order they were named.
    Positions(Vec<usize>),
    /// Names were given but none resolved; duplicate checking is off.
    NoComparableColumns,
}

/// Which columns of a row participate in its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSpec {
    prefix_width: usize,
    selection: Selection,
}

impl SignatureSpec {
    /// Compare every data column after the metadata prefix.
    pub fn data_columns(prefix_width: usize) -> Self {
        Self {
            prefix_width,
            selection: Selection::DataColumns,
        }
    }

    /// Resolve named columns against a header.
    ///
    /// An empty name list means "all data columns". Names not in the header,
    /// or that land inside the metadata prefix, are dropped with a warning.
    pub fn resolve(header: &[String], names: &[String], prefix_width: usize) -> Self {
        if names.is_empty() {
            return Self::data_columns(prefix_width);
        }

        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            match header.iter().position(|h| h == name) {
                Some(idx) if idx < prefix_width => {
                    warn!(column = %name, "Signature column is a metadata column; ignoring");
                }
                Some(idx) => positions.push(idx),
                None => {
                    warn!(column = %name, "Signature column not found in header; ignoring");
                }
            }
        }

        let selection = if positions.is_empty() {
            warn!("No comparable columns for duplicate check; every row is treated as unique");
            Selection::NoComparableColumns
        } else {
            Selection::Positions(positions)
        };

        Self {
            prefix_width,
            selection,
        }
    }

    pub fn has_comparable_columns(&self) -> bool {
        self.selection != Selection::NoComparableColumns
    }

    /// Compute a row's signature, or `None` when nothing is comparable.
    ///
    /// Named positions past the end of the row are skipped, so a shorter row
    /// yields a shorter signature and never matches a longer one.
    pub fn signature(&self, row: &[Cell]) -> Option<Signature> {
        let values = match &self.selection {
            Selection::NoComparableColumns => return None,
            Selection::DataColumns => row
                .iter()
                .skip(self.prefix_width)
                .map(normalize)
                .collect(),
            Selection::Positions(positions) => positions
                .iter()
                .filter_map(|&idx| row.get(idx))
                .map(normalize)
                .collect(),
        };
        Some(Signature(values))
    }
}

/// The set of signatures seen so far in one run.
#[derive(Debug, Default)]
pub struct SignatureSet {
    seen: HashSet<Signature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from existing rows.
    pub fn from_rows<'a>(spec: &SignatureSpec, rows: impl IntoIterator<Item = &'a Vec<Cell>>) -> Self {
        let seen = rows
            .into_iter()
            .filter_map(|row| spec.signature(row))
            .collect();
        Self { seen }
    }

    /// Record a signature. Returns `true` if the row is new.
    ///
    /// `None` (no comparable columns) is always new and never recorded.
    pub fn insert(&mut self, signature: Option<Signature>) -> bool {
        match signature {
            Some(sig) => self.seen.insert(sig),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
