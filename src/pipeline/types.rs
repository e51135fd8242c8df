//! Stage reports.

use serde::Serialize;

// ── Ingestion ───────────────────────────────────────────────────────

/// Counts from one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub messages_fetched: usize,
    pub messages_marked: usize,
    pub attachments_ingested: usize,
    /// CSVs skipped for a header mismatch or for having no data rows.
    pub attachments_skipped: usize,
    pub rows_appended: usize,
    pub pdfs_extracted: usize,
    /// PDFs stored with an error placeholder instead of text.
    pub pdf_failures: usize,
}

// ── Cleaning ────────────────────────────────────────────────────────

/// Counts from one cleaning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub rows_added: usize,
    pub rows_marked_processed: usize,
    pub duplicates_dropped: usize,
}

// ── Export ──────────────────────────────────────────────────────────

/// What happened to one group's dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    /// Delivered, but the log row could not be written.
    SentNotLogged(String),
    Failed(String),
}

/// Outcome for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub key: String,
    pub artifact_name: String,
    pub row_count: usize,
    pub status: DispatchStatus,
}

impl GroupOutcome {
    /// True if the artifact reached the delivery channel.
    pub fn delivered(&self) -> bool {
        !matches!(self.status, DispatchStatus::Failed(_))
    }
}

/// Per-group outcomes of one export pass, in first-seen group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub groups: Vec<GroupOutcome>,
}

impl ExportReport {
    pub fn delivered(&self) -> usize {
        self.groups.iter().filter(|g| g.delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.groups.len() - self.delivered()
    }

    pub fn unlogged(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g.status, DispatchStatus::SentNotLogged(_)))
            .count()
    }
}

// ── Orchestrated run ────────────────────────────────────────────────

/// Reports of every stage that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub clean: CleanReport,
    pub export: ExportReport,
}

/// Result of a configuration check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// `(table, problem)` for every table that could not be read.
    pub table_problems: Vec<(String, String)>,
    /// `None` when no source is configured or it answered.
    pub source_problem: Option<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.table_problems.is_empty() && self.source_problem.is_none()
    }
}
