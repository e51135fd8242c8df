//! Raw ingestion: fetch attachments and append them to the raw table.
//!
//! Flow per source message:
//! 1. Every CSV attachment is parsed and its rows are appended behind the
//!    status and provenance columns.
//! 2. PDF attachments are OCR'd into one row of the PDF table when an
//!    extractor is configured.
//! 3. The message is marked fetched, after all its attachments are stored.
//!
//! A store failure aborts the pass before the current message is marked, so
//! the message is fetched again next time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::channels::source::{Attachment, FetchQuery, MessageSource, SourceMessage};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::{ScratchDocuments, extract_pdf_text, extraction_placeholder};
use crate::pipeline::types::IngestReport;
use crate::store::TableStore;
use crate::table::{Cell, METADATA_PREFIX_WIDTH, Row, csv, normalize, raw_header};

/// Header of the PDF table.
pub const PDF_COLUMNS: [&str; 5] = [
    "Email Subject",
    "Sender",
    "Email Date",
    "PDF Filename",
    "Extracted Text",
];

/// What became of one CSV attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvOutcome {
    Appended(usize),
    NoDataRows,
    HeaderMismatch,
}

/// Fetches source messages and writes the raw table.
pub struct Ingestor {
    store: Arc<dyn TableStore>,
    source: Arc<dyn MessageSource>,
    extractor: Option<Arc<dyn ScratchDocuments>>,
    config: Arc<PipelineConfig>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn TableStore>,
        source: Arc<dyn MessageSource>,
        extractor: Option<Arc<dyn ScratchDocuments>>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            source,
            extractor,
            config,
        }
    }

    /// Run one ingestion pass.
    pub async fn ingest(&self) -> Result<IngestReport, PipelineError> {
        self.ingest_at(Utc::now()).await
    }

    /// Run one ingestion pass with the fetch window anchored at `now`.
    pub async fn ingest_at(&self, now: DateTime<Utc>) -> Result<IngestReport, PipelineError> {
        let query = FetchQuery::from_config(&self.config.fetch, now);
        let messages = self.source.fetch_unprocessed(&query).await?;

        let mut report = IngestReport {
            messages_fetched: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            info!(source = self.source.name(), "No new messages to ingest");
            return Ok(report);
        }
        info!(count = messages.len(), "Ingesting messages");

        // Data headers already in the raw table, cached across attachments.
        let mut known_headers = self.existing_data_headers().await?;

        for message in &messages {
            for attachment in &message.attachments {
                if attachment.is_csv() {
                    match self
                        .write_csv(message, attachment, &mut known_headers)
                        .await?
                    {
                        CsvOutcome::Appended(rows) => {
                            report.attachments_ingested += 1;
                            report.rows_appended += rows;
                        }
                        CsvOutcome::NoDataRows | CsvOutcome::HeaderMismatch => {
                            report.attachments_skipped += 1;
                        }
                    }
                } else if attachment.is_pdf() {
                    if let Some(extracted) = self.write_pdf(message, attachment).await? {
                        if extracted {
                            report.pdfs_extracted += 1;
                        } else {
                            report.pdf_failures += 1;
                        }
                    }
                } else {
                    debug!(filename = %attachment.filename, "Ignoring attachment");
                }
            }

            self.source
                .mark_fetched(&message.id, &self.config.fetch.processed_label)
                .await?;
            report.messages_marked += 1;
        }

        Ok(report)
    }

    async fn existing_data_headers(&self) -> Result<Option<Vec<String>>, PipelineError> {
        let raw = self.store.read_table(&self.config.tables.raw).await?;
        if raw.header.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            raw.header.iter().skip(METADATA_PREFIX_WIDTH).cloned().collect(),
        ))
    }

    /// Raw Store Writer: append one CSV attachment's rows.
    async fn write_csv(
        &self,
        message: &SourceMessage,
        attachment: &Attachment,
        known_headers: &mut Option<Vec<String>>,
    ) -> Result<CsvOutcome, PipelineError> {
        let mut records = csv::parse(&attachment.text(), self.config.fetch.delimiter).into_iter();
        let Some(headers) = records.next() else {
            warn!(filename = %attachment.filename, "CSV attachment is empty");
            return Ok(CsvOutcome::NoDataRows);
        };
        let data: Vec<Vec<String>> = records.collect();
        if data.is_empty() {
            warn!(filename = %attachment.filename, "CSV attachment has no data rows");
            return Ok(CsvOutcome::NoDataRows);
        }

        if self.config.fetch.header_validation
            && let Some(existing) = known_headers.as_ref()
            && !headers_match(existing, &headers)
        {
            warn!(
                filename = %attachment.filename,
                sender = %message.sender,
                expected = ?existing,
                actual = ?headers,
                "CSV headers do not match the raw table; skipping attachment"
            );
            return Ok(CsvOutcome::HeaderMismatch);
        }

        let rows = build_raw_rows(message, &attachment.filename, &headers, data);
        let count = rows.len();
        let full_header = raw_header(&headers);
        self.store
            .append_rows(&self.config.tables.raw, Some(&full_header), &rows)
            .await?;

        if known_headers.is_none() {
            *known_headers = Some(headers);
        }
        info!(
            filename = %attachment.filename,
            sender = %message.sender,
            rows = count,
            "Appended CSV rows to raw table"
        );
        Ok(CsvOutcome::Appended(count))
    }

    /// Append one OCR'd PDF row. `None` when PDF handling is off; otherwise
    /// whether extraction succeeded.
    async fn write_pdf(
        &self,
        message: &SourceMessage,
        attachment: &Attachment,
    ) -> Result<Option<bool>, PipelineError> {
        let Some(extractor) = self.extractor.as_ref().filter(|_| self.config.pdf.enabled) else {
            debug!(filename = %attachment.filename, "PDF extraction not configured; ignoring");
            return Ok(None);
        };

        let (text, extracted) = match extract_pdf_text(
            extractor.as_ref(),
            &attachment.filename,
            &attachment.data,
            &self.config.pdf.ocr_language,
        )
        .await
        {
            Ok(text) => (text, true),
            Err(e) => {
                warn!(filename = %attachment.filename, error = %e, "PDF text extraction failed");
                (extraction_placeholder(&e), false)
            }
        };

        let header: Vec<String> = PDF_COLUMNS.iter().map(|s| s.to_string()).collect();
        let row = vec![
            Cell::text(message.subject.as_str()),
            Cell::text(message.sender.as_str()),
            Cell::Date(message.received_at),
            Cell::text(attachment.filename.as_str()),
            Cell::Text(text),
        ];
        self.store
            .append_rows(&self.config.tables.pdf, Some(&header), &[row])
            .await?;
        Ok(Some(extracted))
    }
}

/// Positional, normalized header comparison.
fn headers_match(existing: &[String], incoming: &[String]) -> bool {
    existing.len() == incoming.len()
        && existing
            .iter()
            .zip(incoming)
            .all(|(a, b)| normalize::normalize_text(a) == normalize::normalize_text(b))
}

/// Prefix each data record with an empty status and its provenance.
///
/// `Original Row` is the record's line in the source file, counting the
/// header as line 1. Records wider than the header are dropped with a warning.
fn build_raw_rows(
    message: &SourceMessage,
    filename: &str,
    headers: &[String],
    data: Vec<Vec<String>>,
) -> Vec<Row> {
    data.into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let original_row = index + 2;
            if record.len() > headers.len() {
                warn!(
                    filename = %filename,
                    row = original_row,
                    width = record.len(),
                    expected = headers.len(),
                    "CSV record wider than its header; dropping"
                );
                return None;
            }
            let mut row: Row = Vec::with_capacity(METADATA_PREFIX_WIDTH + headers.len());
            row.push(Cell::Empty);
            row.push(Cell::Date(message.received_at));
            row.push(Cell::text(message.sender.as_str()));
            row.push(Cell::text(message.subject.as_str()));
            row.push(Cell::text(filename));
            row.push(Cell::from(original_row));
            row.extend(record.into_iter().map(Cell::Text));
            Some(row)
        })
        .collect()
}
