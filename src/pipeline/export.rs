//! Grouping and export: one CSV per sender group, sent and logged.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::channels::delivery::{Delivery, OutboundAttachment, OutboundMessage};
use crate::config::{PipelineConfig, ReportConfig};
use crate::error::{ConfigError, PipelineError};
use crate::pipeline::types::{DispatchStatus, ExportReport, GroupOutcome};
use crate::store::TableStore;
use crate::table::{Cell, Row, Table, csv};

/// Header of the delivery log.
pub const LOG_COLUMNS: [&str; 5] = [
    "Timestamp",
    "Recipient",
    "Subject",
    "Attachment Name",
    "Row Count",
];

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern"));

/// Replace everything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_key(key: &str) -> String {
    UNSAFE_CHARS.replace_all(key, "_").into_owned()
}

/// `<sanitized-key>_<yyyy-MM-dd_HH-mm>.csv`
pub fn artifact_name(key: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", sanitize_key(key), now.format("%Y-%m-%d_%H-%M"))
}

/// One group of clean rows sharing a trimmed grouping value.
#[derive(Debug, Clone, PartialEq)]
pub struct Group<'a> {
    pub key: String,
    pub rows: Vec<&'a Row>,
}

/// Partition rows by the trimmed value at `key_idx`.
///
/// Groups come out in first-seen order and rows keep their table order.
/// Rows whose key is empty after trimming belong to no group.
pub fn partition(rows: &[Row], key_idx: usize) -> Vec<Group<'_>> {
    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let key = row
            .get(key_idx)
            .map(|c| c.display().trim().to_string())
            .unwrap_or_default();
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(&i) => groups[i].rows.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(Group {
                    key,
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

/// Export column names: every non-empty cell of the first column, header
/// cell included.
pub fn export_columns(table: &Table) -> Vec<String> {
    table
        .header
        .first()
        .cloned()
        .into_iter()
        .chain(table.rows.iter().map(|r| r.first().map(Cell::display).unwrap_or_default()))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Subject and body for one group.
pub fn compose(report: &ReportConfig, key: &str, row_count: usize, now: DateTime<Utc>) -> (String, String) {
    let subject = format!("{}: {key}", report.subject_prefix);
    let body = format!(
        "Hello,\n\n\
         Please find attached the CSV with shipping label details for the customer: {key}\n\
         Please generate {row_count} labels accordingly.\n\n\
         Best regards,\n\
         {signature}\n\n\
         ---\n\
         Auto-generated message\n\
         - Sender: {key}\n\
         - Number of labels: {row_count}\n\
         - Export date: {date}",
        signature = report.signature,
        date = now.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    (subject, body)
}

/// Partitions the clean table and sends one artifact per group.
pub struct Exporter {
    store: Arc<dyn TableStore>,
    delivery: Arc<dyn Delivery>,
    config: Arc<PipelineConfig>,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn TableStore>,
        delivery: Arc<dyn Delivery>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            delivery,
            config,
        }
    }

    /// Build, send, and log every group's export.
    pub async fn generate_and_send_reports(&self) -> Result<ExportReport, PipelineError> {
        self.generate_and_send_reports_at(Utc::now()).await
    }

    /// As [`Exporter::generate_and_send_reports`], timestamped `now`.
    pub async fn generate_and_send_reports_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ExportReport, PipelineError> {
        let tables = &self.config.tables;
        let report_cfg = &self.config.report;

        let columns_table = self.store.read_table(&tables.export_columns).await?;
        let wanted = export_columns(&columns_table);
        if wanted.is_empty() {
            info!(table = %tables.export_columns, "No export columns configured");
            return Ok(ExportReport::default());
        }

        let clean = self.store.read_table(&tables.clean).await?;
        if !clean.has_data() {
            info!(table = %tables.clean, "No clean data to export");
            return Ok(ExportReport::default());
        }

        let key_idx = clean
            .column_index(&report_cfg.grouping_column)
            .ok_or_else(|| ConfigError::MissingColumn {
                table: tables.clean.clone(),
                column: report_cfg.grouping_column.clone(),
            })?;
        if report_cfg.recipient.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "LABEL_RELAY_RECIPIENT".into(),
                message: "no export recipient configured".into(),
            }
            .into());
        }

        let (names, positions): (Vec<String>, Vec<usize>) = wanted
            .into_iter()
            .filter_map(|name| match clean.column_index(&name) {
                Some(idx) => Some((name, idx)),
                None => {
                    debug!(column = %name, "Export column not in clean table; dropping");
                    None
                }
            })
            .unzip();
        if positions.is_empty() {
            warn!("None of the export columns exist in the clean table");
            return Ok(ExportReport::default());
        }

        let groups = partition(&clean.rows, key_idx);
        info!(groups = groups.len(), rows = clean.rows.len(), "Exporting groups");

        let mut report = ExportReport::default();
        for group in &groups {
            report
                .groups
                .push(self.dispatch(group, &names, &positions, now).await);
        }

        info!(
            sent = report.delivered(),
            failed = report.failed(),
            unlogged = report.unlogged(),
            "Export pass finished"
        );
        Ok(report)
    }

    /// Project, send, and log one group. Never fails the pass.
    async fn dispatch(
        &self,
        group: &Group<'_>,
        names: &[String],
        positions: &[usize],
        now: DateTime<Utc>,
    ) -> GroupOutcome {
        let report_cfg = &self.config.report;

        let projected: Vec<Row> = group
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        let name = artifact_name(&group.key, now);
        let mut outcome = GroupOutcome {
            key: group.key.clone(),
            artifact_name: name.clone(),
            row_count: projected.len(),
            status: DispatchStatus::Sent,
        };

        let content = match csv::serialize(names, &projected, report_cfg.delimiter) {
            Ok(content) => content,
            Err(e) => {
                error!(group = %group.key, error = %e, "Failed to encode export");
                outcome.status = DispatchStatus::Failed(format!("CSV encoding failed: {e}"));
                return outcome;
            }
        };
        let (subject, body) = compose(report_cfg, &group.key, projected.len(), now);

        let message = OutboundMessage {
            recipient: report_cfg.recipient.clone(),
            subject: subject.clone(),
            body,
            display_name: report_cfg.display_name.clone(),
            attachment: OutboundAttachment {
                name: name.clone(),
                content_type: "text/csv".to_string(),
                bytes: content.into_bytes(),
            },
        };

        if let Err(e) = self.delivery.send(&message).await {
            error!(group = %group.key, error = %e, "Failed to send export");
            outcome.status = DispatchStatus::Failed(e.to_string());
            return outcome;
        }

        let log_header: Vec<String> = LOG_COLUMNS.iter().map(|s| s.to_string()).collect();
        let log_row = vec![
            Cell::Date(now),
            Cell::text(report_cfg.recipient.as_str()),
            Cell::Text(subject),
            Cell::Text(name),
            Cell::from(projected.len()),
        ];
        if let Err(e) = self
            .store
            .append_rows(&self.config.tables.mail_log, Some(&log_header), &[log_row])
            .await
        {
            error!(group = %group.key, error = %e, "Export sent but not logged");
            outcome.status = DispatchStatus::SentNotLogged(e.to_string());
            return outcome;
        }

        info!(
            group = %group.key,
            rows = outcome.row_count,
            attachment = %outcome.artifact_name,
            "Export sent"
        );
        outcome
    }
}
