//! Inbound side: where attachments come from.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FetchConfig;
use crate::error::ChannelError;

/// One file attached to a source message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    /// MIME type as reported by the source, e.g. `text/csv`.
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// `.csv` by name (any case) or `text/csv` by type.
    pub fn is_csv(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".csv")
            || mime_is(&self.content_type, "text/csv")
    }

    /// `.pdf` by name (any case) or `application/pdf` by type.
    pub fn is_pdf(&self) -> bool {
        self.filename.to_ascii_lowercase().ends_with(".pdf")
            || mime_is(&self.content_type, "application/pdf")
    }

    /// Contents decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn mime_is(content_type: &str, expected: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case(expected))
}

/// One fetchable unit: a message and everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Source-specific identifier used to mark the unit as fetched.
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

/// Search bounds for one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    /// Oldest acceptable `received_at`.
    pub since: DateTime<Utc>,
    pub max_messages: usize,
    /// Units carrying this marker are excluded.
    pub processed_label: String,
}

impl FetchQuery {
    /// Bounds relative to `now`.
    pub fn from_config(config: &FetchConfig, now: DateTime<Utc>) -> Self {
        Self {
            since: now - Duration::days(i64::from(config.window_days)),
            max_messages: config.max_messages,
            processed_label: config.processed_label.clone(),
        }
    }
}

/// Inbound message queue.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Unmarked messages within the query bounds, oldest first.
    async fn fetch_unprocessed(&self, query: &FetchQuery)
    -> Result<Vec<SourceMessage>, ChannelError>;

    /// Apply `label` to one message so it is never fetched again.
    async fn mark_fetched(&self, id: &str, label: &str) -> Result<(), ChannelError>;

    /// Remove `label` from up to `max` messages. Returns how many were cleared.
    async fn clear_fetched_marks(&self, label: &str, max: usize) -> Result<usize, ChannelError>;

    /// Check that the source is reachable.
    async fn health_check(&self) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn csv_detected_by_name_or_type() {
        assert!(Attachment::new("orders.CSV", "application/octet-stream", "").is_csv());
        assert!(Attachment::new("export", "text/csv; charset=utf-8", "").is_csv());
        assert!(!Attachment::new("orders.xlsx", "application/vnd.ms-excel", "").is_csv());
    }

    #[test]
    fn pdf_detected_by_name_or_type() {
        assert!(Attachment::new("label.pdf", "", "").is_pdf());
        assert!(Attachment::new("scan", "Application/PDF", "").is_pdf());
        assert!(!Attachment::new("orders.csv", "text/csv", "").is_pdf());
    }

    #[test]
    fn text_is_lossy() {
        let att = Attachment::new("a.csv", "text/csv", vec![b'o', b'k', 0xff]);
        assert_eq!(att.text(), "ok\u{fffd}");
    }

    #[test]
    fn query_window_counts_back_from_now() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let query = FetchQuery::from_config(&FetchConfig::default(), now);
        assert_eq!(query.since, Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap());
        assert_eq!(query.max_messages, 10);
        assert_eq!(query.processed_label, "CSV_Processed");
    }
}
