//! Configuration types.
//!
//! Every engine takes a `PipelineConfig` value; nothing reads global state.
//! `Default` carries the production constants and `from_env()` applies
//! `LABEL_RELAY_*` overrides on top.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::table::STATUS_COLUMN;

/// Names of the tables the pipeline reads and writes.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub raw: String,
    pub clean: String,
    /// Single-column table listing the export columns.
    pub export_columns: String,
    pub mail_log: String,
    /// Destination for OCR'd PDF attachments.
    pub pdf: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            raw: "Raw Data".to_string(),
            clean: "Clean Data".to_string(),
            export_columns: "Cols to Send".to_string(),
            mail_log: "Mail Log".to_string(),
            pdf: "PDF Data".to_string(),
        }
    }
}

impl TableNames {
    /// Every configured table, in pipeline order.
    pub fn all(&self) -> [&str; 5] {
        [
            &self.raw,
            &self.clean,
            &self.export_columns,
            &self.mail_log,
            &self.pdf,
        ]
    }
}

/// Source search parameters.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Only messages newer than this many days are fetched.
    pub window_days: u32,
    /// Marker applied to fetched messages.
    pub processed_label: String,
    pub max_messages: usize,
    pub delimiter: char,
    /// Skip attachments whose headers disagree with the raw table.
    pub header_validation: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            window_days: 2,
            processed_label: "CSV_Processed".to_string(),
            max_messages: 10,
            delimiter: ',',
            header_validation: true,
        }
    }
}

/// Cleaning and enrichment settings.
#[derive(Debug, Clone)]
pub struct CleaningConfig {
    pub status_column: String,
    pub tier_column: String,
    /// Tier name to vendor grade. Keys match the trimmed tier cell exactly.
    pub tier_map: HashMap<String, String>,
    pub duplicate_check: bool,
    /// Signature columns. Empty means every data column.
    pub duplicate_check_columns: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        let tier_map = [
            ("TIER 1", "A"),
            ("TIER 2", "B"),
            ("TIER 3", "C"),
            ("TIER 4", "C"),
            ("TIER 5", "D"),
            ("TIER 6", "D"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            status_column: STATUS_COLUMN.to_string(),
            tier_column: "Tier".to_string(),
            tier_map,
            duplicate_check: true,
            duplicate_check_columns: Vec::new(),
        }
    }
}

/// Export and delivery settings.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub grouping_column: String,
    pub recipient: String,
    pub display_name: String,
    /// Subject is `"{subject_prefix}: {group}"`.
    pub subject_prefix: String,
    /// Closing line of the message body.
    pub signature: String,
    pub delimiter: char,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            grouping_column: "Sender".to_string(),
            recipient: String::new(),
            display_name: "Data Export System".to_string(),
            subject_prefix: "Shipping Label for customer".to_string(),
            signature: "Label Relay".to_string(),
            delimiter: ',',
        }
    }
}

/// PDF OCR settings.
#[derive(Debug, Clone)]
pub struct PdfConfig {
    pub enabled: bool,
    pub ocr_language: String,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ocr_language: "en".to_string(),
        }
    }
}

/// Where the durable table store lives.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/label-relay.db"),
        }
    }
}

/// Single-run lock settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub path: PathBuf,
    /// A lock older than this is considered abandoned.
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/label-relay.lock"),
            stale_after: Duration::from_secs(30 * 60), // 30 minutes
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub tables: TableNames,
    pub fetch: FetchConfig,
    pub cleaning: CleaningConfig,
    pub report: ReportConfig,
    pub pdf: PdfConfig,
    pub store: StoreConfig,
    pub lock: LockConfig,
}

impl PipelineConfig {
    /// Defaults overridden by `LABEL_RELAY_*` environment variables.
    ///
    /// Unparseable numbers and flags fall back to their defaults; a malformed
    /// tier map is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let t = &mut cfg.tables;
        t.raw = env_string("LABEL_RELAY_RAW_TABLE", &t.raw);
        t.clean = env_string("LABEL_RELAY_CLEAN_TABLE", &t.clean);
        t.export_columns = env_string("LABEL_RELAY_EXPORT_COLUMNS_TABLE", &t.export_columns);
        t.mail_log = env_string("LABEL_RELAY_MAIL_LOG_TABLE", &t.mail_log);
        t.pdf = env_string("LABEL_RELAY_PDF_TABLE", &t.pdf);

        let f = &mut cfg.fetch;
        f.window_days = env_parse("LABEL_RELAY_WINDOW_DAYS", f.window_days);
        f.processed_label = env_string("LABEL_RELAY_PROCESSED_LABEL", &f.processed_label);
        f.max_messages = env_parse("LABEL_RELAY_MAX_MESSAGES", f.max_messages);
        f.delimiter = check_delimiter(env_parse("LABEL_RELAY_DELIMITER", f.delimiter))?;
        f.header_validation = env_parse("LABEL_RELAY_HEADER_VALIDATION", f.header_validation);

        let c = &mut cfg.cleaning;
        c.tier_column = env_string("LABEL_RELAY_TIER_COLUMN", &c.tier_column);
        if let Ok(raw) = std::env::var("LABEL_RELAY_TIER_MAP") {
            c.tier_map = parse_tier_map(&raw)?;
        }
        c.duplicate_check = env_parse("LABEL_RELAY_DUPLICATE_CHECK", c.duplicate_check);
        c.duplicate_check_columns = env_list("LABEL_RELAY_DUPLICATE_CHECK_COLUMNS");

        let r = &mut cfg.report;
        r.grouping_column = env_string("LABEL_RELAY_GROUPING_COLUMN", &r.grouping_column);
        r.recipient = env_string("LABEL_RELAY_RECIPIENT", &r.recipient);
        r.display_name = env_string("LABEL_RELAY_DISPLAY_NAME", &r.display_name);
        r.subject_prefix = env_string("LABEL_RELAY_SUBJECT_PREFIX", &r.subject_prefix);
        r.signature = env_string("LABEL_RELAY_SIGNATURE", &r.signature);
        r.delimiter = cfg.fetch.delimiter;

        cfg.pdf.enabled = env_parse("LABEL_RELAY_PDF_ENABLED", cfg.pdf.enabled);
        cfg.pdf.ocr_language = env_string("LABEL_RELAY_OCR_LANGUAGE", &cfg.pdf.ocr_language);

        if let Ok(path) = std::env::var("LABEL_RELAY_DB_PATH") {
            cfg.store.path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("LABEL_RELAY_LOCK_PATH") {
            cfg.lock.path = PathBuf::from(path);
        }
        let stale_secs = env_parse(
            "LABEL_RELAY_LOCK_STALE_SECS",
            cfg.lock.stale_after.as_secs(),
        );
        cfg.lock.stale_after = Duration::from_secs(stale_secs);

        Ok(cfg)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// The CSV codec works on single bytes.
fn check_delimiter(delimiter: char) -> Result<char, ConfigError> {
    if delimiter.is_ascii() {
        Ok(delimiter)
    } else {
        Err(ConfigError::InvalidValue {
            key: "LABEL_RELAY_DELIMITER".into(),
            message: format!("{delimiter:?} is not an ASCII character"),
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `"TIER 1=A,TIER 2=B"` into a tier map.
pub fn parse_tier_map(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (tier, grade) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "LABEL_RELAY_TIER_MAP".into(),
                message: format!("expected TIER=GRADE, got \"{pair}\""),
            })?;
            Ok((tier.trim().to_string(), grade.trim().to_string()))
        })
        .collect()
}
