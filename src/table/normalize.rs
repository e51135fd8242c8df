//! Canonical string form of a cell for equality comparison.
//!
//! Two cells that business rules treat as the same record value normalize to
//! the same string: `"7"`, `"7.0"`, ` 7 ` and `7` all become `"7"`, and dates
//! become their UTC instant regardless of how they were displayed.

use chrono::{DateTime, SecondsFormat, Utc};

use super::Cell;

/// Normalize one cell.
pub fn normalize(cell: &Cell) -> String {
    match cell {
        Cell::Empty => String::new(),
        Cell::Date(d) => format_instant(d),
        Cell::Number(n) => format_number(*n),
        Cell::Text(s) => normalize_text(s),
    }
}

/// Trim, then collapse numeric-looking text to its float form.
pub fn normalize_text(raw: &str) -> String {
    let trimmed = raw.trim();
    match parse_number(trimmed) {
        Some(n) => format_number(n),
        None => trimmed.to_string(),
    }
}

/// Parse finite numbers only; `inf` and `NaN` stay text.
fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Shortest round-tripping decimal form, with negative zero folded to `0`.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    format!("{n}")
}

/// ISO-8601 UTC instant with millisecond precision, e.g. `2026-10-16T08:30:00.000Z`.
pub fn format_instant(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Millis, true)
}
