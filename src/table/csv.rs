//! Delimited text codec over the `csv` crate.
//!
//! Parsing is lenient in the way attachment CSVs need: records may differ in
//! width, every field is trimmed, and blank lines vanish. Serialization quotes
//! only the fields that need it.

use ::csv::{QuoteStyle, ReaderBuilder, Terminator, Trim, WriterBuilder};
use tracing::warn;

use super::Cell;

pub const DEFAULT_DELIMITER: char = ',';

/// Parse delimited text into records of string fields.
///
/// A leading BOM is ignored. Records that hold nothing but one empty field
/// (whitespace-only lines) are dropped. `delimiter` must be ASCII.
pub fn parse(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        match result {
            Ok(record) => {
                if record.len() == 1 && record[0].is_empty() {
                    continue;
                }
                records.push(record.iter().map(str::to_string).collect());
            }
            Err(e) => {
                warn!(error = %e, "Stopping at malformed CSV record");
                break;
            }
        }
    }
    records
}

/// Serialize a header and rows, one `\n`-terminated record each.
pub fn serialize(
    header: &[String],
    rows: &[Vec<Cell>],
    delimiter: char,
) -> Result<String, ::csv::Error> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter as u8)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row.iter().map(Cell::display))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ::csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
