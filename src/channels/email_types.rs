//! Email-specific helpers: MIME parsing into `SourceMessage`s and IMAP
//! response parsing. Pure functions, no I/O.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::channels::source::{Attachment, SourceMessage};

/// Parse a raw RFC 822 message into a `SourceMessage` keyed by `id`.
///
/// Returns `None` if the bytes are not a parseable message.
pub fn parse_source_message(id: &str, raw: &[u8]) -> Option<SourceMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let attachments = parsed
        .attachments()
        .map(|part| {
            let filename = MimeHeaders::attachment_name(part)
                .unwrap_or("attachment")
                .to_string();
            let content_type = MimeHeaders::content_type(part)
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Attachment {
                filename,
                content_type,
                data: part.contents().to_vec(),
            }
        })
        .collect();

    Some(SourceMessage {
        id: id.to_string(),
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        received_at,
        attachments,
    })
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// IMAP `SINCE` date, e.g. `14-Oct-2026`.
pub fn imap_date(d: DateTime<Utc>) -> String {
    d.format("%d-%b-%Y").to_string()
}

/// Quote a string for use as an IMAP quoted argument.
pub fn imap_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Collect ids from `* SEARCH` untagged responses.
pub fn parse_search_ids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// Byte count of a literal announced at the end of a response line (`... {123}`).
pub fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let rest = line.strip_suffix('}')?;
    let open = rest.rfind('{')?;
    rest[open + 1..].parse().ok()
}

/// True if `line` is the tagged completion for `tag` with status OK.
pub fn is_tagged_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .map(str::trim_start)
        .is_some_and(|rest| rest.starts_with("OK"))
}
