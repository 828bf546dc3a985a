//! RFC 5322 header handling: folding, field lookup, date parsing, and the
//! metadata pass that fills flags and fingerprints into parsed records.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{MessageRecord, MsgFlags};
use crate::parser::line::{is_blank, is_separator, split_lines};
use crate::parser::mbox::read_range_from;

/// Header-derived metadata for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMeta {
    pub envelope_sender: Option<String>,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
    pub flags: MsgFlags,
}

/// One header field as it appears on disk, continuation lines included.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField<'a> {
    /// Field name without the colon, as written.
    pub name: &'a [u8],
    /// The field's lines, terminators included.
    pub lines: Vec<&'a [u8]>,
}

impl RawField<'_> {
    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.as_bytes())
    }
}

/// Fill `message_id`, `envelope_sender`, flags and listing fields of every
/// record by reading its header block from `file`.
///
/// Both `current_flags` and `baseline_flags` are set to what the headers say.
pub fn annotate_records(file: &mut File, path: &Path, records: &mut [MessageRecord]) -> Result<()> {
    for record in records.iter_mut() {
        let raw = read_range_from(file, path, record.header_offset, record.header_len())?;
        let meta = parse_header_block(&raw);
        record.envelope_sender = meta.envelope_sender;
        record.message_id = meta.message_id;
        record.subject = meta.subject;
        record.from = meta.from;
        record.date = meta.date;
        record.current_flags = meta.flags;
        record.baseline_flags = meta.flags;
    }
    debug!(path = %path.display(), count = records.len(), "Annotated records");
    Ok(())
}

/// Extract metadata from a raw header block (separator line first).
pub fn parse_header_block(raw: &[u8]) -> HeaderMeta {
    let mut lines = split_lines(raw);
    let mut meta = HeaderMeta {
        flags: MsgFlags::fresh(),
        ..HeaderMeta::default()
    };

    let rest = match lines.next() {
        Some(first) if is_separator(first) => {
            meta.envelope_sender = envelope_sender(first);
            &raw[first.len()..]
        }
        _ => raw,
    };

    let text = decode_header_bytes(rest);
    let headers = unfold_headers(&text);

    meta.message_id = get_header(&headers, "message-id")
        .map(|s| extract_angle_bracket(&s))
        .filter(|s| !s.is_empty());
    meta.subject = get_header(&headers, "subject").unwrap_or_default();
    meta.from = get_header(&headers, "from").unwrap_or_default();
    meta.date = get_header(&headers, "date").and_then(|d| parse_date(&d));

    if let Some(status) = get_header(&headers, "status") {
        meta.flags.apply_status(&status);
    }
    if let Some(x_status) = get_header(&headers, "x-status") {
        meta.flags.apply_x_status(&x_status);
    }

    meta
}

/// First whitespace-delimited token after `From ` on a separator line.
pub fn envelope_sender(separator: &[u8]) -> Option<String> {
    let rest = separator.strip_prefix(b"From ")?;
    let token = rest
        .split(|b| b.is_ascii_whitespace())
        .find(|t| !t.is_empty())?;
    Some(String::from_utf8_lossy(token).into_owned())
}

/// Split a header block (no separator line) into its raw fields.
///
/// Parsing stops at the first blank line. Lines before the first field
/// name or without a colon are returned as nameless fields so that callers
/// copying the block lose nothing.
pub fn raw_fields(block: &[u8]) -> Vec<RawField<'_>> {
    let mut fields: Vec<RawField<'_>> = Vec::new();
    for line in split_lines(block) {
        if is_blank(line) {
            break;
        }
        let folded = line.starts_with(b" ") || line.starts_with(b"\t");
        match fields.last_mut() {
            Some(field) if folded => field.lines.push(line),
            _ => {
                let name = line
                    .iter()
                    .position(|&b| b == b':')
                    .map(|colon| trim_ascii(&line[..colon]))
                    .unwrap_or(&[]);
                fields.push(RawField {
                    name,
                    lines: vec![line],
                });
            }
        }
    }
    fields
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs. Stops at the first blank line.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation line
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
        // Lines without a colon and not a continuation are silently skipped
    }

    result
}

/// Get the first value for a header name (case-insensitive).
fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

/// Extract content between `<` and `>` (for Message-ID).
fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(start) = trimmed.find('<') {
        if let Some(end) = trimmed[start..].find('>') {
            return trimmed[start..start + end + 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Parse an email date string in the common formats.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in [no_dow.clone(), replace_named_tz(&no_dow)] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = [
        "Mon,", "Tue,", "Wed,", "Thu,", "Fri,", "Sat,", "Sun,", "Mon ", "Tue ", "Wed ", "Thu ",
        "Fri ", "Sat ", "Sun ",
    ];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
    ];
    let mut result = s.to_string();
    for (name, offset) in &tzs {
        if result.ends_with(name) {
            let pos = result.len() - name.len();
            result.replace_range(pos.., offset);
            return result;
        }
    }
    result
}
