//! Streaming MBOX parser.
//!
//! Reads the file line by line through a buffered reader and produces the
//! ordered list of record boundaries. Never loads the whole file into
//! memory. Flags and `Message-ID` are filled in afterwards by
//! [`crate::parser::header::annotate_records`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MboxError, Result};
use crate::model::MessageRecord;
use crate::parser::line::{classify, strip_bom, LineKind};

/// Default size of the internal read buffer (128 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128 * 1024;

/// Report progress roughly every 4 MB.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// Where the scanner is inside the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Before the first record: only blank lines are allowed.
    SeekRecordStart,
    /// Between a separator line and the first blank line.
    InHeader,
    /// After the header block, until the next separator.
    InBody,
}

/// Something the record builder has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseEvent {
    /// A separator line opens a new record at the current line.
    RecordStart,
    /// A blank line closes the header block; content starts after it.
    HeaderEnd,
    /// The first non-blank line of the file is not a separator.
    Malformed,
}

impl ParseState {
    fn step(self, kind: LineKind) -> (ParseState, Option<ParseEvent>) {
        match self {
            ParseState::SeekRecordStart => seek_record_start(kind),
            ParseState::InHeader => in_header(kind),
            ParseState::InBody => in_body(kind),
        }
    }
}

fn seek_record_start(kind: LineKind) -> (ParseState, Option<ParseEvent>) {
    match kind {
        LineKind::RecordStart => (ParseState::InHeader, Some(ParseEvent::RecordStart)),
        LineKind::Blank => (ParseState::SeekRecordStart, None),
        _ => (ParseState::SeekRecordStart, Some(ParseEvent::Malformed)),
    }
}

fn in_header(kind: LineKind) -> (ParseState, Option<ParseEvent>) {
    match kind {
        LineKind::RecordStart => (ParseState::InHeader, Some(ParseEvent::RecordStart)),
        LineKind::Blank => (ParseState::InBody, Some(ParseEvent::HeaderEnd)),
        _ => (ParseState::InHeader, None),
    }
}

fn in_body(kind: LineKind) -> (ParseState, Option<ParseEvent>) {
    match kind {
        LineKind::RecordStart => (ParseState::InHeader, Some(ParseEvent::RecordStart)),
        _ => (ParseState::InBody, None),
    }
}

/// Accumulates closed records while the scan advances.
#[derive(Default)]
struct RecordBuilder {
    records: Vec<MessageRecord>,
    open: Option<(u64, Option<u64>)>,
}

impl RecordBuilder {
    fn begin(&mut self, offset: u64) {
        self.close(offset);
        self.open = Some((offset, None));
    }

    fn end_header(&mut self, content_offset: u64) {
        if let Some((_, content)) = self.open.as_mut() {
            content.get_or_insert(content_offset);
        }
    }

    fn close(&mut self, end_offset: u64) {
        if let Some((header_offset, content)) = self.open.take() {
            let msgnum = self.records.len() as u32 + 1;
            let mut record = MessageRecord::new(msgnum, header_offset);
            record.content_offset = content.unwrap_or(end_offset);
            record.end_offset = end_offset;
            self.records.push(record);
        }
    }

    fn finish(mut self, file_len: u64) -> Vec<MessageRecord> {
        self.close(file_len);
        self.records
    }
}

/// Streaming MBOX parser.
///
/// The parser is tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logged at debug level)
/// - Leading blank lines and a UTF-8 BOM before the first record
/// - NUL bytes and other binary content in the body
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
    read_buffer_size: usize,
}

impl MboxParser {
    /// Create a parser for the given MBOX file.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// that it is actually an MBOX.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| MboxError::open(&path, e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        })
    }

    /// Override the read buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(4096);
        self
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path to the MBOX file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the whole file and return its records in order.
    ///
    /// An empty file yields zero records. A non-empty file whose first
    /// non-blank line is not a `From ` line fails with
    /// [`MboxError::InvalidMbox`].
    pub fn parse(&self, progress: Option<&dyn Fn(u64, u64)>) -> Result<Vec<MessageRecord>> {
        if self.file_size == 0 {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| MboxError::open(&self.path, e))?;
        let reader = BufReader::with_capacity(self.read_buffer_size, file);
        let records = parse_reader(reader, &self.path, self.file_size, progress)?;

        debug!(
            path = %self.path.display(),
            count = records.len(),
            "Parsed mailbox"
        );
        Ok(records)
    }
}

/// Read `length` bytes at `offset` from an already open file.
///
/// Uses `seek` to jump directly to the record without scanning the file.
pub fn read_range_from(file: &mut File, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| MboxError::io(path, e))?;
    let mut buffer = vec![0u8; length as usize];
    file.read_exact(&mut buffer)
        .map_err(|e| MboxError::io(path, e))?;
    Ok(buffer)
}

/// Parse records from any buffered stream positioned at offset 0.
///
/// `origin` is only used to label errors; `total_len` is what the progress
/// callback reports as the expected total.
pub fn parse_reader<R: BufRead>(
    mut reader: R,
    origin: &Path,
    total_len: u64,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<Vec<MessageRecord>> {
    let mut builder = RecordBuilder::default();
    let mut state = ParseState::SeekRecordStart;
    let mut offset: u64 = 0;
    let mut last_progress: u64 = 0;
    let mut prev_line_was_blank = true;

    // Reusable line buffer
    let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

    loop {
        line_buf.clear();
        let line_len = reader
            .read_until(b'\n', &mut line_buf)
            .map_err(|e| MboxError::io(origin, e))? as u64;
        if line_len == 0 {
            break; // EOF
        }

        let line = if offset == 0 {
            strip_bom(&line_buf)
        } else {
            &line_buf[..]
        };
        let line_start = offset + (line_buf.len() - line.len()) as u64;
        let kind = classify(line);

        let (next, event) = state.step(kind);
        match event {
            Some(ParseEvent::RecordStart) => {
                if state == ParseState::InBody && !prev_line_was_blank {
                    debug!(
                        offset = line_start,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                builder.begin(line_start);
            }
            Some(ParseEvent::HeaderEnd) => builder.end_header(offset + line_len),
            Some(ParseEvent::Malformed) => {
                return Err(MboxError::InvalidMbox {
                    path: origin.to_path_buf(),
                    offset: line_start,
                });
            }
            None => {}
        }

        state = next;
        prev_line_was_blank = kind == LineKind::Blank;
        offset += line_len;

        if let Some(cb) = progress {
            if offset - last_progress >= PROGRESS_INTERVAL {
                cb(offset, total_len);
                last_progress = offset;
            }
        }
    }

    if let Some(cb) = progress {
        cb(offset, total_len.max(offset));
    }

    Ok(builder.finish(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_bytes(data: &[u8]) -> Result<Vec<MessageRecord>> {
        parse_reader(Cursor::new(data), Path::new("<memory>"), data.len() as u64, None)
    }

    #[test]
    fn test_single_record_offsets() {
        let data = b"From a@b Mon Jan 1 00:00:00 2024\nSubject: x\n\nBody\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.msgnum, 1);
        assert_eq!(rec.header_offset, 0);
        assert_eq!(&data[rec.content_offset as usize..], b"Body\n");
        assert_eq!(rec.end_offset, data.len() as u64);
    }

    #[test]
    fn test_empty_input_yields_no_records() {
        assert!(parse_bytes(b"").unwrap().is_empty());
        assert!(parse_bytes(b"\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_leading_blank_lines_are_skipped() {
        let data = b"\n\nFrom a@b x\n\nbody\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header_offset, 2);
    }

    #[test]
    fn test_invalid_leading_line() {
        let err = parse_bytes(b"\nSubject: nope\n\nbody\n").unwrap_err();
        assert!(matches!(err, MboxError::InvalidMbox { offset: 1, .. }));
    }

    #[test]
    fn test_quoted_from_is_not_a_boundary() {
        let data = b"From a@b x\nSubject: q\n\n>From evil\n>>From eviler\nend\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].end_offset, data.len() as u64);
    }

    #[test]
    fn test_headerless_record() {
        let data = b"From a@b x\nFrom c@d y\nSubject: z\n\nbody\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].end_offset, 11);
        assert_eq!(records[0].content_offset, records[0].end_offset);
        assert_eq!(records[1].header_offset, 11);
        assert_eq!(records[1].msgnum, 2);
    }

    #[test]
    fn test_header_block_at_eof() {
        let data = b"From a@b x\nSubject: z\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records[0].content_offset, data.len() as u64);
        assert_eq!(records[0].body_len(), 0);
    }

    #[test]
    fn test_crlf_line_endings() {
        let data = b"From a@b x\r\nSubject: z\r\n\r\nbody\r\nFrom c@d y\r\n\r\nmore\r\n";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&data[records[0].content_offset as usize..records[0].end_offset as usize], b"body\r\n");
        assert_eq!(&data[records[1].content_offset as usize..], b"more\r\n");
    }

    #[test]
    fn test_slices_reassemble_input() {
        let data: &[u8] = b"From a@b 1\nA: 1\n\none\n\nFrom c@d 2\nB: 2\n\ntwo\nFrom e@f 3\n\nthree";
        let records = parse_bytes(data).unwrap();
        assert_eq!(records.len(), 3);
        let mut rebuilt = Vec::new();
        for (i, rec) in records.iter().enumerate() {
            if let Some(next) = records.get(i + 1) {
                assert!(rec.end_offset <= next.header_offset);
            }
            rebuilt.extend_from_slice(&data[rec.header_offset as usize..rec.end_offset as usize]);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_bom_before_first_record() {
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(b"From a@b x\n\nbody\n");
        let records = parse_bytes(&data).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header_offset, 3);
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            ParseState::SeekRecordStart.step(LineKind::Blank),
            (ParseState::SeekRecordStart, None)
        );
        assert_eq!(
            ParseState::InHeader.step(LineKind::Folded),
            (ParseState::InHeader, None)
        );
        assert_eq!(
            ParseState::InHeader.step(LineKind::Blank),
            (ParseState::InBody, Some(ParseEvent::HeaderEnd))
        );
        assert_eq!(
            ParseState::InBody.step(LineKind::QuotedFrom),
            (ParseState::InBody, None)
        );
        assert_eq!(
            ParseState::InBody.step(LineKind::RecordStart),
            (ParseState::InHeader, Some(ParseEvent::RecordStart))
        );
    }
}
