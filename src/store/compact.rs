//! Mailbox rewriting: drop really-deleted records and regenerate the
//! `Status:` / `X-Status:` headers from the cached flags.
//!
//! The new content is written to a temporary file next to the mailbox and
//! renamed over it only once complete and synced, so a failure at any point
//! leaves the original file untouched.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{MboxError, Result};
use crate::model::{MessageRecord, MsgFlags};
use crate::parser::header::raw_fields;
use crate::parser::line::{line_ending, split_lines};
use crate::parser::mbox::read_range_from;

/// Result of one rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CompactStats {
    /// Records written to the new file.
    pub kept: usize,
    /// Really-deleted records dropped.
    pub purged: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Rewrite `path` from `records`. With `purge`, really-deleted records are
/// left out; otherwise they are kept and tagged `X-Status: D`.
///
/// `records` must describe the current content of the file and the caller
/// must hold the exclusive lock.
pub fn rewrite(path: &Path, records: &[MessageRecord], purge: bool) -> Result<CompactStats> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mbox".to_string());

    let mut src = File::open(path).map_err(|e| MboxError::open(path, e))?;
    let src_meta = src.metadata().map_err(|e| MboxError::io(path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".new")
        .tempfile_in(dir)
        .map_err(|e| MboxError::io(dir, e))?;
    let tmp_path = tmp.path().to_path_buf();

    let mut stats = CompactStats {
        bytes_before: src_meta.len(),
        ..CompactStats::default()
    };

    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        for record in records {
            if purge && record.is_really_deleted() {
                stats.purged += 1;
                continue;
            }
            let header = read_range_from(&mut src, path, record.header_offset, record.header_len())?;
            write_header(&mut out, &header, record.current_flags)
                .map_err(|e| MboxError::io(&tmp_path, e))?;
            copy_body(&mut src, path, &mut out, record)?;
            stats.kept += 1;
        }
        out.flush().map_err(|e| MboxError::io(&tmp_path, e))?;
    }

    let file = tmp.as_file();
    file.set_permissions(src_meta.permissions())
        .map_err(|e| MboxError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| MboxError::io(&tmp_path, e))?;
    stats.bytes_after = file
        .metadata()
        .map_err(|e| MboxError::io(&tmp_path, e))?
        .len();
    drop(src);

    tmp.persist(path).map_err(|e| MboxError::io(path, e.into()))?;

    info!(
        path = %path.display(),
        kept = stats.kept,
        purged = stats.purged,
        before = stats.bytes_before,
        after = stats.bytes_after,
        "Rewrote mailbox"
    );
    Ok(stats)
}

/// Write a record's header block with fresh status fields.
///
/// `header` spans from the separator line up to and including the blank
/// line that ends the headers (if there is one). Every field except
/// `Status` and `X-Status` is copied verbatim, continuation lines included.
fn write_header<W: Write>(out: &mut W, header: &[u8], flags: MsgFlags) -> io::Result<()> {
    let separator = split_lines(header).next().unwrap_or_default();
    let eol: &[u8] = match line_ending(separator) {
        b"" => b"\n",
        ending => ending,
    };

    out.write_all(separator)?;
    if !separator.ends_with(b"\n") {
        out.write_all(eol)?;
    }

    for field in raw_fields(&header[separator.len()..]) {
        if field.is_named("status") || field.is_named("x-status") {
            continue;
        }
        for line in &field.lines {
            out.write_all(line)?;
            if !line.ends_with(b"\n") {
                out.write_all(eol)?;
            }
        }
    }

    write!(out, "Status: {}", flags.status_value())?;
    out.write_all(eol)?;
    if let Some(x_status) = flags.x_status_value() {
        write!(out, "X-Status: {x_status}")?;
        out.write_all(eol)?;
    }
    out.write_all(eol)
}

fn copy_body<W: Write>(src: &mut File, path: &Path, out: &mut W, record: &MessageRecord) -> Result<()> {
    src.seek(SeekFrom::Start(record.content_offset))
        .map_err(|e| MboxError::io(path, e))?;
    let expected = record.body_len();
    let copied = io::copy(&mut std::io::Read::by_ref(src).take(expected), out)
        .map_err(|e| MboxError::io(path, e))?;
    if copied != expected {
        return Err(MboxError::io(
            path,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("message #{} truncated during rewrite", record.msgnum),
            ),
        ));
    }
    debug!(msgnum = record.msgnum, bytes = copied, "Copied body");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mbox::MboxParser;
    use tempfile::TempDir;

    fn header_for(raw: &[u8], flags: MsgFlags) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(&mut out, raw, flags).unwrap();
        out
    }

    #[test]
    fn test_status_fields_are_replaced() {
        let raw = b"From a@b x\nSubject: s\nstatus: RO\nX-Status: F\n\tfolded\nTo: c@d\n\n";
        let out = header_for(raw, MsgFlags::UNREAD | MsgFlags::REPLIED);
        assert_eq!(
            out,
            b"From a@b x\nSubject: s\nTo: c@d\nStatus: O\nX-Status: r\n\n".to_vec()
        );
    }

    #[test]
    fn test_crlf_follows_separator() {
        let raw = b"From a@b x\r\nSubject: s\r\n\r\n";
        let out = header_for(raw, MsgFlags::REALLY_DELETED | MsgFlags::MARKED);
        assert_eq!(
            out,
            b"From a@b x\r\nSubject: s\r\nStatus: RO\r\nX-Status: D\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_headerless_record_gets_header_block() {
        let out = header_for(b"From a@b x", MsgFlags::empty());
        assert_eq!(out, b"From a@b x\nStatus: RO\n\n".to_vec());
    }

    #[test]
    fn test_unnamed_lines_survive() {
        let raw = b"From a@b x\nnot a field\nSubject: s\n\n";
        let out = header_for(raw, MsgFlags::UNREAD);
        assert_eq!(
            out,
            b"From a@b x\nnot a field\nSubject: s\nStatus: O\n\n".to_vec()
        );
    }

    #[test]
    fn test_failed_rewrite_leaves_mailbox_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inbox");
        let data = b"From a@b x\nSubject: one\n\nfirst body\n\nFrom c@d y\nSubject: two\n\nsecond body, rather long\n";
        std::fs::write(&path, data).unwrap();
        let mut records = MboxParser::new(&path).unwrap().parse(None).unwrap();
        records[0].current_flags.insert(MsgFlags::MARKED);

        // Shrink the file behind the records so the last body comes up short
        let shrunk = &data[..data.len() - 10];
        std::fs::write(&path, shrunk).unwrap();

        let err = rewrite(&path, &records, true).unwrap_err();
        assert!(matches!(err, MboxError::Io { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), shrunk.to_vec());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "inbox")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inbox");
        std::fs::write(&path, b"From a@b x\nSubject: s\n\nbody\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&path, perms).unwrap();

        let records = MboxParser::new(&path).unwrap().parse(None).unwrap();
        let stats = rewrite(&path, &records, true).unwrap();
        assert_eq!(stats.kept, 1);
        assert!(std::fs::metadata(&path).unwrap().permissions().readonly());
    }
}
