//! Appending messages to the end of a mailbox.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::error::{MboxError, Result};
use crate::parser::line::{is_quoted_from, is_separator, split_lines};

/// Turn raw message bytes into a record ready to be appended.
///
/// The first line is kept as the separator if it is a `From ` line;
/// otherwise `From - <ctime(mtime)>` is put in front. Every later line
/// matching `^>*From ` gets one more `>` (mboxrd quoting, so readers can
/// strip one level back off) and the result always ends with a newline.
pub fn canonicalize(message: &[u8], mtime: SystemTime) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 64);
    let mut lines = split_lines(message).peekable();

    if lines.peek().is_some_and(|line| is_separator(line)) {
        if let Some(first) = lines.next() {
            out.extend_from_slice(first);
        }
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }
    } else {
        out.extend_from_slice(separator_line(mtime).as_bytes());
    }

    let mut quoted = 0usize;
    for line in lines {
        if is_separator(line) || is_quoted_from(line) {
            out.push(b'>');
            quoted += 1;
        }
        out.extend_from_slice(line);
    }
    if quoted > 0 {
        debug!(quoted, "Quoted 'From ' lines in appended message");
    }

    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out
}

/// `From - Mon Jan  1 00:00:00 2024\n`, in local time like `ctime(3)`.
fn separator_line(mtime: SystemTime) -> String {
    let local: DateTime<Local> = mtime.into();
    format!("From - {}\n", local.format("%a %b %e %H:%M:%S %Y"))
}

/// Append `message` to the mailbox at `path` and return the number of bytes
/// written. The caller holds the exclusive lock.
///
/// On a failed write the file is truncated back to its previous length.
pub fn append_bytes(path: &Path, message: &[u8]) -> Result<u64> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| MboxError::open(path, e))?;
    let meta = file.metadata().map_err(|e| MboxError::io(path, e))?;
    let old_len = meta.len();
    let mtime = meta.modified().unwrap_or_else(|_| SystemTime::now());

    let mut record = Vec::with_capacity(message.len() + 65);
    if !ends_with_newline(&mut file, path, old_len)? {
        record.push(b'\n');
    }
    record.extend_from_slice(&canonicalize(message, mtime));

    write_or_roll_back(&mut file, path, old_len, |file| write_at_end(file, &record))?;

    debug!(path = %path.display(), bytes = record.len(), "Appended message");
    Ok(record.len() as u64)
}

/// Run `write`; if it fails, cut the file back to `old_len`.
fn write_or_roll_back(
    file: &mut File,
    path: &Path,
    old_len: u64,
    write: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> Result<()> {
    if let Err(e) = write(file) {
        warn!(path = %path.display(), error = %e, "Append failed, rolling back");
        if let Err(undo) = file.set_len(old_len) {
            warn!(path = %path.display(), error = %undo, "Could not truncate after failed append");
        }
        return Err(MboxError::io(path, e));
    }
    Ok(())
}

fn ends_with_newline(file: &mut File, path: &Path, len: u64) -> Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .map_err(|e| MboxError::io(path, e))?;
    file.read_exact(&mut last)
        .map_err(|e| MboxError::io(path, e))?;
    Ok(last[0] == b'\n')
}

fn write_at_end(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::End(0))?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_data()
}
