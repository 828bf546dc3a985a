//! Copy one record out of the mailbox into a standalone file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MboxError, Result};
use crate::store::registry::CacheEntry;

/// Write record `msgnum` (separator line included) to a new file in
/// `temp_dir` and return its path.
///
/// A record already extracted in this session is not copied again as long
/// as the earlier file still exists. The caller holds at least a shared lock
/// on the mailbox.
pub fn extract(entry: &mut CacheEntry, msgnum: u32, temp_dir: &Path) -> Result<PathBuf> {
    let mailbox = entry.path.clone();
    let record = entry.record_mut(msgnum)?;

    if let Some(fetched) = &record.fetched {
        if fetched.exists() {
            debug!(msgnum, path = %fetched.display(), "Message already extracted");
            return Ok(fetched.clone());
        }
    }

    std::fs::create_dir_all(temp_dir).map_err(|e| MboxError::io(temp_dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("msg-")
        .suffix(&format!("-{msgnum}.eml"))
        .tempfile_in(temp_dir)
        .map_err(|e| MboxError::io(temp_dir, e))?;

    // On any error below `tmp` is dropped, which deletes the partial copy
    let mut src = File::open(&mailbox).map_err(|e| MboxError::open(&mailbox, e))?;
    src.seek(SeekFrom::Start(record.header_offset))
        .map_err(|e| MboxError::io(&mailbox, e))?;
    let expected = record.len();
    let copied = io::copy(&mut src.take(expected), tmp.as_file_mut())
        .map_err(|e| MboxError::io(tmp.path(), e))?;
    if copied != expected {
        return Err(MboxError::io(
            &mailbox,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("message #{msgnum} truncated: {copied} of {expected} bytes"),
            ),
        ));
    }
    tmp.as_file_mut()
        .flush()
        .map_err(|e| MboxError::io(tmp.path(), e))?;

    let (_, path) = tmp.keep().map_err(|e| MboxError::io(temp_dir, e.into()))?;
    debug!(msgnum, bytes = copied, path = %path.display(), "Extracted message");
    record.fetched = Some(path.clone());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::parser::mbox::DEFAULT_READ_BUFFER_SIZE;
    use crate::store::registry::Registry;
    use tempfile::TempDir;

    const DATA: &[u8] = b"From a@b x\nSubject: one\n\nfirst\n\nFrom c@d y\nSubject: two\n\nsecond\n";

    fn setup() -> (TempDir, PathBuf, Registry) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mbox");
        std::fs::write(&path, DATA).unwrap();
        (dir, path, Registry::new(LockManager::default(), DEFAULT_READ_BUFFER_SIZE))
    }

    #[test]
    fn test_extract_copies_exact_record() {
        let (dir, path, mut reg) = setup();
        let out = dir.path().join("out");
        let entry = reg.get(&path).unwrap();

        let file = extract(entry, 2, &out).unwrap();
        assert!(file.starts_with(&out));
        assert_eq!(
            std::fs::read(&file).unwrap(),
            b"From c@d y\nSubject: two\n\nsecond\n"
        );
        assert_eq!(entry.record(2).unwrap().fetched.as_deref(), Some(file.as_path()));
    }

    #[test]
    fn test_extract_is_idempotent_while_file_exists() {
        let (dir, path, mut reg) = setup();
        let out = dir.path().join("out");
        let entry = reg.get(&path).unwrap();

        let first = extract(entry, 1, &out).unwrap();
        let again = extract(entry, 1, &out).unwrap();
        assert_eq!(first, again);

        std::fs::remove_file(&first).unwrap();
        let fresh = extract(entry, 1, &out).unwrap();
        assert!(fresh.exists());
    }

    #[test]
    fn test_missing_record() {
        let (dir, path, mut reg) = setup();
        let entry = reg.get(&path).unwrap();
        assert!(matches!(
            extract(entry, 9, dir.path()),
            Err(MboxError::RecordNotFound { msgnum: 9, .. })
        ));
    }

    #[test]
    fn test_truncated_mailbox_leaves_nothing_behind() {
        let (dir, path, mut reg) = setup();
        let out = dir.path().join("out");
        let entry = reg.get(&path).unwrap();

        // Shrink the file behind the cache's back
        std::fs::write(&path, b"From a@b x\n").unwrap();
        assert!(extract(entry, 2, &out).is_err());
        assert!(entry.record(2).unwrap().fetched.is_none());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
