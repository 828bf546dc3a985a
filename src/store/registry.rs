//! Per-path cache of parsed mailboxes.
//!
//! An entry is rebuilt whenever the file's stamp (modification time and
//! length) no longer matches the one recorded at the last parse. Local flag
//! edits survive a rebuild caused by another process through
//! [`reconcile::merge`]; after the store rewrote the file itself, the new
//! content is authoritative and the entry is rebuilt from it alone.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, trace, warn};

use crate::error::{MboxError, Result};
use crate::lock::{LockManager, LockMode};
use crate::model::{FolderCounts, MessageRecord, MsgFlags};
use crate::parser::header;
use crate::parser::mbox::MboxParser;
use crate::store::reconcile;

/// What the file looked like when it was last parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl FileStamp {
    /// Stat `path`.
    pub fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| MboxError::open(path, e))?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Cached state of one mailbox file.
#[derive(Debug)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub stamp: FileStamp,
    /// Every record in file order, really-deleted ones included.
    pub records: Vec<MessageRecord>,
    /// Some record has a flag change a rewrite would persist.
    pub dirty: bool,
    /// Messages appended since the last parse. Dropped by the next rebuild,
    /// which counts them for real.
    provisional_appends: u32,
}

impl CacheEntry {
    fn new(path: PathBuf, stamp: FileStamp, records: Vec<MessageRecord>) -> Self {
        let mut entry = Self {
            path,
            stamp,
            records,
            dirty: false,
            provisional_appends: 0,
        };
        entry.update_dirty();
        entry
    }

    /// Records visible to the folder layer.
    pub fn live_records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter().filter(|r| !r.is_really_deleted())
    }

    /// Look up a visible record.
    pub fn record(&self, msgnum: u32) -> Result<&MessageRecord> {
        self.records
            .iter()
            .find(|r| r.msgnum == msgnum && !r.is_really_deleted())
            .ok_or_else(|| self.not_found(msgnum))
    }

    /// Look up a visible record for modification.
    pub fn record_mut(&mut self, msgnum: u32) -> Result<&mut MessageRecord> {
        let path = &self.path;
        self.records
            .iter_mut()
            .find(|r| r.msgnum == msgnum && !r.is_really_deleted())
            .ok_or_else(|| MboxError::RecordNotFound {
                path: path.clone(),
                msgnum,
            })
    }

    fn not_found(&self, msgnum: u32) -> MboxError {
        MboxError::RecordNotFound {
            path: self.path.clone(),
            msgnum,
        }
    }

    /// Recompute [`CacheEntry::dirty`] after flag edits.
    pub fn update_dirty(&mut self) {
        self.dirty = self.records.iter().any(MessageRecord::needs_sync);
    }

    /// Whether a purge would drop anything.
    pub fn has_really_deleted(&self) -> bool {
        self.records.iter().any(MessageRecord::is_really_deleted)
    }

    /// Count one appended message and return its provisional number.
    pub fn note_append(&mut self) -> u32 {
        self.provisional_appends += 1;
        self.last_num()
    }

    /// Highest message number handed out so far.
    pub fn last_num(&self) -> u32 {
        self.records.len() as u32 + self.provisional_appends
    }

    pub fn counts(&self) -> FolderCounts {
        let mut counts = FolderCounts {
            last_num: self.last_num(),
            ..FolderCounts::default()
        };
        for record in self.live_records() {
            counts.total += 1;
            if record.current_flags.contains(MsgFlags::NEW) {
                counts.new += 1;
            }
            if record.current_flags.contains(MsgFlags::UNREAD) {
                counts.unread += 1;
            }
        }
        counts
    }
}

/// Owns the cache entries of every open mailbox.
pub struct Registry {
    entries: HashMap<PathBuf, CacheEntry>,
    locks: LockManager,
    read_buffer_size: usize,
}

impl Registry {
    pub fn new(locks: LockManager, read_buffer_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            locks,
            read_buffer_size,
        }
    }

    /// The lock manager used for every file access.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Return the up-to-date entry for `path`, reparsing under a shared lock
    /// if the file changed since the last look.
    pub fn get(&mut self, path: &Path) -> Result<&mut CacheEntry> {
        let lock = self.locks.acquire(path, LockMode::Shared)?;
        self.sync_entry(path, false)?;
        lock.release()?;
        self.cached_mut(path)
    }

    /// Same as [`Registry::get`] for callers that already hold a lock on `path`.
    pub fn refresh_locked(&mut self, path: &Path) -> Result<&mut CacheEntry> {
        self.sync_entry(path, false)
    }

    /// Reparse unconditionally and drop local flag state. Used after the
    /// store itself rewrote or truncated the file, whose content now already
    /// holds every edit. The caller must hold a lock on `path`.
    pub fn rebuild_locked(&mut self, path: &Path) -> Result<&mut CacheEntry> {
        self.sync_entry(path, true)
    }

    /// Whether the file changed since it was last parsed. A mailbox that was
    /// never parsed is stale.
    pub fn is_stale(&self, path: &Path) -> Result<bool> {
        let stamp = FileStamp::of(path)?;
        Ok(self
            .entries
            .get(path)
            .map_or(true, |entry| entry.stamp != stamp))
    }

    /// Whether `path` has a cache entry.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// The cached entry as it is, without looking at the file.
    pub fn cached(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    /// Drop the cache entry for `path`, returning it.
    pub fn close(&mut self, path: &Path) -> Option<CacheEntry> {
        let entry = self.entries.remove(path);
        if entry.is_some() {
            debug!(path = %path.display(), "Closed mailbox");
        }
        entry
    }

    fn cached_mut(&mut self, path: &Path) -> Result<&mut CacheEntry> {
        self.entries
            .get_mut(path)
            .ok_or_else(|| MboxError::FileNotFound(path.to_path_buf()))
    }

    fn sync_entry(&mut self, path: &Path, discard: bool) -> Result<&mut CacheEntry> {
        let stamp = FileStamp::of(path)?;
        let read_buffer_size = self.read_buffer_size;

        let entry = match self.entries.entry(path.to_path_buf()) {
            Entry::Occupied(occupied) if !discard && occupied.get().stamp == stamp => {
                occupied.into_mut()
            }
            Entry::Occupied(mut occupied) if discard => {
                let records = scan(path, read_buffer_size)?;
                // Every byte range moved or changed; no extraction is current
                carry_extractions(&occupied.get().records, &mut []);
                debug!(path = %path.display(), "Rebuilt cache after rewrite");
                occupied.insert(CacheEntry::new(path.to_path_buf(), stamp, records));
                occupied.into_mut()
            }
            Entry::Occupied(mut occupied) => {
                let mut records = scan(path, read_buffer_size)?;
                carry_extractions(&occupied.get().records, &mut records);
                let outcome = reconcile::merge(&occupied.get().records, &mut records);
                if outcome.skipped > 0 {
                    let notice = MboxError::ReconcileSkipped {
                        path: path.to_path_buf(),
                        count: outcome.skipped,
                    };
                    warn!("{notice}");
                }
                if outcome.unmatched > 0 {
                    info!(
                        path = %path.display(),
                        count = outcome.unmatched,
                        "Edited messages no longer present in mailbox"
                    );
                }
                debug!(
                    path = %path.display(),
                    carried = outcome.carried,
                    "Mailbox changed on disk, rebuilt cache"
                );
                occupied.insert(CacheEntry::new(path.to_path_buf(), stamp, records));
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => {
                let records = scan(path, read_buffer_size)?;
                vacant.insert(CacheEntry::new(path.to_path_buf(), stamp, records))
            }
        };
        Ok(entry)
    }
}

/// Keep the extracted file of every record that sits unchanged at the same
/// place in the new list; delete the ones nothing refers to any more.
fn carry_extractions(old: &[MessageRecord], new: &mut [MessageRecord]) {
    for record in old {
        let Some(fetched) = &record.fetched else {
            continue;
        };
        let same = new.iter_mut().find(|r| {
            r.header_offset == record.header_offset
                && r.end_offset == record.end_offset
                && r.content_offset == record.content_offset
                && r.fingerprint() == record.fingerprint()
        });
        match same {
            Some(target) => target.fetched = Some(fetched.clone()),
            None => match std::fs::remove_file(fetched) {
                Ok(()) => trace!(path = %fetched.display(), "Removed stale extraction"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %fetched.display(), error = %e, "Could not remove stale extraction")
                }
            },
        }
    }
}

/// Parse `path` and run the header metadata pass over the result.
fn scan(path: &Path, read_buffer_size: usize) -> Result<Vec<MessageRecord>> {
    let parser = MboxParser::new(path)?.with_buffer_size(read_buffer_size);
    let mut records = parser.parse(None)?;
    if !records.is_empty() {
        let mut file = File::open(path).map_err(|e| MboxError::open(path, e))?;
        header::annotate_records(&mut file, path, &mut records)?;
    }
    debug!(
        path = %path.display(),
        size = parser.file_size(),
        count = records.len(),
        "Scanned mailbox"
    );
    Ok(records)
}
