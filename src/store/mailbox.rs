//! Mailbox operations offered to the folder layer.
//!
//! [`MboxStore`] owns the cache registry and routes every operation through
//! the right lock: reads under a shared lock, anything that changes the file
//! under an exclusive one.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{self, Config};
use crate::error::{MboxError, Result};
use crate::lock::{LockManager, LockMode};
use crate::model::{FolderCounts, MessageSummary, MsgFlags};
use crate::store::append;
use crate::store::compact::{self, CompactStats};
use crate::store::extract;
use crate::store::registry::Registry;

/// Access to any number of mbox files.
pub struct MboxStore {
    registry: Registry,
    temp_dir: PathBuf,
}

impl MboxStore {
    pub fn new(locks: LockManager, temp_dir: impl Into<PathBuf>, read_buffer_size: usize) -> Self {
        Self {
            registry: Registry::new(locks, read_buffer_size),
            temp_dir: temp_dir.into(),
        }
    }

    /// Build a store from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LockManager::new(&config.lock),
            config::temp_dir(config),
            config.performance.read_buffer_size,
        )
    }

    /// Directory extracted messages are written to.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Visible messages, in file order.
    pub fn enumerate(&mut self, path: &Path) -> Result<Vec<MessageSummary>> {
        let path = canonical(path)?;
        let entry = self.registry.get(&path)?;
        Ok(entry.live_records().map(MessageSummary::from).collect())
    }

    /// Extract message `msgnum` into its own file and return the file's path.
    ///
    /// The file is reused by later fetches and removed once the record it
    /// was taken from changes place or the mailbox is rewritten.
    pub fn fetch(&mut self, path: &Path, msgnum: u32) -> Result<PathBuf> {
        let path = canonical(path)?;
        let lock = self.registry.locks().acquire(&path, LockMode::Shared)?;
        let entry = self.registry.refresh_locked(&path)?;
        let file = extract::extract(entry, msgnum, &self.temp_dir)?;
        lock.release()?;
        Ok(file)
    }

    /// Append a message and return its (provisional) number.
    pub fn append(&mut self, path: &Path, message: &[u8]) -> Result<u32> {
        let path = canonical(path)?;
        let lock = self.registry.locks().acquire(&path, LockMode::Exclusive)?;
        let entry = self.registry.refresh_locked(&path)?;
        append::append_bytes(&path, message)?;
        let msgnum = entry.note_append();
        lock.release()?;
        info!(path = %path.display(), msgnum, "Added message");
        Ok(msgnum)
    }

    /// Append the message stored in `src`, deleting `src` afterwards if asked.
    pub fn append_file(&mut self, path: &Path, src: &Path, remove_source: bool) -> Result<u32> {
        let message = std::fs::read(src).map_err(|e| MboxError::open(src, e))?;
        let msgnum = self.append(path, &message)?;
        if remove_source {
            std::fs::remove_file(src).map_err(|e| MboxError::io(src, e))?;
        }
        Ok(msgnum)
    }

    /// Hide messages from enumeration; the next [`MboxStore::flush`] removes
    /// them from the file.
    pub fn mark_deleted(&mut self, path: &Path, msgnums: &[u32]) -> Result<()> {
        self.edit_flags(path, msgnums, |flags| flags.insert(MsgFlags::REALLY_DELETED))
    }

    /// Set `flags` on the given messages.
    pub fn set_flags(&mut self, path: &Path, msgnums: &[u32], flags: MsgFlags) -> Result<()> {
        self.edit_flags(path, msgnums, |current| current.insert(flags))
    }

    /// Clear `flags` on the given messages.
    pub fn clear_flags(&mut self, path: &Path, msgnums: &[u32], flags: MsgFlags) -> Result<()> {
        self.edit_flags(path, msgnums, |current| current.remove(flags))
    }

    fn edit_flags(
        &mut self,
        path: &Path,
        msgnums: &[u32],
        edit: impl Fn(&mut MsgFlags),
    ) -> Result<()> {
        let path = canonical(path)?;
        let entry = self.registry.get(&path)?;
        // Validate everything first so a bad number changes nothing
        for &msgnum in msgnums {
            entry.record(msgnum)?;
        }
        for &msgnum in msgnums {
            edit(&mut entry.record_mut(msgnum)?.current_flags);
        }
        entry.update_dirty();
        debug!(path = %path.display(), count = msgnums.len(), dirty = entry.dirty, "Edited flags");
        Ok(())
    }

    /// Write pending changes to disk: drop really-deleted messages and
    /// refresh the status headers. Returns `None` if there was nothing to do.
    pub fn flush(&mut self, path: &Path) -> Result<Option<CompactStats>> {
        let path = canonical(path)?;
        let lock = self.registry.locks().acquire(&path, LockMode::Exclusive)?;
        let entry = self.registry.refresh_locked(&path)?;
        if !entry.dirty && !entry.has_really_deleted() {
            lock.release()?;
            return Ok(None);
        }

        let stats = compact::rewrite(&path, &entry.records, true)?;
        self.registry.rebuild_locked(&path)?;
        lock.release()?;
        Ok(Some(stats))
    }

    /// Whether the file changed since this store last parsed it.
    pub fn is_stale(&self, path: &Path) -> Result<bool> {
        self.registry.is_stale(&canonical(path)?)
    }

    /// New / unread / total message counts.
    pub fn counts(&mut self, path: &Path) -> Result<FolderCounts> {
        let path = canonical(path)?;
        Ok(self.registry.get(&path)?.counts())
    }

    /// Empty the mailbox.
    pub fn remove_all(&mut self, path: &Path) -> Result<()> {
        let path = canonical(path)?;
        let lock = self.registry.locks().acquire(&path, LockMode::Exclusive)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| MboxError::open(&path, e))?;
        file.set_len(0).map_err(|e| MboxError::io(&path, e))?;
        file.sync_all().map_err(|e| MboxError::io(&path, e))?;
        drop(file);

        self.registry.rebuild_locked(&path)?;
        lock.release()?;
        info!(path = %path.display(), "Removed all messages");
        Ok(())
    }

    /// Append copies of the given messages to `dest`. Returns their numbers
    /// in `dest`.
    pub fn copy_to(&mut self, src: &Path, msgnums: &[u32], dest: &Path) -> Result<Vec<u32>> {
        let mut added = Vec::with_capacity(msgnums.len());
        for &msgnum in msgnums {
            let file = self.fetch(src, msgnum)?;
            added.push(self.append_file(dest, &file, false)?);
        }
        Ok(added)
    }

    /// Move messages to `dest`, then rewrite `src` without them.
    ///
    /// Each message is marked deleted only after it was appended to `dest`,
    /// so a failure part way leaves nothing lost.
    pub fn move_to(&mut self, src: &Path, msgnums: &[u32], dest: &Path) -> Result<Vec<u32>> {
        let mut added = Vec::with_capacity(msgnums.len());
        for &msgnum in msgnums {
            let file = self.fetch(src, msgnum)?;
            added.push(self.append_file(dest, &file, true)?);
            self.mark_deleted(src, &[msgnum])?;
        }
        self.flush(src)?;
        self.registry.get(&canonical(dest)?)?;
        Ok(added)
    }

    /// Write pending changes and forget the mailbox.
    pub fn close(&mut self, path: &Path) -> Result<()> {
        let path = canonical(path)?;
        let pending = self
            .registry
            .cached(&path)
            .is_some_and(|entry| entry.dirty || entry.has_really_deleted());
        if pending {
            self.flush(&path)?;
        }
        self.registry.close(&path);
        Ok(())
    }
}

/// Cache key for a mailbox: its absolute, symlink-free path.
fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| MboxError::open(path, e))
}
