//! Cross-process mailbox locking.
//!
//! Two strategies, tried in order:
//!
//! 1. A non-blocking whole-file kernel advisory lock (`fs2`), shared or
//!    exclusive. Contention is retried with a fixed backoff.
//! 2. The `.lock` file protocol, used when the filesystem refuses kernel
//!    locks (or they are disabled): write our pid into `<path>.<pid>` and
//!    hard-link it to `<path>.lock`. `link(2)` fails if the target exists,
//!    even over NFS, which makes it the actual exclusion primitive.
//!
//! The strategy that succeeded travels with the returned [`LockHandle`], so
//! release always runs the matching teardown.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{MboxError, Result};

/// Requested access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers may share the mailbox.
    Shared,
    /// Required before any mutation.
    Exclusive,
}

/// How a lock is actually held.
#[derive(Debug)]
enum HeldLock {
    /// Kernel advisory lock; released by unlocking and closing the descriptor.
    Kernel(File),
    /// `.lock` file created through the hard-link protocol; released by deleting it.
    Lockfile(PathBuf),
}

/// A held mailbox lock.
///
/// Dropping the handle releases the lock; [`LockHandle::release`] does the
/// same but reports teardown errors.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    mode: LockMode,
    held: Option<HeldLock>,
}

impl LockHandle {
    /// The locked mailbox.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the lock was requested in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether the kernel lock (rather than the `.lock` file) is in use.
    pub fn is_kernel_lock(&self) -> bool {
        matches!(self.held, Some(HeldLock::Kernel(_)))
    }

    /// Release the lock.
    pub fn release(mut self) -> Result<()> {
        match self.held.take() {
            Some(held) => teardown(&self.path, held),
            None => Ok(()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            if let Err(e) = teardown(&self.path, held) {
                warn!(path = %self.path.display(), error = %e, "Failed to release mailbox lock");
            }
        }
    }
}

fn teardown(path: &Path, held: HeldLock) -> Result<()> {
    match held {
        HeldLock::Kernel(file) => {
            FileExt::unlock(&file).map_err(|e| MboxError::io(path, e))?;
            debug!(path = %path.display(), "Released kernel lock");
        }
        HeldLock::Lockfile(lock_path) => {
            fs::remove_file(&lock_path).map_err(|e| MboxError::io(&lock_path, e))?;
            debug!(path = %lock_path.display(), "Removed lock file");
        }
    }
    Ok(())
}

/// Acquires mailbox locks according to the lock configuration.
#[derive(Debug, Clone)]
pub struct LockManager {
    use_kernel_locks: bool,
    retries: u32,
    backoff: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(&LockConfig::default())
    }
}

impl LockManager {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            use_kernel_locks: config.use_kernel_locks,
            retries: config.retries,
            backoff: config.backoff(),
        }
    }

    /// Lock `path` in the given mode.
    ///
    /// Fails with [`MboxError::Lock`] once the retry budget is spent.
    pub fn acquire(&self, path: &Path, mode: LockMode) -> Result<LockHandle> {
        if self.use_kernel_locks {
            if let Some(file) = self.acquire_kernel(path, mode)? {
                debug!(path = %path.display(), ?mode, "Kernel lock acquired");
                return Ok(LockHandle {
                    path: path.to_path_buf(),
                    mode,
                    held: Some(HeldLock::Kernel(file)),
                });
            }
        }

        let lock_path = self.acquire_lockfile(path)?;
        debug!(path = %lock_path.display(), ?mode, "Lock file acquired");
        Ok(LockHandle {
            path: path.to_path_buf(),
            mode,
            held: Some(HeldLock::Lockfile(lock_path)),
        })
    }

    /// Try the kernel lock. `Ok(None)` means the filesystem does not
    /// support it and the caller should fall back to the lock file.
    ///
    /// The mailbox is reopened on every attempt and the lock is only kept if
    /// the locked descriptor still refers to the file at `path`: a rewrite
    /// renames a new file into place, and a lock on the old one excludes
    /// nobody.
    fn acquire_kernel(&self, path: &Path, mode: LockMode) -> Result<Option<File>> {
        for attempt in 0..=self.retries {
            let file = File::open(path).map_err(|e| MboxError::open(path, e))?;
            let result = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match result {
                Ok(()) => {
                    if is_same_file(&file, path).map_err(|e| MboxError::open(path, e))? {
                        return Ok(Some(file));
                    }
                    debug!(path = %path.display(), "Mailbox was replaced while waiting, reopening");
                    if let Err(e) = FileExt::unlock(&file) {
                        debug!(path = %path.display(), error = %e, "Unlock of replaced file failed");
                    }
                }
                Err(e) if is_contended(&e) => {
                    if attempt == 0 {
                        info!(path = %path.display(), "Mailbox is locked by another process, waiting");
                    }
                    if attempt < self.retries {
                        std::thread::sleep(self.backoff);
                    }
                }
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        error = %e,
                        "Kernel lock unavailable, using lock file"
                    );
                    return Ok(None);
                }
            }
        }

        Err(MboxError::Lock {
            path: path.to_path_buf(),
            attempts: self.retries + 1,
        })
    }

    /// Run the hard-link protocol and return the created `.lock` path.
    fn acquire_lockfile(&self, path: &Path) -> Result<PathBuf> {
        let lock_path = lock_path_for(path);
        let pid_path = pid_path_for(path);

        for attempt in 0..=self.retries {
            fs::write(&pid_path, format!("{}\n", std::process::id()))
                .map_err(|e| MboxError::io(&pid_path, e))?;
            let linked = fs::hard_link(&pid_path, &lock_path);
            if let Err(e) = fs::remove_file(&pid_path) {
                warn!(path = %pid_path.display(), error = %e, "Could not remove temporary lock file");
            }

            match linked {
                Ok(()) => return Ok(lock_path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == 0 {
                        info!(path = %lock_path.display(), "Mailbox is owned by another process, waiting");
                    }
                    if attempt < self.retries {
                        std::thread::sleep(self.backoff);
                    }
                }
                Err(e) => return Err(MboxError::io(&lock_path, e)),
            }
        }

        warn!(path = %lock_path.display(), "Giving up on lock file");
        Err(MboxError::Lock {
            path: path.to_path_buf(),
            attempts: self.retries + 1,
        })
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

/// Whether `file` is still the file found at `path`.
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    let current = fs::metadata(path)?;
    Ok(held.dev() == current.dev() && held.ino() == current.ino())
}

#[cfg(not(unix))]
fn is_same_file(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

/// `<path>.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    with_suffix(path, "lock")
}

/// `<path>.<pid>`
fn pid_path_for(path: &Path) -> PathBuf {
    with_suffix(path, &std::process::id().to_string())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
