//! Centralized error types for mboxstore.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mboxstore library.
#[derive(Error, Debug)]
pub enum MboxError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified mailbox does not exist.
    #[error("Mailbox not found: {0}")]
    FileNotFound(PathBuf),

    /// The file is not empty but does not start with a `From ` line.
    #[error("File does not appear to be a valid MBOX: {path} (offending line at offset {offset})")]
    InvalidMbox { path: PathBuf, offset: u64 },

    /// The mailbox lock could not be obtained within the retry budget.
    #[error("Could not lock '{path}' after {attempts} attempt(s)")]
    Lock { path: PathBuf, attempts: u32 },

    /// No live record carries the requested message number.
    #[error("No message #{msgnum} in '{path}'")]
    RecordNotFound { path: PathBuf, msgnum: u32 },

    /// Local flag edits were dropped on reparse because the records
    /// had no `(Message-ID, envelope sender)` fingerprint.
    #[error("{count} flag edit(s) in '{path}' could not be carried over (no fingerprint)")]
    ReconcileSkipped { path: PathBuf, count: usize },

    /// Configuration could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, MboxError>`.
pub type Result<T> = std::result::Result<T, MboxError>;

impl MboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an `open`/`stat` failure, turning `NotFound` into [`MboxError::FileNotFound`].
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}
