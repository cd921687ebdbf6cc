//! Errors raised by the WAL writer/reader and the cohort lock.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while appending to, rotating, or reading a WAL segment.
#[derive(Debug, Error)]
pub enum WalError {
    /// The underlying segment file failed an I/O operation (append,
    /// fsync, rotate). Per the spec this is propagated to the caller of
    /// `store` — the cache/pending mutations have already happened and
    /// will be retried on the next write or flush.
    #[error("WAL I/O error at {path}: {source}")]
    Io {
        /// The segment path the failing operation targeted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while acquiring a cohort lock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A live lock file (younger than the staleness threshold) blocks
    /// startup. Fatal — the spec requires single-writer ownership of a
    /// cohort.
    #[error("another instance is already running for cohort {cohort:?} (lock at {lock_path:?})")]
    AlreadyRunning {
        /// The cohort whose lock is contended.
        cohort: String,
        /// The path of the contended lock file.
        lock_path: PathBuf,
    },

    /// The lock file could not be created, read, or removed due to an
    /// I/O failure unrelated to contention.
    #[error("failed to manage lock file {lock_path:?}: {message}")]
    Io {
        /// The lock file path.
        lock_path: PathBuf,
        /// A description of the underlying I/O failure.
        message: String,
    },
}
