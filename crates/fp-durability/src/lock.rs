//! Single-writer cohort lock: a touch file whose mtime age gates
//! ownership.
//!
//! A cohort may have exactly one owning engine instance at a time. The
//! lock is a zero-length file at `<base_dir>/.lock_<cohort>`; its
//! mtime — not its contents — is the only state consulted. A lock
//! younger than [`FRESH_LOCK_THRESHOLD`] blocks startup outright; an
//! older one is assumed to be left behind by a crashed process and is
//! silently reclaimed.

use crate::error::LockError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A lock file younger than this is assumed to belong to a live
/// process; startup fails rather than racing it.
pub const FRESH_LOCK_THRESHOLD: Duration = Duration::from_secs(2);

/// A held cohort lock. Dropping this does not release the lock file —
/// callers release explicitly via [`CohortLock::release`] as part of
/// the engine's ordered shutdown sequence, per the spec's close()
/// ordering constraint.
pub struct CohortLock {
    path: PathBuf,
}

impl CohortLock {
    /// The lock file path for `cohort` under `base_dir`.
    pub fn lock_path(base_dir: &Path, cohort: &str) -> PathBuf {
        base_dir.join(format!(".lock_{cohort}"))
    }

    /// Acquire the lock for `cohort` under `base_dir`, given whether WAL
    /// segments already exist for it (used only to decide the log
    /// message on stale-lock reclamation, per the spec).
    ///
    /// - Missing lock file: touched and acquired immediately.
    /// - Present, younger than [`FRESH_LOCK_THRESHOLD`]: fails with
    ///   [`LockError::AlreadyRunning`].
    /// - Present, older: logged as stale, deleted, and a fresh lock is
    ///   touched.
    pub fn acquire(base_dir: &Path, cohort: &str, wal_segments_exist: bool) -> Result<Self, LockError> {
        let path = Self::lock_path(base_dir, cohort);

        if path.exists() {
            let age = lock_age(&path)?;
            if age < FRESH_LOCK_THRESHOLD {
                return Err(LockError::AlreadyRunning {
                    cohort: cohort.to_string(),
                    lock_path: path,
                });
            }

            if wal_segments_exist {
                tracing::warn!(
                    cohort,
                    age_secs = age.as_secs_f64(),
                    "stale lock detected with WAL segments present - likely a crashed process; reclaiming and recovering from WAL"
                );
            } else {
                tracing::warn!(
                    cohort,
                    age_secs = age.as_secs_f64(),
                    "stale lock detected with no WAL segments; reclaiming"
                );
            }

            std::fs::remove_file(&path).map_err(|e| LockError::Io {
                lock_path: path.clone(),
                message: e.to_string(),
            })?;
        }

        touch(&path)?;
        Ok(CohortLock { path })
    }

    /// Release the lock by deleting its file. Missing is not an error —
    /// a concurrent stale-lock reclamation may already have removed it.
    pub fn release(&self) -> Result<(), LockError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Io {
                lock_path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// The lock file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_age(path: &Path) -> Result<Duration, LockError> {
    let metadata = std::fs::metadata(path).map_err(|e| LockError::Io {
        lock_path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let modified = metadata.modified().map_err(|e| LockError::Io {
        lock_path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

fn touch(path: &Path) -> Result<(), LockError> {
    std::fs::File::create(path)
        .map(|_| ())
        .map_err(|e| LockError::Io {
            lock_path: path.to_path_buf(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::tempdir;

    #[test]
    fn missing_lock_is_acquired_immediately() {
        let dir = tempdir().unwrap();
        let lock = CohortLock::acquire(dir.path(), "2024-01-01", false).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn fresh_lock_blocks_startup() {
        let dir = tempdir().unwrap();
        let path = CohortLock::lock_path(dir.path(), "2024-01-01");
        std::fs::File::create(&path).unwrap();

        let err = CohortLock::acquire(dir.path(), "2024-01-01", false).unwrap_err();
        assert!(matches!(err, LockError::AlreadyRunning { .. }));
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = CohortLock::lock_path(dir.path(), "2024-01-01");
        std::fs::File::create(&path).unwrap();

        let old = SystemTime::now() - Duration::from_secs(10);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        let lock = CohortLock::acquire(dir.path(), "2024-01-01", true).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn release_deletes_file() {
        let dir = tempdir().unwrap();
        let lock = CohortLock::acquire(dir.path(), "2024-01-01", false).unwrap();
        lock.release().unwrap();
        assert!(!lock.path().exists());
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let lock = CohortLock::acquire(dir.path(), "2024-01-01", false).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
    }
}
