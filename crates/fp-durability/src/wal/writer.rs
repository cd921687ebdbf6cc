//! Appends records to the currently open WAL segment and rotates it
//! when a configured threshold is crossed.
//!
//! Unlike a writer with selectable durability modes, every append here
//! is followed by an unconditional fsync — the spec draws no
//! distinction between durability levels, every `store()` is durable
//! before it returns.

use crate::error::WalError;
use crate::record::WalRecord;
use crate::wal::config::WalConfig;
use crate::wal::segment::{list_segment_sequences, WalSegment};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Owns the currently open WAL segment for one cohort directory and
/// rotates it on size, record-count, or (if configured) age.
pub struct WalWriter {
    dir: PathBuf,
    config: WalConfig,
    segment: Option<WalSegment>,
    current_sequence: u64,
    record_count: u64,
    segment_opened_at: Instant,
}

/// Whether an [`WalWriter::append`] call crossed a rotation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// `true` if the segment was rotated as part of this append.
    pub rotated: bool,
}

impl WalWriter {
    /// Open a writer over `dir`, resuming the highest-numbered existing
    /// segment for append if one exists. No segment is created until
    /// the first [`append`](Self::append) call — the spec creates one
    /// lazily on first write.
    pub fn open(dir: PathBuf, config: WalConfig) -> Result<Self, WalError> {
        std::fs::create_dir_all(&dir).map_err(|e| WalError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let sequences = list_segment_sequences(&dir).map_err(|e| WalError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let (segment, current_sequence) = match sequences.last() {
            Some(&seq) => {
                let segment = WalSegment::open_append(&dir, seq).map_err(|e| WalError::Io {
                    path: WalSegment::segment_path(&dir, seq),
                    source: e,
                })?;
                (Some(segment), seq)
            }
            None => (None, 0),
        };

        Ok(WalWriter {
            dir,
            config,
            segment,
            current_sequence,
            record_count: 0,
            segment_opened_at: Instant::now(),
        })
    }

    /// Append one record, opening a segment first if none is open, and
    /// rotating afterward if a threshold was crossed.
    pub fn append(&mut self, record: &WalRecord) -> Result<AppendOutcome, WalError> {
        if self.segment.is_none() {
            self.ensure_open()?;
        }

        let line = record
            .to_line()
            .expect("WalRecord serialization is infallible for well-formed JSON payloads");

        {
            let segment = self.segment.as_mut().expect("segment opened above");
            segment.append_line(&line).map_err(|e| WalError::Io {
                path: segment.path().to_path_buf(),
                source: e,
            })?;
        }
        self.record_count += 1;

        if self.should_rotate() {
            self.rotate()?;
            return Ok(AppendOutcome { rotated: true });
        }
        Ok(AppendOutcome { rotated: false })
    }

    fn should_rotate(&self) -> bool {
        let segment = match &self.segment {
            Some(segment) => segment,
            None => return false,
        };
        if segment.size() >= self.config.max_wal_size {
            return true;
        }
        if self.record_count >= self.config.batch_size as u64 {
            return true;
        }
        if let Some(max_age) = self.config.max_wal_age_seconds {
            if self.segment_opened_at.elapsed().as_secs() >= max_age {
                return true;
            }
        }
        false
    }

    /// Close the current segment (flush + fsync) and open the next one.
    /// Fsyncs the containing directory on platforms that support it;
    /// failure to do so is logged, not fatal.
    pub fn rotate(&mut self) -> Result<(), WalError> {
        if let Some(segment) = self.segment.as_mut() {
            segment.sync().map_err(|e| WalError::Io {
                path: segment.path().to_path_buf(),
                source: e,
            })?;
        }
        self.segment = None;
        self.open_new_segment()?;
        sync_directory(&self.dir);
        Ok(())
    }

    /// Rotate only if a segment is currently open. A flush with nothing
    /// pending should not create an empty segment, unlike [`rotate`](Self::rotate)
    /// which always opens a fresh one.
    pub fn rotate_if_open(&mut self) -> Result<(), WalError> {
        if self.segment.is_some() {
            self.rotate()?;
        }
        Ok(())
    }

    fn open_new_segment(&mut self) -> Result<(), WalError> {
        self.current_sequence += 1;
        let segment =
            WalSegment::create(&self.dir, self.current_sequence).map_err(|e| WalError::Io {
                path: WalSegment::segment_path(&self.dir, self.current_sequence),
                source: e,
            })?;
        self.segment = Some(segment);
        self.record_count = 0;
        self.segment_opened_at = Instant::now();
        Ok(())
    }

    /// Ensure a segment is open for appending: resume the current
    /// sequence number's segment file if one was closed (e.g. by
    /// [`close_current`](Self::close_current)) without rotating, or
    /// create the very first segment if none has ever been opened.
    fn ensure_open(&mut self) -> Result<(), WalError> {
        if self.segment.is_some() {
            return Ok(());
        }
        if self.current_sequence == 0 {
            return self.open_new_segment();
        }
        let segment =
            WalSegment::open_append(&self.dir, self.current_sequence).map_err(|e| WalError::Io {
                path: WalSegment::segment_path(&self.dir, self.current_sequence),
                source: e,
            })?;
        self.segment = Some(segment);
        self.segment_opened_at = Instant::now();
        Ok(())
    }

    /// Sequence numbers of every segment in the cohort directory,
    /// ascending.
    pub fn list_segments(&self) -> Result<Vec<u64>, WalError> {
        list_segment_sequences(&self.dir).map_err(|e| WalError::Io {
            path: self.dir.clone(),
            source: e,
        })
    }

    /// Delete every segment except the currently open one. Safe to call
    /// once the batch covering those segments has committed.
    pub fn retire_all_but_current(&self) -> Result<(), WalError> {
        for seq in self.list_segments()? {
            if seq == self.current_sequence {
                continue;
            }
            let path = WalSegment::segment_path(&self.dir, seq);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "failed to delete superseded WAL segment");
                }
            }
        }
        Ok(())
    }

    /// Flush, fsync, and close the current segment (if any). Used on
    /// shutdown; a subsequent `append` reopens lazily.
    pub fn close_current(&mut self) -> Result<(), WalError> {
        if let Some(segment) = self.segment.as_mut() {
            segment.sync().map_err(|e| WalError::Io {
                path: segment.path().to_path_buf(),
                source: e,
            })?;
        }
        self.segment = None;
        Ok(())
    }

    /// The sequence number of the currently open (or most recently
    /// opened) segment.
    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    /// The cohort directory this writer manages.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Byte size of the currently open segment, or 0 if none is open.
    pub fn current_size(&self) -> u64 {
        self.segment.as_ref().map_or(0, WalSegment::size)
    }

    /// Record count appended to the currently open segment since it was
    /// opened or last rotated.
    pub fn current_record_count(&self) -> u64 {
        self.record_count
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) {
    use std::fs::File;
    match File::open(dir) {
        Ok(handle) => {
            if let Err(e) = handle.sync_all() {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to fsync WAL directory after rotation");
            }
        }
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to open WAL directory for fsync");
        }
    }
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) {
    // Directory fsync is not meaningfully supported on this platform.
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dated_record(key: &str) -> WalRecord {
        WalRecord::Dated {
            key: key.into(),
            process_name: None,
            data: serde_json::json!({"x": 1}),
            username: None,
            timestamp: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn first_append_opens_segment_lazily() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        assert_eq!(writer.list_segments().unwrap(), Vec::<u64>::new());
        writer.append(&dated_record("k1")).unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![1]);
    }

    #[test]
    fn rotation_on_batch_size() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_batch_size(2);
        let mut writer = WalWriter::open(dir.path().to_path_buf(), config).unwrap();

        let first = writer.append(&dated_record("k1")).unwrap();
        assert!(!first.rotated);
        let second = writer.append(&dated_record("k2")).unwrap();
        assert!(second.rotated);
        assert_eq!(writer.list_segments().unwrap(), vec![1, 2]);
    }

    #[test]
    fn rotation_on_size() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_max_wal_size(10).with_batch_size(1000);
        let mut writer = WalWriter::open(dir.path().to_path_buf(), config).unwrap();
        let outcome = writer.append(&dated_record("k1")).unwrap();
        assert!(outcome.rotated);
    }

    #[test]
    fn retire_all_but_current_keeps_open_segment() {
        let dir = tempdir().unwrap();
        let config = WalConfig::new().with_batch_size(1);
        let mut writer = WalWriter::open(dir.path().to_path_buf(), config).unwrap();
        writer.append(&dated_record("k1")).unwrap();
        writer.append(&dated_record("k2")).unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![1, 2]);

        writer.retire_all_but_current().unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![2]);
    }

    #[test]
    fn resumes_existing_segment_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut writer =
                WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
            writer.append(&dated_record("k1")).unwrap();
        }
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        writer.append(&dated_record("k2")).unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![1]);
    }

    #[test]
    fn close_current_allows_lazy_reopen() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        writer.append(&dated_record("k1")).unwrap();
        writer.close_current().unwrap();
        writer.append(&dated_record("k2")).unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![1]);
    }

    #[test]
    fn rotate_if_open_is_noop_with_no_segment() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        writer.rotate_if_open().unwrap();
        assert_eq!(writer.list_segments().unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn rotate_if_open_rotates_an_open_segment() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        writer.append(&dated_record("k1")).unwrap();
        writer.rotate_if_open().unwrap();
        assert_eq!(writer.list_segments().unwrap(), vec![1, 2]);
    }

    #[test]
    fn current_size_and_count_reset_on_rotation() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path().to_path_buf(), WalConfig::default()).unwrap();
        assert_eq!(writer.current_size(), 0);
        assert_eq!(writer.current_record_count(), 0);

        writer.append(&dated_record("k1")).unwrap();
        assert!(writer.current_size() > 0);
        assert_eq!(writer.current_record_count(), 1);

        writer.rotate().unwrap();
        assert_eq!(writer.current_size(), 0);
        assert_eq!(writer.current_record_count(), 0);
    }
}
