//! A single WAL segment file: an append-only sequence of JSON Lines.
//!
//! Unlike the length-prefixed, CRC32-framed binary segments a
//! transaction-log WAL typically uses, a [`WalRecord`](crate::record::WalRecord)
//! here is a plain JSON object, one per line, written with a trailing
//! newline and fsynced before the write call returns. Corruption
//! detection therefore falls out of `serde_json` line parsing rather
//! than a checksum: a segment that was only partially written ends in
//! an unparsable final line, which the reader treats as the end of
//! valid data for that segment.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// `wal_000001.jsonl`, `wal_000002.jsonl`, ...
const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".jsonl";

/// An open, appendable WAL segment.
pub struct WalSegment {
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
}

impl WalSegment {
    /// The on-disk file name for segment `seq` within `dir`.
    pub fn segment_path(dir: &Path, seq: u64) -> PathBuf {
        dir.join(format!("{SEGMENT_PREFIX}{seq:06}{SEGMENT_SUFFIX}"))
    }

    /// Create a brand new, empty segment file. Fails if one already
    /// exists at that path.
    pub fn create(dir: &Path, seq: u64) -> io::Result<Self> {
        let path = Self::segment_path(dir, seq);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(WalSegment {
            path,
            writer: BufWriter::new(file),
            size: 0,
        })
    }

    /// Open an existing segment file for appending.
    pub fn open_append(dir: &Path, seq: u64) -> io::Result<Self> {
        let path = Self::segment_path(dir, seq);
        let file = OpenOptions::new().append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(WalSegment {
            path,
            writer: BufWriter::new(file),
            size,
        })
    }

    /// Append one JSON line (without a trailing newline — one is added)
    /// and fsync before returning. Every WAL append is synchronous; the
    /// spec draws no distinction between durability modes.
    pub fn append_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.size += line.len() as u64 + 1;
        Ok(())
    }

    /// Current size of the segment in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and fsync any buffered data without closing the segment.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Parse a segment sequence number out of a file name, if it
    /// matches the `wal_NNNNNN.jsonl` convention.
    pub fn parse_sequence(file_name: &str) -> Option<u64> {
        let stripped = file_name
            .strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_SUFFIX)?;
        stripped.parse().ok()
    }
}

/// List segment sequence numbers present in `dir`, sorted ascending.
pub fn list_segment_sequences(dir: &Path) -> io::Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut sequences = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(seq) = WalSegment::parse_sequence(&name) {
            sequences.push(seq);
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_append() {
        let dir = tempdir().unwrap();
        let mut segment = WalSegment::create(dir.path(), 1).unwrap();
        segment.append_line("{\"a\":1}").unwrap();
        segment.append_line("{\"a\":2}").unwrap();
        assert!(segment.size() > 0);

        let contents = std::fs::read_to_string(segment.path()).unwrap();
        assert_eq!(contents, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn reopen_for_append_resumes_size() {
        let dir = tempdir().unwrap();
        {
            let mut segment = WalSegment::create(dir.path(), 1).unwrap();
            segment.append_line("{\"a\":1}").unwrap();
        }
        let mut segment = WalSegment::open_append(dir.path(), 1).unwrap();
        let size_before = segment.size();
        segment.append_line("{\"a\":2}").unwrap();
        assert!(segment.size() > size_before);
    }

    #[test]
    fn parse_sequence_round_trip() {
        let path = WalSegment::segment_path(Path::new("/tmp"), 42);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(WalSegment::parse_sequence(&name), Some(42));
    }

    #[test]
    fn parse_sequence_rejects_other_files() {
        assert_eq!(WalSegment::parse_sequence("notes.txt"), None);
        assert_eq!(WalSegment::parse_sequence("wal_abc.jsonl"), None);
    }

    #[test]
    fn list_segment_sequences_sorted() {
        let dir = tempdir().unwrap();
        WalSegment::create(dir.path(), 3).unwrap();
        WalSegment::create(dir.path(), 1).unwrap();
        WalSegment::create(dir.path(), 2).unwrap();
        assert_eq!(list_segment_sequences(dir.path()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn list_segment_sequences_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(list_segment_sequences(&missing).unwrap(), Vec::<u64>::new());
    }
}
