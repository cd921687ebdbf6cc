//! The dated engine façade: `store`/`get_key`/`get_key_process`/
//! `flush`/`close` over a single cohort's WAL segments and `storage`
//! table.
//!
//! One instance owns exactly one cohort directory for its whole
//! lifetime — unlike the collection engine, which shares its two
//! column-store files across every cohort it ever touches, the dated
//! engine's single table lives inside the cohort directory itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fp_core::{now, parse_timestamp, serialize_timestamp, CohortSource, DatedIdentity};
use fp_durability::{CohortLock, WalRecord, WalWriter};
use fp_store::{db_path_for_cohort, DatedRow, DatedStore};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::background::BackgroundFlusher;
use crate::cache::{DatedCache, DatedPendingLedger, PendingDatedWrite};
use crate::config::DatedConfig;
use crate::error::EngineError;
use crate::flusher;

struct Shared {
    store: Mutex<DatedStore>,
    pending: DatedPendingLedger,
    wal: Mutex<WalWriter>,
}

impl Shared {
    /// Flush pending writes and, on success, retire every WAL segment
    /// but the currently open one — the spec's §4.F step 3: segment
    /// deletion only ever follows a *committed* batch, since the
    /// committed batch is a strict superset of what those segments
    /// contain.
    fn flush_and_retire(&self) -> Result<usize, EngineError> {
        let flushed = flusher::flush_dated(&self.pending, &mut self.store.lock())?;
        self.wal.lock().retire_all_but_current()?;
        Ok(flushed)
    }
}

/// An open dated-engine instance for one cohort.
pub struct DatedEngine {
    cohort: String,
    cohort_dir: PathBuf,
    lock: Option<CohortLock>,
    shared: Arc<Shared>,
    cache: DatedCache,
    flusher: Option<BackgroundFlusher>,
    config: DatedConfig,
}

impl DatedEngine {
    /// Open (or recover) the engine for `cohort_source`'s cohort under
    /// `base_dir`. Acquires the cohort lock, replays any existing WAL
    /// segments into the cache and pending ledger, flushes whatever was
    /// recovered, and starts the background flush worker.
    pub fn open(
        base_dir: PathBuf,
        cohort_source: impl CohortSource,
        config: DatedConfig,
    ) -> Result<Self, EngineError> {
        let cohort = fp_core::normalize_cohort(cohort_source);
        let cohort_dir = base_dir.join(&cohort);
        std::fs::create_dir_all(&cohort_dir).map_err(|e| EngineError::Io {
            path: cohort_dir.clone(),
            source: e,
        })?;

        let wal_segments_exist = !fp_durability::wal::list_segment_sequences(&cohort_dir)
            .map(|seqs| seqs.is_empty())
            .unwrap_or(true);
        let lock = CohortLock::acquire(&base_dir, &cohort, wal_segments_exist)?;

        let db_path = db_path_for_cohort(&cohort_dir);
        let mut store = DatedStore::open(&db_path, config.extra_schema.clone())?;

        let cache = DatedCache::new();
        for row in store.load_all()? {
            cache.insert(row.identity, row.data);
        }

        let wal = WalWriter::open(cohort_dir.clone(), config.wal.clone())?;

        let pending = DatedPendingLedger::new();
        crate::recovery::replay_dated_wal(&cohort_dir, &cache, &pending)?;

        let shared = Arc::new(Shared {
            store: Mutex::new(store),
            pending,
            wal: Mutex::new(wal),
        });

        if !shared.pending.is_empty() {
            shared.flush_and_retire()?;
        }

        let flush_shared = Arc::clone(&shared);
        let background = BackgroundFlusher::spawn(
            &format!("fp-dated-flush-{cohort}"),
            config.flush_interval,
            move || {
                if let Err(err) = flush_shared.flush_and_retire() {
                    tracing::error!(error = %err, "background flush failed, writes restored to pending");
                }
            },
        );

        Ok(DatedEngine {
            cohort,
            cohort_dir,
            lock: Some(lock),
            shared,
            cache,
            flusher: Some(background),
            config,
        })
    }

    /// Store `data` under `key`, scoped to `process_name`. Any of
    /// `process_name`, `timestamp`, `username` left `None` are resolved
    /// from the matching well-known field inside `data`, then from a
    /// default (current time for the timestamp, absent otherwise).
    pub fn store(
        &self,
        key: impl Into<String>,
        data: JsonValue,
        process_name: Option<String>,
        timestamp: Option<String>,
        username: Option<String>,
    ) -> Result<(), EngineError> {
        let key = key.into();
        let process_name = process_name.or_else(|| field_string(&data, "process_name"));
        let timestamp_str = timestamp.or_else(|| field_string(&data, "timestamp"));
        let username = username.or_else(|| field_string(&data, "username"));

        let resolved_instant = timestamp_str
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(now);
        let resolved_timestamp = timestamp_str.unwrap_or_else(|| serialize_timestamp(resolved_instant));

        let mut data_with_metadata = match data.clone() {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        data_with_metadata.insert("timestamp".to_string(), JsonValue::String(resolved_timestamp.clone()));
        if let Some(username) = &username {
            data_with_metadata.insert("username".to_string(), JsonValue::String(username.clone()));
        }
        data_with_metadata.insert(
            "process_name".to_string(),
            process_name.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
        );
        let data_with_metadata = JsonValue::Object(data_with_metadata);

        let identity = DatedIdentity::new(key.clone(), process_name.clone());
        self.cache.insert(identity.clone(), data_with_metadata.clone());
        self.shared.pending.record(
            identity,
            PendingDatedWrite {
                data: data_with_metadata,
                timestamp: Some(resolved_instant),
                status: field_string(&data, "status"),
                status_int: data.get("status_int").and_then(JsonValue::as_i64),
                username: username.clone(),
            },
        );

        let record = WalRecord::Dated {
            key,
            process_name,
            data,
            username,
            timestamp: resolved_timestamp,
        };
        let outcome = self.shared.wal.lock().append(&record)?;
        if outcome.rotated {
            if let Some(flusher) = &self.flusher {
                flusher.trigger();
            }
        }
        Ok(())
    }

    /// All process entries cached for `key`, or `None` if nothing has
    /// been seen for it.
    pub fn get_key(&self, key: &str) -> Option<std::collections::HashMap<Option<String>, JsonValue>> {
        let entries = self.cache.get_by_key(key);
        if entries.is_empty() {
            None
        } else {
            Some(entries)
        }
    }

    /// The cached payload for one `(key, process_name)` identity.
    pub fn get_key_process(&self, key: &str, process_name: Option<String>) -> Option<JsonValue> {
        self.cache.get(&DatedIdentity::new(key, process_name))
    }

    /// Force an immediate flush: rotate the open WAL segment (if any)
    /// and run the flush synchronously, surfacing any failure to the
    /// caller.
    pub fn flush(&self) -> Result<usize, EngineError> {
        self.shared.wal.lock().rotate_if_open()?;
        self.shared.flush_and_retire()
    }

    /// Clean shutdown: stop the background worker, run a final flush,
    /// optionally export to Parquet, close the WAL, delete its
    /// segments, and release the cohort lock.
    pub fn close(mut self) -> Result<(), EngineError> {
        if let Some(flusher) = self.flusher.take() {
            flusher.shutdown();
        }

        self.shared.wal.lock().rotate_if_open()?;
        flusher::flush_dated(&self.shared.pending, &mut self.shared.store.lock())?;

        if let Some(parquet_path) = &self.config.parquet_path {
            let store = self.shared.store.lock();
            if let Err(err) = store.export_parquet(&self.cohort, parquet_path) {
                tracing::error!(error = %err, "parquet export failed on close");
            }
        }

        let mut wal = self.shared.wal.lock();
        wal.close_current()?;
        for seq in wal.list_segments()? {
            let _ = std::fs::remove_file(fp_durability::wal::WalSegment::segment_path(&self.cohort_dir, seq));
        }
        drop(wal);

        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }
}

fn field_string(data: &JsonValue, field: &str) -> Option<String> {
    data.get(field).and_then(JsonValue::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_then_read_back_from_cache() {
        let dir = tempdir().unwrap();
        let engine = DatedEngine::open(dir.path().to_path_buf(), "2024-01-01", DatedConfig::for_testing()).unwrap();
        engine
            .store("widget", serde_json::json!({"x": 1}), None, None, None)
            .unwrap();
        let value = engine.get_key_process("widget", None).unwrap();
        assert_eq!(value["x"], 1);
        engine.close().unwrap();
    }

    #[test]
    fn flush_persists_to_store_and_empties_pending() {
        let dir = tempdir().unwrap();
        let engine = DatedEngine::open(dir.path().to_path_buf(), "2024-01-01", DatedConfig::for_testing()).unwrap();
        engine
            .store("k", serde_json::json!({"a": 1}), Some("proc".to_string()), None, None)
            .unwrap();
        let flushed = engine.flush().unwrap();
        assert_eq!(flushed, 1);
        assert!(engine.shared.pending.is_empty());
        engine.close().unwrap();
    }

    #[test]
    fn flush_retires_every_segment_but_the_current_one() {
        let dir = tempdir().unwrap();
        let engine = DatedEngine::open(dir.path().to_path_buf(), "2024-01-01", DatedConfig::for_testing()).unwrap();
        engine
            .store("k", serde_json::json!({"a": 1}), None, None, None)
            .unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.shared.wal.lock().list_segments().unwrap().len(), 1);
        engine.close().unwrap();
    }

    #[test]
    fn reopen_recovers_from_wal_without_prior_flush() {
        let dir = tempdir().unwrap();
        {
            let engine = DatedEngine::open(dir.path().to_path_buf(), "2024-02-02", DatedConfig::for_testing()).unwrap();
            engine
                .store("k", serde_json::json!({"a": 1}), None, None, None)
                .unwrap();
            if let Some(flusher) = engine.flusher.as_ref() {
                flusher.trigger();
            }
            // drop without close(): simulates a crash, lock file left behind goes stale.
            std::mem::forget(engine);
        }
        std::thread::sleep(Duration::from_millis(10));
        // Force the lock stale by backdating it.
        let lock_path = CohortLock::lock_path(dir.path(), "2024-02-02");
        let old = std::time::SystemTime::now() - Duration::from_secs(10);
        filetime::set_file_mtime(&lock_path, filetime::FileTime::from_system_time(old)).unwrap();

        let engine = DatedEngine::open(dir.path().to_path_buf(), "2024-02-02", DatedConfig::for_testing()).unwrap();
        let value = engine.get_key_process("k", None).unwrap();
        assert_eq!(value["a"], 1);
        engine.close().unwrap();
    }
}
