//! The collection engine façade: `store`/`get_collection`/`get_item`/
//! `flush`/`close` over a shared `storage_history`/`storage_latest`
//! pair plus one cohort's WAL segments.
//!
//! Unlike the dated engine, the two column-store files are not scoped
//! to a cohort — every cohort this engine is ever opened against
//! shares the same `storage_history.duckdb`/`storage_latest.duckdb`
//! under `base_dir`. Only the WAL segments, the cohort lock, and the
//! `.backup` copies made on close are per-cohort.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate};
use fp_core::{now, parse_timestamp, serialize_timestamp, CohortSource, CollectionIdentity, ScalarValue};
use fp_durability::{CohortLock, WalRecord, WalWriter};
use fp_store::{history_db_path_for_cohort, latest_db_path_for_cohort, CollectionRow, CollectionStore};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::background::BackgroundFlusher;
use crate::cache::{CollectionCache, CollectionPendingLedger, ModifiedSet, PendingCollectionWrite};
use crate::config::CollectionConfig;
use crate::error::EngineError;
use crate::flusher;

struct Shared {
    store: Mutex<CollectionStore>,
    pending: CollectionPendingLedger,
    wal: Mutex<WalWriter>,
}

impl Shared {
    /// Flush pending history writes and, on success, retire every WAL
    /// segment but the currently open one — the spec's §4.F step 3:
    /// segment deletion only ever follows a *committed* batch, since
    /// the committed batch is a strict superset of what those segments
    /// contain.
    fn flush_and_retire(&self) -> Result<usize, EngineError> {
        let flushed = flusher::flush_collection_history(&self.pending, &mut self.store.lock())?;
        self.wal.lock().retire_all_but_current()?;
        Ok(flushed)
    }
}

/// An open collection-engine instance for one cohort.
pub struct CollectionEngine {
    cohort: String,
    base_dir: PathBuf,
    cohort_dir: PathBuf,
    lock: Option<CohortLock>,
    shared: Arc<Shared>,
    cache: CollectionCache,
    modified: ModifiedSet,
    flusher: Option<BackgroundFlusher>,
    config: CollectionConfig,
}

impl CollectionEngine {
    /// Open (or recover) the engine for `cohort_source`'s cohort under
    /// `base_dir`. Acquires the cohort lock, opens the shared history
    /// and latest databases, replays this cohort's WAL into the cache
    /// and pending ledger, flushes whatever was recovered, and starts
    /// the background flush worker.
    pub fn open(
        base_dir: PathBuf,
        cohort_source: impl CohortSource,
        config: CollectionConfig,
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

        let history_db_path = history_db_path_for_cohort(&base_dir);
        let latest_db_path = latest_db_path_for_cohort(&base_dir);
        let store = CollectionStore::open(&history_db_path, &latest_db_path, config.extra_schema.clone())?;

        let cache = CollectionCache::new();
        let wal = WalWriter::open(cohort_dir.clone(), config.wal.clone())?;

        let pending = CollectionPendingLedger::new();
        let modified = ModifiedSet::new();
        crate::recovery::replay_collection_wal(&cohort_dir, &cache, &pending, &modified)?;

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
            &format!("fp-collection-flush-{cohort}"),
            config.flush_interval,
            move || {
                if let Err(err) = flush_shared.flush_and_retire() {
                    tracing::error!(error = %err, "background flush failed, writes restored to pending");
                }
            },
        );

        Ok(CollectionEngine {
            cohort,
            base_dir,
            cohort_dir,
            lock: Some(lock),
            shared,
            cache,
            modified,
            flusher: Some(background),
            config,
        })
    }

    /// Store `value` (plus any free-form `data`) under `(key,
    /// collection_name, item_name)`. `timestamp`/`username` left `None`
    /// are resolved from the matching field inside `data`, then from a
    /// default (current time for the timestamp, absent otherwise).
    pub fn store(
        &self,
        key: impl Into<String>,
        data: JsonValue,
        collection_name: Option<String>,
        item_name: Option<String>,
        value: Option<ScalarValue>,
        timestamp: Option<String>,
        username: Option<String>,
    ) -> Result<(), EngineError> {
        let key = key.into();
        let collection_name = collection_name.unwrap_or_default();
        let item_name = item_name.unwrap_or_default();

        self.hydrate(&key, &collection_name)?;

        let timestamp_str = timestamp.or_else(|| field_string(&data, "timestamp"));
        let resolved_instant = timestamp_str.as_deref().and_then(parse_timestamp).unwrap_or_else(now);
        let resolved_timestamp = timestamp_str.unwrap_or_else(|| serialize_timestamp(resolved_instant));
        let username = username.or_else(|| field_string(&data, "username"));
        let scalar = value.unwrap_or(ScalarValue::Null);

        let status = field_string(&data, "status");
        let status_int = data.get("status_int").and_then(JsonValue::as_i64);

        let mut without_value = as_object(data.clone());
        without_value.insert("timestamp".to_string(), JsonValue::String(resolved_timestamp.clone()));
        if let Some(username) = &username {
            without_value.insert("username".to_string(), JsonValue::String(username.clone()));
        }
        let without_value = JsonValue::Object(without_value);

        let mut with_value = match without_value.clone() {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        with_value.insert("value".to_string(), scalar.to_json());
        let with_value = JsonValue::Object(with_value);

        let identity = CollectionIdentity::new(key.clone(), collection_name.clone(), item_name.clone());
        self.cache.insert(identity.clone(), with_value);
        self.modified.mark(identity.clone());
        self.shared.pending.record(
            identity,
            PendingCollectionWrite {
                data: without_value,
                value: scalar.clone(),
                timestamp: Some(resolved_instant),
                status,
                status_int,
                username: username.clone(),
            },
        );

        let record = WalRecord::Collection {
            key,
            collection_name,
            item_name,
            data,
            value: scalar,
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

    /// Every collection cached under `key`, or `None` if nothing has
    /// ever been cached for it. Does not hydrate — there is no single
    /// `(key, collection)` pair to fetch when no collection is named.
    pub fn get_key(&self, key: &str) -> Option<HashMap<String, HashMap<String, JsonValue>>> {
        if self.cache.has_key(key) {
            Some(self.cache.get_key(key))
        } else {
            None
        }
    }

    /// All items in one collection under `key`, hydrating it from
    /// `storage_latest` first if it hasn't been touched yet.
    pub fn get_collection(
        &self,
        key: &str,
        collection_name: &str,
    ) -> Result<Option<HashMap<String, JsonValue>>, EngineError> {
        self.hydrate(key, collection_name)?;
        let items = self.cache.get_collection(key, collection_name);
        Ok(if items.is_empty() { None } else { Some(items) })
    }

    /// The cached payload for one `(key, collection_name, item_name)`
    /// identity, hydrating its collection first if cold.
    pub fn get_item(
        &self,
        key: &str,
        collection_name: &str,
        item_name: &str,
    ) -> Result<Option<JsonValue>, EngineError> {
        self.hydrate(key, collection_name)?;
        Ok(self.cache.get_item(&CollectionIdentity::new(key, collection_name, item_name)))
    }

    /// Force an immediate flush of pending history writes: rotate the
    /// open WAL segment (if any) and run the flush synchronously.
    pub fn flush(&self) -> Result<usize, EngineError> {
        self.shared.wal.lock().rotate_if_open()?;
        self.shared.flush_and_retire()
    }

    /// Replace `storage_latest` for every identity touched since the
    /// last call, sourcing each row from the cache's current value
    /// rather than whatever was last pending.
    pub fn update_latest(&self) -> Result<usize, EngineError> {
        let identities = self.modified.take_all();
        if identities.is_empty() {
            return Ok(0);
        }
        let rows: Vec<CollectionRow> = identities
            .into_iter()
            .filter_map(|identity| self.cache.get_item(&identity).map(|payload| payload_to_row(identity, payload)))
            .collect();
        flusher::update_latest(&mut self.shared.store.lock(), rows)
    }

    /// Re-append this cohort's WAL into `storage_history` from scratch,
    /// allocating fresh versions past whatever is already present —
    /// the runbook for recovering from a deleted/corrupt history file.
    pub fn rebuild_history_from_wal(&self, cohort_source: impl CohortSource) -> Result<usize, EngineError> {
        let cohort = fp_core::normalize_cohort(cohort_source);
        let wal_dir = self.base_dir.join(&cohort);
        if !wal_dir.exists() {
            tracing::warn!(cohort, "no WAL directory found for rebuild_history_from_wal");
            return Ok(0);
        }

        let mut records = Vec::new();
        fp_durability::replay_all(&wal_dir, |record| {
            if let WalRecord::Collection {
                key,
                collection_name,
                item_name,
                data,
                value,
                username,
                timestamp,
            } = record
            {
                let status = field_string(&data, "status");
                let status_int = data.get("status_int").and_then(JsonValue::as_i64);
                records.push(CollectionRow {
                    identity: CollectionIdentity::new(key, collection_name, item_name),
                    data,
                    value,
                    timestamp: parse_timestamp(&timestamp),
                    status,
                    status_int,
                    username,
                });
            }
        })?;

        let recovered = self.shared.store.lock().rebuild_history_from_records(&records)?;
        tracing::info!(cohort, recovered, "rebuilt collection history from WAL");
        Ok(recovered)
    }

    /// Rebuild `storage_latest` entirely from the max-version row of
    /// each identity in `storage_history` — the runbook for recovering
    /// from a deleted/corrupt latest file.
    pub fn rebuild_latest_from_history(&self) -> Result<usize, EngineError> {
        Ok(self.shared.store.lock().rebuild_latest_from_history()?)
    }

    /// Clean shutdown: stop the background worker, run a final flush
    /// and latest-table refresh, close the column-store connections,
    /// back up both database files into the cohort directory, close
    /// the WAL and delete its segments, sweep cohort directories older
    /// than `retain_days`, and release the cohort lock.
    pub fn close(mut self) -> Result<(), EngineError> {
        if let Some(flusher) = self.flusher.take() {
            flusher.shutdown();
        }

        self.shared.wal.lock().rotate_if_open()?;
        flusher::flush_collection_history(&self.shared.pending, &mut self.shared.store.lock())?;
        self.update_latest()?;

        // Close the DuckDB connections before copying the database
        // files — a few platforms refuse to read a file with an open
        // write handle.
        let shared = Arc::try_unwrap(self.shared)
            .unwrap_or_else(|_| panic!("collection store still shared after background flusher joined"));
        drop(shared.store.into_inner());

        if let Err(err) = backup_databases(&self.base_dir, &self.cohort_dir) {
            tracing::error!(error = %err, cohort = %self.cohort, "failed to back up collection databases on close");
        }

        let mut wal = shared.wal.into_inner();
        wal.close_current()?;
        for seq in wal.list_segments()? {
            let _ = std::fs::remove_file(fp_durability::wal::WalSegment::segment_path(&self.cohort_dir, seq));
        }

        if let Err(err) = sweep_old_cohorts(&self.base_dir, self.config.retain_days) {
            tracing::error!(error = %err, "failed to sweep old cohort directories on close");
        }

        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    fn hydrate(&self, key: &str, collection_name: &str) -> Result<(), EngineError> {
        if self.cache.is_loaded(key, collection_name) {
            return Ok(());
        }
        let rows = self.shared.store.lock().load_latest_for_collection(key, collection_name)?;
        for row in rows {
            let identity = row.identity.clone();
            self.cache.insert(identity, row_to_payload(row));
        }
        self.cache.mark_loaded(key, collection_name);
        Ok(())
    }
}

fn row_to_payload(row: CollectionRow) -> JsonValue {
    let mut obj = as_object(row.data);
    obj.insert("value".to_string(), row.value.to_json());
    JsonValue::Object(obj)
}

fn payload_to_row(identity: CollectionIdentity, payload: JsonValue) -> CollectionRow {
    let value = payload
        .get("value")
        .cloned()
        .map(ScalarValue::from)
        .unwrap_or(ScalarValue::Null);
    let timestamp = payload.get("timestamp").and_then(JsonValue::as_str).and_then(parse_timestamp);
    let status = payload.get("status").and_then(JsonValue::as_str).map(str::to_string);
    let status_int = payload.get("status_int").and_then(JsonValue::as_i64);
    let username = payload.get("username").and_then(JsonValue::as_str).map(str::to_string);

    let mut data = as_object(payload);
    data.remove("value");

    CollectionRow {
        identity,
        data: JsonValue::Object(data),
        value,
        timestamp,
        status,
        status_int,
        username,
    }
}

fn backup_databases(base_dir: &Path, cohort_dir: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(cohort_dir).map_err(|e| EngineError::Io {
        path: cohort_dir.to_path_buf(),
        source: e,
    })?;
    for (name, backup_name) in [
        ("storage_history.duckdb", "storage_history.duckdb.backup"),
        ("storage_latest.duckdb", "storage_latest.duckdb.backup"),
    ] {
        let src = base_dir.join(name);
        if !src.exists() {
            continue;
        }
        let dest = cohort_dir.join(backup_name);
        std::fs::copy(&src, &dest).map_err(|e| EngineError::Io { path: dest, source: e })?;
    }
    Ok(())
}

fn sweep_old_cohorts(base_dir: &Path, retain_days: u64) -> Result<(), EngineError> {
    let cutoff = now().date_naive() - ChronoDuration::days(retain_days as i64);
    let entries = std::fs::read_dir(base_dir).map_err(|e| EngineError::Io {
        path: base_dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::Io {
            path: base_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Ok(cohort_date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
            continue;
        };
        if cohort_date < cutoff {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                tracing::error!(path = %path.display(), error = %e, "failed to remove old cohort directory");
            } else {
                tracing::info!(cohort = %name, "swept old cohort directory past retain_days");
            }
        }
    }
    Ok(())
}

fn field_string(data: &JsonValue, field: &str) -> Option<String> {
    data.get(field).and_then(JsonValue::as_str).map(str::to_string)
}

fn as_object(value: JsonValue) -> serde_json::Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
