//! Replays a cohort's WAL segments into an engine's cache and pending
//! ledger on open, as if every record's `store()` call had just been
//! accepted. Also hosts the entry points used to rebuild a column
//! store from its WAL after a corrupt-file restart, per the runbooks
//! in [`fp_store::StoreError`].

use std::path::Path;

use fp_core::{parse_timestamp, CollectionIdentity, DatedIdentity, ScalarValue};
use fp_durability::{replay_all, WalRecord};
use serde_json::Value as JsonValue;

use crate::cache::{
    CollectionCache, CollectionPendingLedger, DatedCache, DatedPendingLedger, ModifiedSet,
    PendingCollectionWrite, PendingDatedWrite,
};
use crate::error::EngineError;

/// Replay every WAL segment under `cohort_dir` into the dated engine's
/// cache and pending ledger.
pub fn replay_dated_wal(
    cohort_dir: &Path,
    cache: &DatedCache,
    pending: &DatedPendingLedger,
) -> Result<(), EngineError> {
    let stats = replay_all(cohort_dir, |record| {
        if let WalRecord::Dated {
            key,
            process_name,
            data,
            username,
            timestamp,
        } = record
        {
            let status = field_string(&data, "status");
            let status_int = data.get("status_int").and_then(JsonValue::as_i64);

            let mut merged = as_object(data);
            merged.insert("timestamp".to_string(), JsonValue::String(timestamp.clone()));
            if let Some(username) = &username {
                merged.insert("username".to_string(), JsonValue::String(username.clone()));
            }
            merged.insert(
                "process_name".to_string(),
                process_name.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
            );
            let merged = JsonValue::Object(merged);

            let identity = DatedIdentity::new(key, process_name);
            cache.insert(identity.clone(), merged.clone());
            pending.record(
                identity,
                PendingDatedWrite {
                    data: merged,
                    timestamp: parse_timestamp(&timestamp),
                    status,
                    status_int,
                    username,
                },
            );
        }
    })?;

    if stats.records_replayed > 0 {
        tracing::info!(
            segments = stats.segments_replayed,
            records = stats.records_replayed,
            corrupt = stats.corrupt_lines_skipped,
            "recovered dated WAL records on open"
        );
    }
    Ok(())
}

/// Replay every WAL segment under `cohort_dir` into the collection
/// engine's cache, pending ledger, and modified-identity set.
pub fn replay_collection_wal(
    cohort_dir: &Path,
    cache: &CollectionCache,
    pending: &CollectionPendingLedger,
    modified: &ModifiedSet,
) -> Result<(), EngineError> {
    let stats = replay_all(cohort_dir, |record| {
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

            let mut without_value = as_object(data);
            without_value.insert("timestamp".to_string(), JsonValue::String(timestamp.clone()));
            if let Some(username) = &username {
                without_value.insert("username".to_string(), JsonValue::String(username.clone()));
            }
            let without_value = JsonValue::Object(without_value);

            let mut with_value = match without_value.clone() {
                JsonValue::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            with_value.insert("value".to_string(), value.to_json());
            let with_value = JsonValue::Object(with_value);

            let identity = CollectionIdentity::new(key, collection_name, item_name);
            cache.insert(identity.clone(), with_value);
            modified.mark(identity.clone());
            pending.record(
                identity,
                PendingCollectionWrite {
                    data: without_value,
                    value,
                    timestamp: parse_timestamp(&timestamp),
                    status,
                    status_int,
                    username,
                },
            );
        }
    })?;

    if stats.records_replayed > 0 {
        tracing::info!(
            segments = stats.segments_replayed,
            records = stats.records_replayed,
            corrupt = stats.corrupt_lines_skipped,
            "recovered collection WAL records on open"
        );
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

#[cfg(test)]
mod tests {
    use super::*;
    use fp_durability::{WalConfig, WalWriter};
    use tempfile::tempdir;

    #[test]
    fn replay_dated_wal_restores_cache_and_pending() {
        let dir = tempdir().unwrap();
        let cohort_dir = dir.path().join("2024-01-01");
        let mut writer = WalWriter::open(cohort_dir.clone(), WalConfig::for_testing()).unwrap();
        writer
            .append(&WalRecord::Dated {
                key: "k".to_string(),
                process_name: Some("proc".to_string()),
                data: serde_json::json!({"a": 1}),
                username: None,
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            })
            .unwrap();

        let cache = DatedCache::new();
        let pending = DatedPendingLedger::new();
        replay_dated_wal(&cohort_dir, &cache, &pending).unwrap();

        let identity = DatedIdentity::new("k", Some("proc".to_string()));
        let cached = cache.get(&identity).unwrap();
        assert_eq!(cached["a"], 1);
        assert!(!pending.is_empty());
    }

    #[test]
    fn replay_collection_wal_mirrors_value_and_marks_modified() {
        let dir = tempdir().unwrap();
        let cohort_dir = dir.path().join("2024-01-01");
        let mut writer = WalWriter::open(cohort_dir.clone(), WalConfig::for_testing()).unwrap();
        writer
            .append(&WalRecord::Collection {
                key: "k".to_string(),
                collection_name: "c".to_string(),
                item_name: "i".to_string(),
                data: serde_json::json!({}),
                value: ScalarValue::Int(7),
                username: None,
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            })
            .unwrap();

        let cache = CollectionCache::new();
        let pending = CollectionPendingLedger::new();
        let modified = ModifiedSet::new();
        replay_collection_wal(&cohort_dir, &cache, &pending, &modified).unwrap();

        let identity = CollectionIdentity::new("k", "c", "i");
        let cached = cache.get_item(&identity).unwrap();
        assert_eq!(cached["value"], 7);
        assert_eq!(modified.take_all(), vec![identity]);
    }
}
