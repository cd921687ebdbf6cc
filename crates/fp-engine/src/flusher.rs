//! Moves a pending batch from the in-memory ledger into the column
//! store, allocating versions against the store's own max-version
//! query and rolling a failed batch back into pending rather than
//! losing it.

use std::collections::HashMap;

use fp_core::{CollectionIdentity, DatedIdentity};
use fp_store::{CollectionRow, CollectionStore, DatedRow, DatedStore};

use crate::cache::{
    CollectionPendingLedger, DatedPendingLedger, PendingCollectionWrite, PendingDatedWrite,
};
use crate::error::EngineError;

/// Drain the dated engine's pending ledger and upsert it into `store`
/// in one transaction. On failure the whole batch is restored to the
/// ledger so a later flush attempt can retry it, mirroring the
/// original implementation's rollback-then-restore behavior rather
/// than dropping writes that failed to persist.
pub fn flush_dated(ledger: &DatedPendingLedger, store: &mut DatedStore) -> Result<usize, EngineError> {
    let writes = ledger.take_all();
    if writes.is_empty() {
        return Ok(0);
    }

    match try_flush_dated(store, &writes) {
        Ok(count) => Ok(count),
        Err(err) => {
            let record_count = writes.len();
            ledger.restore(writes);
            Err(EngineError::FlushFailed { record_count, source: err })
        }
    }
}

fn try_flush_dated(
    store: &mut DatedStore,
    writes: &HashMap<DatedIdentity, PendingDatedWrite>,
) -> Result<usize, fp_store::StoreError> {
    let mut batch = Vec::with_capacity(writes.len());
    for (identity, write) in writes {
        let next_version = store.max_version(identity)? + 1;
        batch.push((
            DatedRow {
                identity: identity.clone(),
                data: write.data.clone(),
                timestamp: write.timestamp,
                status: write.status.clone(),
                status_int: write.status_int,
                username: write.username.clone(),
            },
            next_version,
        ));
    }
    let count = batch.len();
    store.upsert_batch(&batch)?;
    Ok(count)
}

/// Drain the collection engine's pending ledger into `store`'s history
/// table. Every queued write for an identity gets its own,
/// consecutively increasing version — the original implementation
/// reads the current max version once per identity, then increments it
/// locally for each update in that identity's list rather than
/// re-querying the store after every row.
pub fn flush_collection_history(
    ledger: &CollectionPendingLedger,
    store: &mut CollectionStore,
) -> Result<usize, EngineError> {
    let writes = ledger.take_all();
    if writes.is_empty() {
        return Ok(0);
    }

    match try_flush_collection_history(store, &writes) {
        Ok(count) => Ok(count),
        Err(err) => {
            let record_count = writes.values().map(|v| v.len()).sum();
            ledger.restore(writes);
            Err(EngineError::FlushFailed { record_count, source: err })
        }
    }
}

fn try_flush_collection_history(
    store: &mut CollectionStore,
    writes: &HashMap<CollectionIdentity, Vec<PendingCollectionWrite>>,
) -> Result<usize, fp_store::StoreError> {
    let mut batch = Vec::new();
    for (identity, updates) in writes {
        let mut version = store.max_version(identity)?;
        for write in updates {
            version += 1;
            batch.push((
                CollectionRow {
                    identity: identity.clone(),
                    data: write.data.clone(),
                    value: write.value.clone(),
                    timestamp: write.timestamp,
                    status: write.status.clone(),
                    status_int: write.status_int,
                    username: write.username.clone(),
                },
                version,
            ));
        }
    }
    let count = batch.len();
    store.append_history_batch(&batch)?;
    Ok(count)
}

/// Replace the latest-value row for a set of modified identities, each
/// sourced from the cache's current value — the original implementation
/// tracks a `modified_records` set and rereads the cache rather than
/// reusing whatever was last pending, since a read after a write that
/// hasn't flushed yet must already reflect the cache's merged state.
pub fn update_latest(
    store: &mut CollectionStore,
    rows: Vec<CollectionRow>,
) -> Result<usize, EngineError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let count = rows.len();
    store.replace_latest_batch(&rows)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_core::{now, ExtraSchema, ScalarValue};

    #[test]
    fn dated_flush_allocates_sequential_versions() {
        let ledger = DatedPendingLedger::new();
        let id = DatedIdentity::new("k", None);
        ledger.record(
            id.clone(),
            PendingDatedWrite {
                data: serde_json::json!({"v": 1}),
                timestamp: Some(now()),
                status: None,
                status_int: None,
                username: None,
            },
        );
        let mut store = DatedStore::open_in_memory(ExtraSchema::default()).unwrap();
        let flushed = flush_dated(&ledger, &mut store).unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(store.max_version(&id).unwrap(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn collection_flush_assigns_consecutive_versions_per_identity() {
        let ledger = CollectionPendingLedger::new();
        let id = CollectionIdentity::new("k", "c", "i");
        for v in 0..3 {
            ledger.record(
                id.clone(),
                PendingCollectionWrite {
                    data: serde_json::json!({}),
                    value: ScalarValue::Int(v),
                    timestamp: Some(now()),
                    status: None,
                    status_int: None,
                    username: None,
                },
            );
        }
        let mut store = CollectionStore::open_in_memory(ExtraSchema::default()).unwrap();
        let flushed = flush_collection_history(&ledger, &mut store).unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(store.max_version(&id).unwrap(), 3);
    }

    #[test]
    fn empty_ledger_flushes_nothing() {
        let ledger = DatedPendingLedger::new();
        let mut store = DatedStore::open_in_memory(ExtraSchema::default()).unwrap();
        assert_eq!(flush_dated(&ledger, &mut store).unwrap(), 0);
    }
}
