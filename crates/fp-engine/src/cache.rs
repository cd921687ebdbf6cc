//! The in-memory read path: a cache of the latest known value per
//! identity, and a pending ledger of writes not yet flushed to the
//! column store.
//!
//! Both engine variants keep reads entirely in memory — `get_*` never
//! touches DuckDB unless the identity's collection hasn't been
//! hydrated yet (collection engine only). Writes go to both the cache
//! (for immediate read-your-writes) and the pending ledger (for the
//! next flush).

use std::collections::HashMap;

use dashmap::DashMap;
use fp_core::{CollectionIdentity, DatedIdentity, Instant, ScalarValue};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

/// One write not yet flushed, for the dated engine. Last-write-wins per
/// identity: a second `store()` for the same identity before a flush
/// overwrites the first in the pending ledger, exactly as the cache
/// does — only the flushed row reflects the latest write, never an
/// intermediate one.
#[derive(Debug, Clone)]
pub struct PendingDatedWrite {
    pub data: JsonValue,
    pub timestamp: Option<Instant>,
    pub status: Option<String>,
    pub status_int: Option<i64>,
    pub username: Option<String>,
}

/// One write not yet flushed, for the collection engine. Unlike the
/// dated engine, every write is kept — each becomes its own row in
/// `storage_history` at flush time, so the pending ledger accumulates a
/// list per identity rather than overwriting.
#[derive(Debug, Clone)]
pub struct PendingCollectionWrite {
    pub data: JsonValue,
    pub value: ScalarValue,
    pub timestamp: Option<Instant>,
    pub status: Option<String>,
    pub status_int: Option<i64>,
    pub username: Option<String>,
}

/// The dated engine's cache: the latest payload per `(key,
/// process_name)`, read without touching the store.
#[derive(Default)]
pub struct DatedCache {
    data: DashMap<DatedIdentity, JsonValue>,
}

impl DatedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: DatedIdentity, data: JsonValue) {
        self.data.insert(identity, data);
    }

    pub fn get(&self, identity: &DatedIdentity) -> Option<JsonValue> {
        self.data.get(identity).map(|entry| entry.clone())
    }

    /// All records for `key`, across every process name — the shape
    /// `get_key` with no process filter returns.
    pub fn get_by_key(&self, key: &str) -> HashMap<Option<String>, JsonValue> {
        self.data
            .iter()
            .filter(|entry| entry.key().key == key)
            .map(|entry| (entry.key().process_name.clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Last-write-wins pending ledger for the dated engine.
#[derive(Default)]
pub struct DatedPendingLedger {
    inner: Mutex<HashMap<DatedIdentity, PendingDatedWrite>>,
}

impl DatedPendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, identity: DatedIdentity, write: PendingDatedWrite) {
        self.inner.lock().insert(identity, write);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Atomically take everything pending, leaving the ledger empty —
    /// the snapshot the flusher works from while new writes can still
    /// land in a fresh, empty ledger underneath it.
    pub fn take_all(&self) -> HashMap<DatedIdentity, PendingDatedWrite> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Merge writes back in after a failed flush. Existing entries for
    /// the same identity (written after the failed batch was taken) are
    /// not overwritten by the restored ones — a newer write must win
    /// over a stale one being put back.
    pub fn restore(&self, writes: HashMap<DatedIdentity, PendingDatedWrite>) {
        let mut guard = self.inner.lock();
        for (identity, write) in writes {
            guard.entry(identity).or_insert(write);
        }
    }
}

/// The collection engine's cache: nested by `(key, collection_name)`
/// then `item_name`, hydrated lazily from the latest-value store on
/// first touch.
#[derive(Default)]
pub struct CollectionCache {
    data: DashMap<CollectionIdentity, JsonValue>,
    loaded: DashMap<(String, String), ()>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, key: &str, collection_name: &str) -> bool {
        self.loaded
            .contains_key(&(key.to_string(), collection_name.to_string()))
    }

    pub fn mark_loaded(&self, key: &str, collection_name: &str) {
        self.loaded
            .insert((key.to_string(), collection_name.to_string()), ());
    }

    pub fn insert(&self, identity: CollectionIdentity, data: JsonValue) {
        self.data.insert(identity, data);
    }

    pub fn get_item(&self, identity: &CollectionIdentity) -> Option<JsonValue> {
        self.data.get(identity).map(|entry| entry.clone())
    }

    /// All items in one collection, keyed by item name.
    pub fn get_collection(&self, key: &str, collection_name: &str) -> HashMap<String, JsonValue> {
        self.data
            .iter()
            .filter(|entry| entry.key().key == key && entry.key().collection_name == collection_name)
            .map(|entry| (entry.key().item_name.clone(), entry.value().clone()))
            .collect()
    }

    /// Every collection under `key`, each mapped to its items.
    pub fn get_key(&self, key: &str) -> HashMap<String, HashMap<String, JsonValue>> {
        let mut grouped: HashMap<String, HashMap<String, JsonValue>> = HashMap::new();
        for entry in self.data.iter() {
            if entry.key().key != key {
                continue;
            }
            grouped
                .entry(entry.key().collection_name.clone())
                .or_default()
                .insert(entry.key().item_name.clone(), entry.value().clone());
        }
        grouped
    }

    /// `true` if any item under `key` has ever been seen (read or
    /// written) — used to answer "does this key exist at all".
    pub fn has_key(&self, key: &str) -> bool {
        self.data.iter().any(|entry| entry.key().key == key)
    }
}

/// Append-only pending ledger for the collection engine: every write
/// for an identity is kept until flush, since each becomes its own
/// history row.
#[derive(Default)]
pub struct CollectionPendingLedger {
    inner: Mutex<HashMap<CollectionIdentity, Vec<PendingCollectionWrite>>>,
}

impl CollectionPendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, identity: CollectionIdentity, write: PendingCollectionWrite) {
        self.inner.lock().entry(identity).or_default().push(write);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn take_all(&self) -> HashMap<CollectionIdentity, Vec<PendingCollectionWrite>> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Merge writes back in after a failed flush, prepending the
    /// restored writes so their order relative to any writes that
    /// landed during the failed flush attempt is preserved.
    pub fn restore(&self, writes: HashMap<CollectionIdentity, Vec<PendingCollectionWrite>>) {
        let mut guard = self.inner.lock();
        for (identity, mut restored) in writes {
            match guard.get_mut(&identity) {
                Some(existing) => {
                    restored.append(existing);
                    *existing = restored;
                }
                None => {
                    guard.insert(identity, restored);
                }
            }
        }
    }
}

/// Tracks which collection identities have been written since the last
/// `storage_latest` refresh. Drained by `update_latest`/`close` rather
/// than rewriting the latest row for every cached item on every flush.
#[derive(Default)]
pub struct ModifiedSet {
    data: DashMap<CollectionIdentity, ()>,
}

impl ModifiedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, identity: CollectionIdentity) {
        self.data.insert(identity, ());
    }

    /// Drain every tracked identity, leaving the set empty.
    pub fn take_all(&self) -> Vec<CollectionIdentity> {
        let ids: Vec<_> = self.data.iter().map(|entry| entry.key().clone()).collect();
        for id in &ids {
            self.data.remove(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_pending_is_last_write_wins() {
        let ledger = DatedPendingLedger::new();
        let id = DatedIdentity::new("k", None);
        ledger.record(
            id.clone(),
            PendingDatedWrite {
                data: serde_json::json!({"v": 1}),
                timestamp: None,
                status: None,
                status_int: None,
                username: None,
            },
        );
        ledger.record(
            id.clone(),
            PendingDatedWrite {
                data: serde_json::json!({"v": 2}),
                timestamp: None,
                status: None,
                status_int: None,
                username: None,
            },
        );
        let taken = ledger.take_all();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken.get(&id).unwrap().data, serde_json::json!({"v": 2}));
    }

    #[test]
    fn collection_pending_accumulates_every_write() {
        let ledger = CollectionPendingLedger::new();
        let id = CollectionIdentity::new("k", "c", "i");
        for v in 0..3 {
            ledger.record(
                id.clone(),
                PendingCollectionWrite {
                    data: serde_json::json!({}),
                    value: ScalarValue::Int(v),
                    timestamp: None,
                    status: None,
                    status_int: None,
                    username: None,
                },
            );
        }
        let taken = ledger.take_all();
        assert_eq!(taken.get(&id).unwrap().len(), 3);
    }

    #[test]
    fn take_all_empties_the_ledger() {
        let ledger = DatedPendingLedger::new();
        ledger.record(
            DatedIdentity::new("k", None),
            PendingDatedWrite {
                data: serde_json::json!({}),
                timestamp: None,
                status: None,
                status_int: None,
                username: None,
            },
        );
        assert!(!ledger.is_empty());
        ledger.take_all();
        assert!(ledger.is_empty());
    }

    #[test]
    fn cache_get_by_key_groups_across_process_names() {
        let cache = DatedCache::new();
        cache.insert(DatedIdentity::new("k", None), serde_json::json!({"p": "none"}));
        cache.insert(
            DatedIdentity::new("k", Some("proc-a".to_string())),
            serde_json::json!({"p": "a"}),
        );
        cache.insert(DatedIdentity::new("other", None), serde_json::json!({}));

        let grouped = cache.get_by_key("k");
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn modified_set_take_all_drains_once() {
        let modified = ModifiedSet::new();
        modified.mark(CollectionIdentity::new("k", "c", "i1"));
        modified.mark(CollectionIdentity::new("k", "c", "i2"));
        let taken = modified.take_all();
        assert_eq!(taken.len(), 2);
        assert!(modified.take_all().is_empty());
    }
}
