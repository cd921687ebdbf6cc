//! The identity keys the two engine variants index storage by.
//!
//! The dated engine addresses a record by `(key, process_name)`; the
//! collection engine addresses one by the three-level `(key,
//! collection_name, item_name)`. Both are plain newtypes over a tuple
//! of owned strings rather than borrowed `&str` — identities are held
//! across cache/pending-ledger boundaries and across WAL replay, well
//! past the lifetime of any single write call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity of a record in the dated engine: a key scoped to a
/// process name.
///
/// `process_name` is `Option<String>` rather than a plain `String`:
/// the spec requires `NULL` and `""` to be preserved as distinct
/// identities across the full write/flush/recover cycle (a row keyed
/// by no process name is not the same row as one keyed by the empty
/// string), so the absent case can't be collapsed into the empty
/// string here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatedIdentity {
    /// The record's key.
    pub key: String,
    /// The process name the record is scoped to, or `None`.
    pub process_name: Option<String>,
}

impl DatedIdentity {
    /// Construct a new identity.
    pub fn new(key: impl Into<String>, process_name: Option<String>) -> Self {
        Self {
            key: key.into(),
            process_name,
        }
    }
}

impl fmt::Display for DatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_name.as_deref().unwrap_or("<none>"), self.key)
    }
}

/// The identity of a record in the collection engine: a key scoped to a
/// collection name and an item name within that collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionIdentity {
    /// The record's key.
    pub key: String,
    /// The collection name the record belongs to.
    pub collection_name: String,
    /// The item name within the collection.
    pub item_name: String,
}

impl CollectionIdentity {
    /// Construct a new identity.
    pub fn new(
        key: impl Into<String>,
        collection_name: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            collection_name: collection_name.into(),
            item_name: item_name.into(),
        }
    }
}

impl fmt::Display for CollectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.collection_name, self.key, self.item_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_identity_equality_by_value() {
        let a = DatedIdentity::new("k1", Some("proc-a".to_string()));
        let b = DatedIdentity::new("k1", Some("proc-a".to_string()));
        let c = DatedIdentity::new("k1", Some("proc-b".to_string()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dated_identity_none_and_empty_are_distinct() {
        let none = DatedIdentity::new("k1", None);
        let empty = DatedIdentity::new("k1", Some(String::new()));
        assert_ne!(none, empty);
    }

    #[test]
    fn collection_identity_display() {
        let id = CollectionIdentity::new("k1", "coll", "item");
        assert_eq!(id.to_string(), "coll/k1/item");
    }

    #[test]
    fn identities_are_hashable_for_cache_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(DatedIdentity::new("k1", Some("proc-a".to_string())), 1);
        assert_eq!(
            map.get(&DatedIdentity::new("k1", Some("proc-a".to_string()))),
            Some(&1)
        );
    }
}
