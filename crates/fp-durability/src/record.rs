//! The JSON shape of a single WAL record.
//!
//! One `WalRecord` is one line in a WAL segment. The two engine
//! variants write structurally different records — a dated record
//! carries a whole JSON payload, a collection record carries one typed
//! scalar — so this is a tagged enum rather than one flat struct with
//! optional fields, keeping a record's fields meaningful for the
//! variant that wrote it.
//!
//! Neither variant carries a `version` field: the flusher is the sole
//! allocator of versions, recomputing them at flush time against the
//! live column store, so replaying a segment must reproduce the same
//! state a direct write would have produced without one.

use fp_core::ScalarValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single durable write, as it appears on one WAL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalRecord {
    /// A write made through the dated engine.
    Dated {
        /// The record's key.
        key: String,
        /// The process name the record is scoped to, or `None`.
        process_name: Option<String>,
        /// The stored JSON payload (caller's original `data`, well-known
        /// fields are re-derived from it on replay).
        data: JsonValue,
        /// The username associated with the write, or `None`.
        username: Option<String>,
        /// ISO-8601 timestamp of the write.
        timestamp: String,
    },
    /// A write made through the collection engine.
    Collection {
        /// The record's key.
        key: String,
        /// The collection the record belongs to.
        collection_name: String,
        /// The item name within the collection.
        item_name: String,
        /// The stored JSON payload, excluding `value`.
        data: JsonValue,
        /// The typed scalar value written, preserved in its native
        /// JSON type.
        value: ScalarValue,
        /// The username associated with the write, or `None`.
        username: Option<String>,
        /// ISO-8601 timestamp of the write.
        timestamp: String,
    },
}

impl WalRecord {
    /// The ISO-8601 timestamp carried by this record, regardless of
    /// variant.
    pub fn timestamp(&self) -> &str {
        match self {
            WalRecord::Dated { timestamp, .. } => timestamp,
            WalRecord::Collection { timestamp, .. } => timestamp,
        }
    }

    /// Serialize to the single-line JSON form written to a segment.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a single WAL line back into a record.
    pub fn from_line(line: &str) -> serde_json::Result<WalRecord> {
        serde_json::from_str(line)
    }
}
