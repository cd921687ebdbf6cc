//! # fast-persist
//!
//! A durable, low-latency key/value persistence layer combining a
//! per-record append-only write-ahead log with an embedded column
//! store, in two variants.
//!
//! The **dated engine** keeps one column-store table per daily cohort
//! keyed by `(key, process_name)`, optionally exporting each cohort to
//! partitioned Parquet on close. The **collection engine** shares a
//! column store across every cohort it opens, keyed on the three-level
//! identity `(key, collection_name, item_name)`, splitting writes
//! between an append-only `history` table and a point-in-time `latest`
//! snapshot.
//!
//! Every write is fsynced to its cohort's WAL before `store()` returns;
//! the WAL is replayed into memory on open, so a crash before the next
//! flush never loses an acknowledged write.
//!
//! # Quick Start
//!
//! ```no_run
//! use fast_persist::{DatedEngine, DatedConfig};
//!
//! fn main() -> Result<(), fast_persist::EngineError> {
//!     let engine = DatedEngine::open(
//!         "./my-data".into(),
//!         "2024-01-01",
//!         DatedConfig::new(Default::default(), &[])?,
//!     )?;
//!
//!     engine.store("widget", serde_json::json!({"count": 1}), None, None, None)?;
//!     let value = engine.get_key_process("widget", None);
//!     assert_eq!(value.unwrap()["count"], 1);
//!
//!     engine.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Engine Variants
//!
//! | Variant | Identity | Storage | Notes |
//! |---------|----------|---------|-------|
//! | **Dated** | `(key, process_name)` | one `storage` table per cohort | optional Parquet export |
//! | **Collection** | `(key, collection_name, item_name)` | shared `storage_history`/`storage_latest` | typed scalar routed to a dedicated column |
//!
//! Internal crates (`fp-core`, `fp-durability`, `fp-store`) are not
//! exposed directly. Only the engine façades re-exported here are the
//! stable surface.

pub use fp_engine::*;
