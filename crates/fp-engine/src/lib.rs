//! Façades for the two engine variants over a cohort's WAL segments
//! and column store.
//!
//! The dated engine owns a single `storage` table per cohort and keys
//! on `(key, process_name)`. The collection engine shares
//! `storage_history`/`storage_latest` across every cohort it ever
//! touches and keys on `(key, collection_name, item_name)`. Both wrap
//! the same shape of machinery — an in-memory cache for reads, a
//! pending ledger drained by a background flusher, and a per-cohort
//! WAL for durability — which lives in this crate's other modules and
//! is shared between the two façades.

pub mod background;
pub mod cache;
pub mod collection_engine;
pub mod config;
pub mod dated_engine;
pub mod error;
pub mod flusher;
pub mod recovery;

pub use background::BackgroundFlusher;
pub use collection_engine::CollectionEngine;
pub use config::{CollectionConfig, DatedConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_RETAIN_DAYS};
pub use dated_engine::DatedEngine;
pub use error::EngineError;
