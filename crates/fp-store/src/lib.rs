//! DuckDB bindings for the two engine variants' column stores.
//!
//! This crate knows schemas, migrations, and SQL — nothing about WAL
//! segments, caches, or locks. `fp-engine` owns the write path and
//! calls into here only at flush time, with rows it has already
//! assembled from its pending ledger.

pub mod collection;
pub mod dated;
pub mod error;
pub mod export;
pub mod value;

pub use collection::{
    history_db_path_for_cohort, history_health_probe, latest_db_path_for_cohort,
    latest_health_probe, CollectionRow, CollectionStore,
};
pub use dated::{db_path_for_cohort, health_probe, DatedRow, DatedStore};
pub use error::StoreError;
pub use export::export_partitioned;
