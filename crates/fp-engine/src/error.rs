//! The engine's top-level error type, unifying failures from every
//! layer it orchestrates.

use std::path::PathBuf;
use thiserror::Error;

/// Errors an engine variant can return from its public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The cohort lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] fp_durability::LockError),

    /// A WAL append, rotation, or replay failed.
    #[error(transparent)]
    Wal(#[from] fp_durability::WalError),

    /// The column store rejected a schema, migration, or query.
    #[error(transparent)]
    Store(#[from] fp_store::StoreError),

    /// The declared `extra_schema` was invalid.
    #[error(transparent)]
    Schema(#[from] fp_core::SchemaError),

    /// The supplied WAL rotation thresholds were invalid.
    #[error(transparent)]
    WalConfig(#[from] fp_durability::WalConfigError),

    /// A directory under the base directory could not be created or
    /// read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the failing operation targeted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A flush failed and has been rolled back; the batch was restored
    /// to the pending ledger for a later retry.
    #[error("flush failed, {record_count} record(s) restored to pending: {source}")]
    FlushFailed {
        /// How many records were restored to the pending ledger.
        record_count: usize,
        /// The underlying store error that triggered the rollback.
        #[source]
        source: fp_store::StoreError,
    },
}
