//! Errors surfaced by the column-store bindings.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised opening, migrating, or querying a column store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying DuckDB driver returned an error.
    #[error("duckdb error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// The health probe (`COUNT(*)` + size pragma) failed on open,
    /// indicating a corrupted database file. Carries the recovery
    /// runbook named by the spec so callers can surface it verbatim.
    #[error(
        "failed to open {path:?}: database may be corrupted.\nTo recover:\n{runbook}"
    )]
    Corrupt {
        /// The database file that failed its health probe.
        path: PathBuf,
        /// Newline-joined recovery steps specific to the engine variant.
        runbook: String,
    },

    /// An `extra_schema` column's physical type has no SQL mapping
    /// (should be unreachable — `fp_core::schema::ExtraSchema` validates
    /// this before it reaches the store layer).
    #[error("extra_schema column {0:?} has no SQL type mapping")]
    UnmappedExtraColumn(String),
}

impl StoreError {
    /// Build the [`StoreError::Corrupt`] variant for the history
    /// database, with the runbook text the spec names in §7.
    pub fn history_corrupt(path: PathBuf) -> Self {
        StoreError::Corrupt {
            path,
            runbook: "1. Delete the corrupted file\n\
                      2. Call rebuild_history_from_wal(date) for each date that needs recovery\n\
                      3. Call rebuild_latest_from_history() to rebuild latest values"
                .to_string(),
        }
    }

    /// Build the [`StoreError::Corrupt`] variant for the latest
    /// database.
    pub fn latest_corrupt(path: PathBuf) -> Self {
        StoreError::Corrupt {
            path,
            runbook: "1. Delete the corrupted file\n\
                      2. Call rebuild_latest_from_history() to rebuild from history"
                .to_string(),
        }
    }

    /// Build the [`StoreError::Corrupt`] variant for the dated engine's
    /// single table.
    pub fn dated_corrupt(path: PathBuf) -> Self {
        StoreError::Corrupt {
            path,
            runbook: "1. Delete the corrupted file\n\
                      2. Restart the engine; WAL segments for the cohort will replay \
                         automatically if present"
                .to_string(),
        }
    }
}
