//! Per-variant engine configuration: WAL rotation thresholds, the
//! background flush cadence, retention, and any declared extra
//! columns.

use std::path::PathBuf;
use std::time::Duration;

use fp_core::{ExtraSchema, COLLECTION_RESERVED_COLUMNS, DATED_RESERVED_COLUMNS};
use fp_durability::WalConfig;

use crate::error::EngineError;

/// How often the background worker flushes pending writes even if no
/// WAL rotation has triggered one, matching the original
/// implementation's `duckdb_flush_interval_seconds` default.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Days a cohort directory is kept before `cleanup_old_date_directories`
/// deletes it.
pub const DEFAULT_RETAIN_DAYS: u64 = 30;

/// Configuration for a dated engine instance.
#[derive(Debug, Clone)]
pub struct DatedConfig {
    /// WAL rotation thresholds for this cohort's segments.
    pub wal: WalConfig,
    /// How often the background worker flushes without a rotation
    /// trigger.
    pub flush_interval: Duration,
    /// Validated extra columns promoted out of the payload.
    pub extra_schema: ExtraSchema,
    /// If set, `close()` exports the cohort's table to this directory
    /// as partitioned Parquet before releasing the lock.
    pub parquet_path: Option<PathBuf>,
}

impl DatedConfig {
    /// Build a config, validating `extra_schema` against the dated
    /// engine's reserved column names.
    pub fn new(
        wal: WalConfig,
        declared_extra_schema: &[(String, String)],
    ) -> Result<Self, EngineError> {
        wal.validate()?;
        let extra_schema = ExtraSchema::validate(declared_extra_schema, DATED_RESERVED_COLUMNS)?;
        Ok(DatedConfig {
            wal,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            extra_schema,
            parquet_path: None,
        })
    }

    /// A config tuned for fast rotation and flushing, for tests.
    pub fn for_testing() -> Self {
        DatedConfig {
            wal: WalConfig::for_testing(),
            flush_interval: Duration::from_millis(50),
            extra_schema: ExtraSchema::default(),
            parquet_path: None,
        }
    }
}

/// Configuration for a collection engine instance. The dated engine's
/// age-based rotation has no counterpart here — the original
/// implementation never enabled it for collections, so `wal` should be
/// built without `with_max_wal_age_seconds`.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// WAL rotation thresholds for this cohort's segments.
    pub wal: WalConfig,
    /// How often the background worker flushes without a rotation
    /// trigger.
    pub flush_interval: Duration,
    /// Days a cohort directory survives before cleanup deletes it.
    pub retain_days: u64,
    /// Validated extra columns promoted out of the payload.
    pub extra_schema: ExtraSchema,
}

impl CollectionConfig {
    /// Build a config, validating `extra_schema` against the collection
    /// engine's reserved column names.
    pub fn new(
        wal: WalConfig,
        declared_extra_schema: &[(String, String)],
    ) -> Result<Self, EngineError> {
        wal.validate()?;
        let extra_schema =
            ExtraSchema::validate(declared_extra_schema, COLLECTION_RESERVED_COLUMNS)?;
        Ok(CollectionConfig {
            wal,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retain_days: DEFAULT_RETAIN_DAYS,
            extra_schema,
        })
    }

    /// A config tuned for fast rotation and flushing, for tests.
    pub fn for_testing() -> Self {
        CollectionConfig {
            wal: WalConfig::for_testing(),
            flush_interval: Duration::from_millis(50),
            retain_days: DEFAULT_RETAIN_DAYS,
            extra_schema: ExtraSchema::default(),
        }
    }
}
