//! Parquet export via DuckDB's native `COPY ... TO` — the analytical
//! escape hatch callers use to hand a cohort's data to tools outside
//! this crate, partitioned the way the data is naturally queried.

use std::path::Path;

use duckdb::Connection;

use crate::error::StoreError;

/// Export `table` to Hive-partitioned Parquet under `output_dir`,
/// partitioned by the given column names. DuckDB creates the
/// `column=value/` directory structure and the `.parquet` files
/// itself; this is a thin wrapper around the one `COPY` statement that
/// does it.
pub fn export_partitioned(
    conn: &Connection,
    table: &str,
    output_dir: &Path,
    partition_by: &[&str],
) -> Result<(), StoreError> {
    let output = output_dir.to_string_lossy();
    let partitions = partition_by.join(", ");
    let sql = format!(
        "COPY (SELECT * FROM {table}) TO '{output}' \
         (FORMAT PARQUET, PARTITION_BY ({partitions}), OVERWRITE_OR_IGNORE 1)"
    );
    conn.execute_batch(&sql)?;
    Ok(())
}
