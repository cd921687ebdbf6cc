//! The `storage` table binding for the dated engine: one row per
//! `(key, process_name)` identity, upserted in place with a
//! monotonically increasing version.

use std::path::{Path, PathBuf};

use duckdb::{params, Connection};
use fp_core::{DatedIdentity, ExtraColumn, ExtraSchema, Instant, PhysicalType};
use serde_json::Value as JsonValue;

use crate::error::StoreError;
use crate::value::{extra_sql_value, opt_bigint, opt_text};

/// One flushed row bound for `storage`: the payload fields the dated
/// engine breaks out into dedicated columns, plus whatever the
/// caller's `extra_schema` promotes out of the JSON payload.
pub struct DatedRow {
    pub identity: DatedIdentity,
    pub data: JsonValue,
    pub timestamp: Option<Instant>,
    pub status: Option<String>,
    pub status_int: Option<i64>,
    pub username: Option<String>,
}

/// A handle on the dated engine's single-table DuckDB file.
pub struct DatedStore {
    conn: Connection,
    extra_schema: ExtraSchema,
}

impl DatedStore {
    /// Open (creating if absent) the `storage` table at `db_path`,
    /// running the NOT-NULL-relaxation migration and adding any
    /// declared extra columns that aren't already present.
    ///
    /// Runs the health probe first: a file that exists but fails a
    /// trivial `COUNT(*)` is reported as corrupt with the recovery
    /// runbook rather than propagating whatever DuckDB error surfaces.
    pub fn open(db_path: &Path, extra_schema: ExtraSchema) -> Result<Self, StoreError> {
        if db_path.exists() && !health_probe(db_path) {
            return Err(StoreError::dated_corrupt(db_path.to_path_buf()));
        }

        let conn = Connection::open(db_path)?;
        create_schema(&conn)?;
        migrate_nullable_process_name(&conn)?;
        add_extra_columns(&conn, "storage", extra_schema.columns())?;

        Ok(DatedStore { conn, extra_schema })
    }

    /// Open an in-memory store, used by tests that don't need a file on
    /// disk.
    #[cfg(test)]
    pub fn open_in_memory(extra_schema: ExtraSchema) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        add_extra_columns(&conn, "storage", extra_schema.columns())?;
        Ok(DatedStore { conn, extra_schema })
    }

    /// The validated extra-column declaration this store was opened
    /// with.
    pub fn extra_schema(&self) -> &ExtraSchema {
        &self.extra_schema
    }

    /// `COALESCE(MAX(version), 0)` for one identity, using `IS NOT
    /// DISTINCT FROM` so a `NULL` process_name matches other `NULL`
    /// rows rather than being excluded by ordinary `=` semantics.
    pub fn max_version(&self, identity: &DatedIdentity) -> Result<i64, StoreError> {
        let version: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM storage \
             WHERE key = ?1 AND process_name IS NOT DISTINCT FROM ?2",
            params![identity.key, identity.process_name],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Load every row in `storage`, used to hydrate the dated engine's
    /// cache in full on open (unlike the collection engine, which
    /// hydrates per collection on first touch).
    pub fn load_all(&self) -> Result<Vec<DatedRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT key, process_name, data, timestamp, status, status_int, username FROM storage",
        )?;
        let rows = stmt.query_map([], |row| {
            let data_text: String = row.get(2)?;
            let timestamp: Option<chrono::NaiveDateTime> = row.get(3)?;
            Ok(DatedRow {
                identity: DatedIdentity::new(row.get::<_, String>(0)?, row.get(1)?),
                data: serde_json::from_str(&data_text).unwrap_or(JsonValue::Null),
                timestamp: timestamp.map(|naive| chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc)),
                status: row.get(4)?,
                status_int: row.get(5)?,
                username: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Export the whole table as Hive-partitioned Parquet, partitioned by
    /// `process_name` and a derived `date` column carrying `cohort` — the
    /// dated engine's optional clean-close export.
    pub fn export_parquet(&self, cohort: &str, output_dir: &Path) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "CREATE OR REPLACE TEMP VIEW storage_export AS \
             SELECT *, '{cohort}' AS date FROM storage"
        ))?;
        crate::export::export_partitioned(&self.conn, "storage_export", output_dir, &["process_name", "date"])
    }

    /// Upsert a batch of rows inside one transaction, rolling back (and
    /// returning the error to the caller, who restores the batch to
    /// `pending_writes`) if any single row fails to write.
    ///
    /// Each row's `version` must already be the value returned by
    /// [`Self::max_version`] plus one — this binding never allocates a
    /// version itself, since concurrent upserts across identities in
    /// the same batch must each see the version their own earlier call
    /// to `max_version` observed.
    pub fn upsert_batch(&mut self, rows: &[(DatedRow, i64)]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let extra_names: Vec<&str> =
                self.extra_schema.columns().iter().map(|c| c.name.as_str()).collect();
            let mut stmt = tx.prepare(&upsert_sql(&extra_names))?;
            for (row, version) in rows {
                let mut bound: Vec<duckdb::types::Value> = vec![
                    duckdb::types::Value::Text(row.identity.key.clone()),
                    opt_text(row.identity.process_name.clone()),
                    duckdb::types::Value::Text(row.data.to_string()),
                    opt_text(row.timestamp.map(fp_core::serialize_timestamp)),
                    opt_text(row.status.clone()),
                    opt_bigint(row.status_int),
                    opt_text(row.username.clone()),
                    duckdb::types::Value::Text(fp_core::serialize_timestamp(fp_core::now())),
                    duckdb::types::Value::BigInt(*version),
                ];
                for extra in self.extra_schema.columns() {
                    let field = row.data.get(&extra.name);
                    bound.push(extra_sql_value(extra.physical_type, field));
                }
                stmt.execute(duckdb::params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS storage (
            key VARCHAR NOT NULL,
            process_name VARCHAR DEFAULT NULL,
            data JSON,
            timestamp TIMESTAMP,
            status VARCHAR,
            status_int INTEGER,
            username VARCHAR,
            updated_at TIMESTAMP,
            version INTEGER DEFAULT 1,
            UNIQUE (key, process_name)
        )",
    )?;
    Ok(())
}

/// Older databases created `process_name VARCHAR NOT NULL`. Rebuild the
/// table without the constraint, inside a transaction, the same
/// create/copy/drop/rename sequence the original persistence layer
/// used.
fn migrate_nullable_process_name(conn: &Connection) -> Result<(), StoreError> {
    let mut needs_migration = false;
    {
        let mut stmt = conn.prepare("PRAGMA table_info('storage')")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let notnull: i64 = row.get(3)?;
            if name == "process_name" && notnull == 1 {
                needs_migration = true;
                break;
            }
        }
    }

    if !needs_migration {
        return Ok(());
    }

    conn.execute_batch(
        "BEGIN TRANSACTION;
         CREATE TABLE storage_new (
            key VARCHAR NOT NULL,
            process_name VARCHAR DEFAULT NULL,
            data JSON,
            timestamp TIMESTAMP,
            status VARCHAR,
            status_int INTEGER,
            username VARCHAR,
            updated_at TIMESTAMP,
            version INTEGER DEFAULT 1,
            UNIQUE (key, process_name)
         );
         INSERT INTO storage_new SELECT * FROM storage;
         DROP TABLE storage;
         ALTER TABLE storage_new RENAME TO storage;
         COMMIT;",
    )?;
    tracing::info!("migrated storage table to allow NULL process_name");
    Ok(())
}

/// Add any declared extra columns not already present. DuckDB has no
/// `ADD COLUMN IF NOT EXISTS`, so an "already exists" failure is
/// swallowed rather than propagated.
pub(crate) fn add_extra_columns(
    conn: &Connection,
    table: &str,
    columns: &[ExtraColumn],
) -> Result<(), StoreError> {
    for column in columns {
        let sql = format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            column.name,
            column.physical_type.as_sql()
        );
        match conn.execute_batch(&sql) {
            Ok(()) => {}
            Err(err) if err.to_string().to_lowercase().contains("already exists") => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn upsert_sql(extra_columns: &[&str]) -> String {
    let mut columns = vec![
        "key",
        "process_name",
        "data",
        "timestamp",
        "status",
        "status_int",
        "username",
        "updated_at",
        "version",
    ];
    columns.extend(extra_columns.iter().copied());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT OR REPLACE INTO storage ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// A trivial `COUNT(*)` against the table, used both on open (is this
/// file usable at all?) and exposed for callers that want a liveness
/// check without reopening.
pub fn health_probe(db_path: &Path) -> bool {
    (|| -> Result<(), duckdb::Error> {
        let conn = Connection::open(db_path)?;
        // A freshly created file has no `storage` table yet; that's
        // healthy, just empty. Only a query that actually errors out
        // (corrupted page, wrong format) counts as unhealthy.
        match conn.query_row("SELECT COUNT(*) FROM storage", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => Ok(()),
            Err(duckdb::Error::DuckDBFailure(_, Some(msg)))
                if msg.to_lowercase().contains("does not exist")
                    || msg.to_lowercase().contains("catalog") =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    })()
    .is_ok()
}

/// The on-disk path convention for a dated cohort's column store file.
pub fn db_path_for_cohort(cohort_dir: &Path) -> PathBuf {
    cohort_dir.join("storage.duckdb")
}
