//! The `storage_history`/`storage_latest` table bindings for the
//! collection engine: every write appends a new version to history,
//! and the latest value per identity is mirrored into its own table
//! (always `version = 1`, replaced in place) so reads don't have to
//! scan history for the newest row.

use std::path::{Path, PathBuf};

use duckdb::{params, Connection};
use fp_core::{CollectionIdentity, ExtraSchema, Instant, ScalarValue};
use serde_json::Value as JsonValue;

use crate::dated::add_extra_columns;
use crate::error::StoreError;
use crate::value::{extra_sql_value, opt_bigint, opt_text, scalar_columns};

/// One flushed row, destined for both `storage_history` (always
/// appended) and, if its identity is in the modified set, for
/// `storage_latest` (replaced in place).
pub struct CollectionRow {
    pub identity: CollectionIdentity,
    pub data: JsonValue,
    pub value: ScalarValue,
    pub timestamp: Option<Instant>,
    pub status: Option<String>,
    pub status_int: Option<i64>,
    pub username: Option<String>,
}

/// A handle on the collection engine's two DuckDB files: the
/// append-only history database and the latest-value mirror.
pub struct CollectionStore {
    history_conn: Connection,
    latest_conn: Connection,
    extra_schema: ExtraSchema,
}

impl CollectionStore {
    /// Open both the history and latest database files, creating their
    /// schemas and any declared extra columns. Each file's health is
    /// probed independently before opening, since the two databases can
    /// fail independently of each other.
    pub fn open(
        history_db_path: &Path,
        latest_db_path: &Path,
        extra_schema: ExtraSchema,
    ) -> Result<Self, StoreError> {
        if history_db_path.exists() && !history_health_probe(history_db_path) {
            return Err(StoreError::history_corrupt(history_db_path.to_path_buf()));
        }
        if latest_db_path.exists() && !latest_health_probe(latest_db_path) {
            return Err(StoreError::latest_corrupt(latest_db_path.to_path_buf()));
        }

        let history_conn = Connection::open(history_db_path)?;
        create_history_schema(&history_conn)?;
        add_extra_columns(&history_conn, "storage_history", extra_schema.columns())?;

        let latest_conn = Connection::open(latest_db_path)?;
        create_latest_schema(&latest_conn)?;
        add_extra_columns(&latest_conn, "storage_latest", extra_schema.columns())?;

        Ok(CollectionStore {
            history_conn,
            latest_conn,
            extra_schema,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(extra_schema: ExtraSchema) -> Result<Self, StoreError> {
        let history_conn = Connection::open_in_memory()?;
        create_history_schema(&history_conn)?;
        add_extra_columns(&history_conn, "storage_history", extra_schema.columns())?;
        let latest_conn = Connection::open_in_memory()?;
        create_latest_schema(&latest_conn)?;
        add_extra_columns(&latest_conn, "storage_latest", extra_schema.columns())?;
        Ok(CollectionStore {
            history_conn,
            latest_conn,
            extra_schema,
        })
    }

    pub fn extra_schema(&self) -> &ExtraSchema {
        &self.extra_schema
    }

    /// Current max version for one identity in history — the basis for
    /// the flusher's per-identity version counter.
    pub fn max_version(&self, identity: &CollectionIdentity) -> Result<i64, StoreError> {
        let version: i64 = self.history_conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM storage_history \
             WHERE key = ?1 AND collection_name = ?2 AND item_name = ?3",
            params![identity.key, identity.collection_name, identity.item_name],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Append a batch of rows to history, every row already carrying
    /// its own pre-allocated version (every update in a pending batch
    /// for one identity gets a distinct, increasing version — there is
    /// no upsert here, only append).
    pub fn append_history_batch(&mut self, rows: &[(CollectionRow, i64)]) -> Result<(), StoreError> {
        let tx = self.history_conn.transaction()?;
        {
            let extra_names: Vec<&str> =
                self.extra_schema.columns().iter().map(|c| c.name.as_str()).collect();
            let mut stmt = tx.prepare(&history_insert_sql(&extra_names))?;
            for (row, version) in rows {
                let mut bound = row_values(row, *version);
                for extra in self.extra_schema.columns() {
                    bound.push(extra_sql_value(extra.physical_type, row.data.get(&extra.name)));
                }
                stmt.execute(duckdb::params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the latest-table row for every identity in `rows` — the
    /// version column is always `1` here, since this table holds only
    /// the newest value per identity, not a history.
    pub fn replace_latest_batch(&mut self, rows: &[CollectionRow]) -> Result<(), StoreError> {
        let tx = self.latest_conn.transaction()?;
        {
            let extra_names: Vec<&str> =
                self.extra_schema.columns().iter().map(|c| c.name.as_str()).collect();
            let mut stmt = tx.prepare(&latest_upsert_sql(&extra_names))?;
            for row in rows {
                let mut bound = row_values(row, 1);
                for extra in self.extra_schema.columns() {
                    bound.push(extra_sql_value(extra.physical_type, row.data.get(&extra.name)));
                }
                stmt.execute(duckdb::params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load every item currently in `storage_latest` for one `(key,
    /// collection_name)` pair — the point query the collection engine
    /// issues once per collection on first touch to hydrate its cache.
    pub fn load_latest_for_collection(
        &self,
        key: &str,
        collection_name: &str,
    ) -> Result<Vec<CollectionRow>, StoreError> {
        let mut stmt = self.latest_conn.prepare(
            "SELECT key, collection_name, item_name, data, value_int, value_float, value_string,
                    timestamp, status, status_int, username
             FROM storage_latest WHERE key = ?1 AND collection_name = ?2",
        )?;
        let rows = stmt.query_map(params![key, collection_name], |row| {
            let data_text: String = row.get(3)?;
            let value_int: Option<i64> = row.get(4)?;
            let value_float: Option<f64> = row.get(5)?;
            let value_string: Option<String> = row.get(6)?;
            let timestamp: Option<chrono::NaiveDateTime> = row.get(7)?;
            Ok(CollectionRow {
                identity: CollectionIdentity::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ),
                data: serde_json::from_str(&data_text).unwrap_or(JsonValue::Null),
                value: crate::value::scalar_from_columns(value_int, value_float, value_string),
                timestamp: timestamp
                    .map(|naive| chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc)),
                status: row.get(8)?,
                status_int: row.get(9)?,
                username: row.get(10)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Replay WAL records for one cohort directly into history,
    /// allocating each a fresh version past whatever is already
    /// present — used by `rebuild_history_from_wal` when the history
    /// database was lost but the day's WAL segments survived.
    pub fn rebuild_history_from_records(
        &mut self,
        records: &[CollectionRow],
    ) -> Result<usize, StoreError> {
        let mut recovered = 0usize;
        let tx = self.history_conn.transaction()?;
        {
            let extra_names: Vec<&str> =
                self.extra_schema.columns().iter().map(|c| c.name.as_str()).collect();
            let mut stmt = tx.prepare(&history_insert_sql(&extra_names))?;
            for row in records {
                let current: i64 = {
                    let mut version_stmt = tx.prepare(
                        "SELECT COALESCE(MAX(version), 0) FROM storage_history \
                         WHERE key = ?1 AND collection_name = ?2 AND item_name = ?3",
                    )?;
                    version_stmt.query_row(
                        params![row.identity.key, row.identity.collection_name, row.identity.item_name],
                        |r| r.get(0),
                    )?
                };
                let mut bound = row_values(row, current + 1);
                for extra in self.extra_schema.columns() {
                    bound.push(extra_sql_value(extra.physical_type, row.data.get(&extra.name)));
                }
                stmt.execute(duckdb::params_from_iter(bound))?;
                recovered += 1;
            }
        }
        tx.commit()?;
        Ok(recovered)
    }

    /// Reconstruct the entire latest table from the max-version row of
    /// each identity in history. Clears `storage_latest` first, so a
    /// partial or stale latest table doesn't leave orphaned rows
    /// behind.
    pub fn rebuild_latest_from_history(&mut self) -> Result<usize, StoreError> {
        let rows: Vec<(
            String,
            String,
            String,
            String,
            Option<i64>,
            Option<f64>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<String>,
            String,
        )> = {
            let mut stmt = self.history_conn.prepare(
                "SELECT key, collection_name, item_name, data,
                        value_int, value_float, value_string,
                        timestamp, status, status_int, username, updated_at
                 FROM storage_history
                 WHERE (key, collection_name, item_name, version) IN (
                     SELECT key, collection_name, item_name, MAX(version)
                     FROM storage_history
                     GROUP BY key, collection_name, item_name
                 )",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                    r.get(10)?,
                    r.get(11)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let tx = self.latest_conn.transaction()?;
        tx.execute("DELETE FROM storage_latest", [])?;
        let count = rows.len();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO storage_latest
                 (key, collection_name, item_name, data,
                  value_int, value_float, value_string,
                  timestamp, status, status_int, username, updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9, row.10,
                    row.11,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }
}

fn row_values(row: &CollectionRow, version: i64) -> Vec<duckdb::types::Value> {
    let (value_int, value_float, value_string) = scalar_columns(&row.value);
    vec![
        duckdb::types::Value::Text(row.identity.key.clone()),
        duckdb::types::Value::Text(row.identity.collection_name.clone()),
        duckdb::types::Value::Text(row.identity.item_name.clone()),
        duckdb::types::Value::Text(row.data.to_string()),
        value_int,
        value_float,
        value_string,
        opt_text(row.timestamp.map(fp_core::serialize_timestamp)),
        opt_text(row.status.clone()),
        opt_bigint(row.status_int),
        opt_text(row.username.clone()),
        duckdb::types::Value::Text(fp_core::serialize_timestamp(fp_core::now())),
        duckdb::types::Value::BigInt(version),
    ]
}

fn base_columns() -> Vec<&'static str> {
    vec![
        "key",
        "collection_name",
        "item_name",
        "data",
        "value_int",
        "value_float",
        "value_string",
        "timestamp",
        "status",
        "status_int",
        "username",
        "updated_at",
        "version",
    ]
}

fn history_insert_sql(extra_columns: &[&str]) -> String {
    let mut columns = base_columns();
    columns.extend(extra_columns.iter().copied());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO storage_history ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn latest_upsert_sql(extra_columns: &[&str]) -> String {
    let mut columns = base_columns();
    columns.extend(extra_columns.iter().copied());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT OR REPLACE INTO storage_latest ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn create_history_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS storage_history (
            key VARCHAR NOT NULL,
            collection_name VARCHAR NOT NULL DEFAULT '',
            item_name VARCHAR NOT NULL DEFAULT '',
            data JSON,
            value_int BIGINT,
            value_float DOUBLE,
            value_string VARCHAR,
            timestamp TIMESTAMP,
            status VARCHAR,
            status_int INTEGER,
            username VARCHAR,
            updated_at TIMESTAMP,
            version INTEGER DEFAULT 1
        )",
    )?;
    Ok(())
}

fn create_latest_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS storage_latest (
            key VARCHAR NOT NULL,
            collection_name VARCHAR NOT NULL DEFAULT '',
            item_name VARCHAR NOT NULL DEFAULT '',
            data JSON,
            value_int BIGINT,
            value_float DOUBLE,
            value_string VARCHAR,
            timestamp TIMESTAMP,
            status VARCHAR,
            status_int INTEGER,
            username VARCHAR,
            updated_at TIMESTAMP,
            version INTEGER DEFAULT 1,
            PRIMARY KEY (key, collection_name, item_name)
        )",
    )?;
    Ok(())
}

fn table_health_probe(db_path: &Path, table: &str) -> bool {
    (|| -> Result<(), duckdb::Error> {
        let conn = Connection::open(db_path)?;
        let sql = format!("SELECT COUNT(*) FROM {table}");
        match conn.query_row(&sql, [], |row| row.get::<_, i64>(0)) {
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

/// Health probe for the history database.
pub fn history_health_probe(db_path: &Path) -> bool {
    table_health_probe(db_path, "storage_history")
}

/// Health probe for the latest database.
pub fn latest_health_probe(db_path: &Path) -> bool {
    table_health_probe(db_path, "storage_latest")
}

/// The on-disk path convention for a collection cohort's two column
/// store files.
pub fn history_db_path_for_cohort(cohort_dir: &Path) -> PathBuf {
    cohort_dir.join("storage_history.duckdb")
}

/// The on-disk path convention for a collection cohort's latest-value
/// mirror file.
pub fn latest_db_path_for_cohort(cohort_dir: &Path) -> PathBuf {
    cohort_dir.join("storage_latest.duckdb")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(key: &str, coll: &str, item: &str) -> CollectionIdentity {
        CollectionIdentity::new(key, coll, item)
    }

    fn row(identity: CollectionIdentity, value: ScalarValue) -> CollectionRow {
        CollectionRow {
            identity,
            data: serde_json::json!({}),
            value,
            timestamp: Some(fp_core::now()),
            status: None,
            status_int: None,
            username: None,
        }
    }

    #[test]
    fn history_append_is_version_monotonic() {
        let mut store = CollectionStore::open_in_memory(ExtraSchema::default()).unwrap();
        let id = identity("k", "c", "i");
        assert_eq!(store.max_version(&id).unwrap(), 0);

        store
            .append_history_batch(&[(row(id.clone(), ScalarValue::Int(1)), 1)])
            .unwrap();
        assert_eq!(store.max_version(&id).unwrap(), 1);

        store
            .append_history_batch(&[(row(id.clone(), ScalarValue::Int(2)), 2)])
            .unwrap();
        assert_eq!(store.max_version(&id).unwrap(), 2);

        let count: i64 = store
            .history_conn
            .query_row("SELECT COUNT(*) FROM storage_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2, "history never overwrites, only appends");
    }

    #[test]
    fn latest_is_always_version_one_and_replaces() {
        let mut store = CollectionStore::open_in_memory(ExtraSchema::default()).unwrap();
        let id = identity("k", "c", "i");
        store
            .replace_latest_batch(&[row(id.clone(), ScalarValue::String("a".into()))])
            .unwrap();
        store
            .replace_latest_batch(&[row(id.clone(), ScalarValue::String("b".into()))])
            .unwrap();

        let (count, version, value): (i64, i64, String) = store
            .latest_conn
            .query_row(
                "SELECT COUNT(*), version, value_string FROM storage_latest GROUP BY version, value_string",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1, "latest holds exactly one row per identity");
        assert_eq!(version, 1);
        assert_eq!(value, "b");
    }

    #[test]
    fn rebuild_latest_from_history_picks_max_version() {
        let mut store = CollectionStore::open_in_memory(ExtraSchema::default()).unwrap();
        let id = identity("k", "c", "i");
        store
            .append_history_batch(&[
                (row(id.clone(), ScalarValue::Int(1)), 1),
                (row(id.clone(), ScalarValue::Int(2)), 2),
            ])
            .unwrap();

        let rebuilt = store.rebuild_latest_from_history().unwrap();
        assert_eq!(rebuilt, 1);

        let value: i64 = store
            .latest_conn
            .query_row("SELECT value_int FROM storage_latest", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, 2);
    }
}
