//! DuckDB projection sink.
//!
//! Full reloads never truncate the live table. Every target gets a
//! run-scoped stage table; batches are appended to the stage, and commit
//! swaps stage for target inside one transaction. An interrupted run
//! leaves the previous projection contents intact.

use crate::lock::{try_lock_exclusive, DbLockGuard, LockError};
use admill_model::{RunId, SinkMode};
use anyhow::{Context, Result};
use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, SchemaRef};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn stage_table_name(run_id: &RunId, table: &str) -> String {
    let seed = format!("{}:{}", run_id, table);
    format!(
        "__am_stage_{}",
        &blake3::hash(seed.as_bytes()).to_hex()[..16]
    )
}

fn duckdb_type(dt: &DataType) -> String {
    match dt {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR".to_string(),
        DataType::Date32 => "DATE".to_string(),
        DataType::Timestamp(_, tz) => {
            if tz.is_some() {
                "TIMESTAMPTZ".to_string()
            } else {
                "TIMESTAMP".to_string()
            }
        }
        DataType::Decimal128(precision, scale) => {
            format!("DECIMAL({}, {})", precision, scale)
        }
        _ => "VARCHAR".to_string(),
    }
}

fn stage_ddl(stage: &str, schema: &SchemaRef, key_columns: &[String]) -> String {
    let mut columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| {
            let nullable = if f.is_nullable() { "" } else { " NOT NULL" };
            format!("{} {}{}", quote_ident(f.name()), duckdb_type(f.data_type()), nullable)
        })
        .collect();
    if !key_columns.is_empty() {
        let keys = key_columns
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        columns.push(format!("PRIMARY KEY ({})", keys));
    }
    format!("CREATE TABLE {} ({})", quote_ident(stage), columns.join(", "))
}

#[derive(Debug)]
struct StageTarget {
    stage: String,
    sink_mode: SinkMode,
    schema: SchemaRef,
    rows_written: u64,
}

/// One connection, one lock, N staged targets.
#[derive(Debug)]
pub struct DuckDbSink {
    db_path: PathBuf,
    conn: duckdb::Connection,
    run_id: RunId,
    targets: BTreeMap<String, StageTarget>,
    _lock: DbLockGuard,
}

impl DuckDbSink {
    pub fn open(db_path: impl AsRef<Path>, run_id: RunId) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let lock = try_lock_exclusive(&db_path).map_err(|err| match err {
            LockError::Locked(path) => {
                anyhow::anyhow!("DuckDB sink is locked by another writer: {}", path.display())
            }
            other => anyhow::anyhow!("Failed to lock DuckDB sink: {}", other),
        })?;

        let conn = duckdb::Connection::open(&db_path)
            .with_context(|| format!("Failed to open DuckDB database: {}", db_path.display()))?;

        Ok(Self {
            db_path,
            conn,
            run_id,
            targets: BTreeMap::new(),
            _lock: lock,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn connection(&self) -> &duckdb::Connection {
        &self.conn
    }

    /// Create the run-scoped stage table for a target.
    pub fn init(
        &mut self,
        table: &str,
        schema: SchemaRef,
        key_columns: &[String],
        sink_mode: SinkMode,
    ) -> Result<()> {
        let stage = stage_table_name(&self.run_id, table);
        info!(
            "Initializing DuckDB target: {} (stage: {}, mode: {})",
            table, stage, sink_mode
        );

        let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&stage));
        let create_sql = stage_ddl(&stage, &schema, key_columns);
        debug!("CREATE STAGE: {}", create_sql);

        self.conn
            .execute(&drop_sql, [])
            .context("Failed to drop stale stage table")?;
        self.conn
            .execute(&create_sql, [])
            .context("Failed to create stage table")?;

        self.targets.insert(
            table.to_string(),
            StageTarget {
                stage,
                sink_mode,
                schema,
                rows_written: 0,
            },
        );
        Ok(())
    }

    /// Append one batch to a target's stage table.
    pub fn write_batch(&mut self, table: &str, batch: &RecordBatch) -> Result<u64> {
        let target = self
            .targets
            .get_mut(table)
            .ok_or_else(|| anyhow::anyhow!("Target not initialized: {}", table))?;

        let mut appender = self
            .conn
            .appender(&target.stage)
            .context("Failed to create DuckDB appender")?;
        appender
            .append_record_batch(batch.clone())
            .context("Failed to append record batch")?;

        let rows = batch.num_rows() as u64;
        target.rows_written += rows;
        debug!(
            "Wrote {} rows to stage for {} (total: {})",
            rows, table, target.rows_written
        );
        Ok(rows)
    }

    /// Promote every stage table into its target, one transaction per
    /// target, then checkpoint the database.
    pub fn commit(&mut self) -> Result<u64> {
        let mut total_rows = 0;
        for (table, target) in &self.targets {
            let target_ident = quote_ident(table);
            let stage_ident = quote_ident(&target.stage);
            let column_list = target
                .schema
                .fields()
                .iter()
                .map(|f| quote_ident(f.name()))
                .collect::<Vec<_>>()
                .join(", ");

            let tx = self
                .conn
                .transaction()
                .context("Failed to begin DuckDB transaction")?;
            match target.sink_mode {
                SinkMode::Replace => {
                    tx.execute(&format!("DROP TABLE IF EXISTS {}", target_ident), [])
                        .with_context(|| format!("Failed to drop target table {}", table))?;
                    tx.execute(
                        &format!("ALTER TABLE {} RENAME TO {}", stage_ident, target_ident),
                        [],
                    )
                    .with_context(|| format!("Failed to promote stage for {}", table))?;
                }
                SinkMode::Append => {
                    let create_dest = format!(
                        "CREATE TABLE IF NOT EXISTS {} AS SELECT {} FROM {} WHERE 1=0",
                        target_ident, column_list, stage_ident
                    );
                    tx.execute(&create_dest, [])
                        .with_context(|| format!("Failed to ensure target table {}", table))?;
                    tx.execute(
                        &format!(
                            "INSERT INTO {} ({}) SELECT {} FROM {}",
                            target_ident, column_list, column_list, stage_ident
                        ),
                        [],
                    )
                    .with_context(|| format!("Failed to append stage rows for {}", table))?;
                    tx.execute(&format!("DROP TABLE {}", stage_ident), [])
                        .with_context(|| format!("Failed to drop stage for {}", table))?;
                }
                SinkMode::Error => {
                    tx.execute(
                        &format!("ALTER TABLE {} RENAME TO {}", stage_ident, target_ident),
                        [],
                    )
                    .with_context(|| {
                        format!("Sink in error mode: target table '{}' already exists", table)
                    })?;
                }
            }
            tx.commit().context("Failed to commit DuckDB transaction")?;
            total_rows += target.rows_written;
            info!("Committed {}: {} rows", table, target.rows_written);
        }

        self.conn
            .execute_batch("CHECKPOINT")
            .context("Failed to checkpoint DuckDB database")?;
        self.targets.clear();
        Ok(total_rows)
    }

    /// Drop every stage table; targets keep their pre-run contents.
    pub fn rollback(&mut self) -> Result<()> {
        for target in self.targets.values() {
            self.conn
                .execute(
                    &format!("DROP TABLE IF EXISTS {}", quote_ident(&target.stage)),
                    [],
                )
                .context("Failed to drop stage table on rollback")?;
        }
        self.targets.clear();
        Ok(())
    }
}

/// Quick row count for run summaries and tests.
pub fn count_rows(conn: &duckdb::Connection, table: &str) -> Result<i64> {
    let count = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("Failed to count rows in {}", table))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]))
    }

    fn batch(ids: &[i64], names: &[&str]) -> RecordBatch {
        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(names.to_vec())),
            ],
        )
        .unwrap()
    }

    fn replace_run(db_path: &Path, ids: &[i64], names: &[&str]) {
        let mut sink = DuckDbSink::open(db_path, RunId::new()).unwrap();
        sink.init("records", test_schema(), &["id".to_string()], SinkMode::Replace)
            .unwrap();
        sink.write_batch("records", &batch(ids, names)).unwrap();
        sink.commit().unwrap();
    }

    #[test]
    fn replace_swaps_stage_into_target() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.duckdb");
        replace_run(&db_path, &[1, 2, 3], &["a", "b", "c"]);

        let conn = duckdb::Connection::open(&db_path).unwrap();
        assert_eq!(count_rows(&conn, "records").unwrap(), 3);
    }

    #[test]
    fn rerun_leaves_no_stale_keys() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.duckdb");
        replace_run(&db_path, &[1, 2, 3], &["a", "b", "c"]);
        // Second run with fewer keys: key 3 must disappear.
        replace_run(&db_path, &[1, 2], &["a", "b"]);

        let conn = duckdb::Connection::open(&db_path).unwrap();
        assert_eq!(count_rows(&conn, "records").unwrap(), 2);
        let max_id: i64 = conn
            .query_row("SELECT MAX(id) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(max_id, 2);
    }

    #[test]
    fn rollback_preserves_previous_contents() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.duckdb");
        replace_run(&db_path, &[1], &["a"]);

        {
            let mut sink = DuckDbSink::open(&db_path, RunId::new()).unwrap();
            sink.init("records", test_schema(), &["id".to_string()], SinkMode::Replace)
                .unwrap();
            sink.write_batch("records", &batch(&[9, 10], &["x", "y"]))
                .unwrap();
            sink.rollback().unwrap();
        }

        let conn = duckdb::Connection::open(&db_path).unwrap();
        assert_eq!(count_rows(&conn, "records").unwrap(), 1);
    }

    #[test]
    fn append_mode_accumulates() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.duckdb");

        for _ in 0..2 {
            let mut sink = DuckDbSink::open(&db_path, RunId::new()).unwrap();
            sink.init("records", test_schema(), &[], SinkMode::Append)
                .unwrap();
            sink.write_batch("records", &batch(&[1], &["a"])).unwrap();
            sink.commit().unwrap();
        }

        let conn = duckdb::Connection::open(&db_path).unwrap();
        assert_eq!(count_rows(&conn, "records").unwrap(), 2);
    }

    #[test]
    fn second_writer_is_rejected() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("locked.duckdb");

        let _sink1 = DuckDbSink::open(&db_path, RunId::new()).unwrap();
        let err = DuckDbSink::open(&db_path, RunId::new()).unwrap_err();
        assert!(
            err.to_string().to_lowercase().contains("locked"),
            "expected lock error, got: {}",
            err
        );
    }

    #[test]
    fn multiple_targets_commit_independently() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("multi.duckdb");

        let mut sink = DuckDbSink::open(&db_path, RunId::new()).unwrap();
        sink.init("alpha", test_schema(), &["id".to_string()], SinkMode::Replace)
            .unwrap();
        sink.init("beta", test_schema(), &["id".to_string()], SinkMode::Replace)
            .unwrap();
        sink.write_batch("alpha", &batch(&[1], &["a"])).unwrap();
        sink.write_batch("beta", &batch(&[2, 3], &["b", "c"])).unwrap();
        let rows = sink.commit().unwrap();
        assert_eq!(rows, 3);

        let conn = duckdb::Connection::open(&db_path).unwrap();
        assert_eq!(count_rows(&conn, "alpha").unwrap(), 1);
        assert_eq!(count_rows(&conn, "beta").unwrap(), 2);
    }
}
