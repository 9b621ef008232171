//! Batched Sink Writer.
//!
//! Takes completed session documents or projection flushes and persists
//! them in bounded batches. Full reloads are staged (stage table or temp
//! file) and promoted atomically on commit, so a rerun with unchanged
//! source data yields an output set with no stale leftover keys and an
//! interrupted run leaves the previous target intact.

use admill_model::{RunId, Session, SinkMode};
use anyhow::Result;
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

pub mod files;
pub mod lock;
pub mod relational;
pub mod schema;

pub use files::{NdjsonSessionSink, ParquetDirSink};
pub use lock::{lock_path_for, try_lock_exclusive, DbLockGuard, LockError};
pub use relational::{count_rows, DuckDbSink};

/// Errors returned by sink planning and writing.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SinkError {
    fn from(err: anyhow::Error) -> Self {
        SinkError::Source {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Where projection flushes land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// Tables in one DuckDB database file.
    DuckDb(PathBuf),
    /// One Parquet file per projection in a directory.
    ParquetDir(PathBuf),
}

impl SinkTarget {
    /// Parse `duckdb://path`, `parquet://dir`, or a bare `.duckdb`/`.db`
    /// path.
    pub fn parse(uri: &str) -> SinkResult<Self> {
        if let Some(path) = uri.strip_prefix("duckdb://") {
            return Ok(SinkTarget::DuckDb(PathBuf::from(path)));
        }
        if let Some(path) = uri.strip_prefix("parquet://") {
            return Ok(SinkTarget::ParquetDir(PathBuf::from(path)));
        }
        if uri.contains("://") {
            return Err(SinkError::message(format!("Unsupported sink URI: {}", uri)));
        }
        let path = PathBuf::from(uri);
        match path.extension().and_then(|e| e.to_str()) {
            Some("duckdb") | Some("db") => Ok(SinkTarget::DuckDb(path)),
            _ => Err(SinkError::message(format!(
                "Cannot infer sink type from path: {} (expected .duckdb/.db or a URI scheme)",
                uri
            ))),
        }
    }
}

/// One projection's flush, ready to write.
pub struct OutputPlan {
    pub name: String,
    pub table: String,
    pub schema: SchemaRef,
    pub key_columns: Vec<String>,
    pub batches: Vec<RecordBatch>,
    pub sink_mode: SinkMode,
}

/// Where one output landed.
pub struct OutputArtifact {
    pub name: String,
    pub uri: String,
    pub rows: u64,
}

/// Outcome of a full write pass.
#[derive(Default)]
pub struct WriteReport {
    pub rows_written: u64,
    pub batches_failed: u64,
    pub artifacts: Vec<OutputArtifact>,
}

/// Write every output plan into the target.
///
/// A batch rejected by the sink is logged with its projection and batch
/// index and does not block subsequent batches; the reload is
/// best-effort-idempotent, not atomic across batches. An empty plan still
/// replaces its target, clearing keys absent from this run.
pub fn write_outputs(
    target: &SinkTarget,
    outputs: &[OutputPlan],
    run_id: RunId,
) -> SinkResult<WriteReport> {
    match target {
        SinkTarget::DuckDb(db_path) => {
            let mut sink = DuckDbSink::open(db_path, run_id)?;
            let mut report = WriteReport::default();

            for output in outputs {
                sink.init(
                    &output.table,
                    output.schema.clone(),
                    &output.key_columns,
                    output.sink_mode,
                )?;
                let rows = write_plan_batches(output, &mut report, |batch| {
                    sink.write_batch(&output.table, batch)
                });
                report.artifacts.push(OutputArtifact {
                    name: output.name.clone(),
                    uri: format!("duckdb://{}?table={}", db_path.display(), output.table),
                    rows,
                });
            }

            let rows = sink.commit()?;
            report.rows_written = rows;
            log_report(&report);
            Ok(report)
        }
        SinkTarget::ParquetDir(dir) => {
            let mut sink = ParquetDirSink::open(dir, run_id)?;
            let mut report = WriteReport::default();

            for output in outputs {
                sink.init(&output.table, output.schema.clone())?;
                let rows = write_plan_batches(output, &mut report, |batch| {
                    sink.write_batch(&output.table, batch)
                });
                report.artifacts.push(OutputArtifact {
                    name: output.name.clone(),
                    uri: format!(
                        "file://{}",
                        dir.join(format!("{}.parquet", output.table)).display()
                    ),
                    rows,
                });
            }

            let rows = sink.commit()?;
            report.rows_written = rows;
            log_report(&report);
            Ok(report)
        }
    }
}

fn write_plan_batches(
    output: &OutputPlan,
    report: &mut WriteReport,
    mut write: impl FnMut(&RecordBatch) -> Result<u64>,
) -> u64 {
    let mut rows_written = 0;
    for (index, batch) in output.batches.iter().enumerate() {
        match write(batch) {
            Ok(rows) => rows_written += rows,
            Err(err) => {
                report.batches_failed += 1;
                warn!(
                    projection = output.name.as_str(),
                    batch = index,
                    rows = batch.num_rows(),
                    "Batch write failed, continuing: {:#}",
                    err
                );
            }
        }
    }
    rows_written
}

fn log_report(report: &WriteReport) {
    info!(
        rows = report.rows_written,
        failed_batches = report.batches_failed,
        outputs = report.artifacts.len(),
        "Sink write pass complete"
    );
}

/// Write session documents in bounded batches and commit atomically.
pub fn write_sessions(
    path: impl Into<PathBuf>,
    sessions: &[Session],
    batch_size: usize,
    run_id: &RunId,
) -> SinkResult<u64> {
    let path = path.into();
    let mut sink = NdjsonSessionSink::create(&path, run_id)?;
    for chunk in sessions.chunks(batch_size.max(1)) {
        sink.write_batch(chunk)?;
    }
    let written = sink.docs_written();
    sink.commit()?;
    Ok(written)
}
