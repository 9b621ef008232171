//! Job orchestration: source scan, engines, and sink writes wired
//! together for the CLI and for integration tests.

use admill_aggregate::{FanOutEngine, ProjectionOutput};
use admill_model::{EtlConfig, RunId, Session, SinkMode};
use admill_sessions::sessionize;
use admill_sinks::schema::{ensure_projection_tables, projection_key_columns};
use admill_sinks::{write_outputs, write_sessions, OutputPlan, SinkTarget};
use admill_source::{read_all, CsvEventSource, DuckDbEventSource, ScanOutcome};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where raw events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Csv(PathBuf),
    DuckDb(PathBuf),
}

impl SourceSpec {
    /// Parse `csv://path`, `duckdb://path`, or a bare path by extension.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(path) = spec.strip_prefix("csv://") {
            return Ok(SourceSpec::Csv(PathBuf::from(path)));
        }
        if let Some(path) = spec.strip_prefix("duckdb://") {
            return Ok(SourceSpec::DuckDb(PathBuf::from(path)));
        }
        if spec.contains("://") {
            bail!("Unsupported source URI: {}", spec);
        }
        let path = PathBuf::from(spec);
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(SourceSpec::Csv(path)),
            Some("duckdb") | Some("db") => Ok(SourceSpec::DuckDb(path)),
            _ => bail!(
                "Cannot infer source type from path: {} (expected .csv, .duckdb or a URI scheme)",
                spec
            ),
        }
    }
}

/// One full scan of the configured source.
pub fn scan_source(source: &SourceSpec, config: &EtlConfig) -> Result<ScanOutcome> {
    let outcome = match source {
        SourceSpec::Csv(path) => {
            let mut reader = CsvEventSource::open(path, config.csv_separator, config.read_chunk_size)
                .with_context(|| format!("Failed to open CSV source: {}", path.display()))?;
            read_all(&mut reader)?
        }
        SourceSpec::DuckDb(path) => {
            let mut reader = DuckDbEventSource::open(path, config.read_chunk_size)
                .with_context(|| format!("Failed to open DuckDB source: {}", path.display()))?;
            read_all(&mut reader)?
        }
    };
    info!(
        events = outcome.events.len(),
        skipped = outcome.rows_skipped,
        "Source scan complete"
    );
    Ok(outcome)
}

/// Summary of a windowing run.
pub struct SessionizeSummary {
    pub events_scanned: usize,
    pub rows_skipped: u64,
    pub sessions_written: u64,
    pub out_path: PathBuf,
}

/// Summary of an aggregation run.
#[derive(Debug)]
pub struct AggregateSummary {
    pub events_scanned: usize,
    pub rows_skipped: u64,
    pub rows_written: u64,
    pub batches_failed: u64,
    pub projections: Vec<(String, u64)>,
}

/// Windowing run: source -> session documents -> NDJSON sink.
pub fn sessionize_job(
    source: &SourceSpec,
    out_path: &Path,
    config: &EtlConfig,
) -> Result<SessionizeSummary> {
    let outcome = scan_source(source, config)?;
    let events_scanned = outcome.events.len();
    let sessions = sessionize(outcome.events, config.session_timeout);
    let summary = write_session_documents(&sessions, out_path, config)?;
    Ok(SessionizeSummary {
        events_scanned,
        rows_skipped: outcome.rows_skipped,
        sessions_written: summary,
        out_path: out_path.to_path_buf(),
    })
}

fn write_session_documents(
    sessions: &[Session],
    out_path: &Path,
    config: &EtlConfig,
) -> Result<u64> {
    let run_id = RunId::new();
    let written = write_sessions(out_path, sessions, config.write_batch_size, &run_id)
        .context("Failed to write session documents")?;
    info!(
        sessions = written,
        path = %out_path.display(),
        "Session documents written"
    );
    Ok(written)
}

/// Aggregation run: source -> fan-out engine -> projection sinks.
pub fn aggregate_job(
    source: &SourceSpec,
    target: &SinkTarget,
    config: &EtlConfig,
) -> Result<AggregateSummary> {
    let outcome = scan_source(source, config)?;
    aggregate_events(&outcome, target, config)
}

/// Aggregation over an already-scanned outcome (shared by `run`).
pub fn aggregate_events(
    outcome: &ScanOutcome,
    target: &SinkTarget,
    config: &EtlConfig,
) -> Result<AggregateSummary> {
    let mut engine = FanOutEngine::with_default_projections(config.anchor_mode);
    engine.scan(&outcome.events);
    let flushed = engine
        .flush(config.write_batch_size)
        .context("Failed to flush projections")?;

    if let SinkTarget::DuckDb(db_path) = target {
        ensure_target_schema(db_path)?;
    }

    let plans: Vec<OutputPlan> = flushed.iter().map(to_output_plan).collect();
    let projections: Vec<(String, u64)> = flushed
        .iter()
        .map(|output| (output.name.to_string(), output.rows() as u64))
        .collect();

    let report = write_outputs(target, &plans, RunId::new())
        .context("Failed to write projection outputs")?;

    Ok(AggregateSummary {
        events_scanned: outcome.events.len(),
        rows_skipped: outcome.rows_skipped,
        rows_written: report.rows_written,
        batches_failed: report.batches_failed,
        projections,
    })
}

fn to_output_plan(output: &ProjectionOutput) -> OutputPlan {
    OutputPlan {
        name: output.name.to_string(),
        table: output.table.to_string(),
        schema: output.schema.clone(),
        key_columns: projection_key_columns(output.table)
            .iter()
            .map(|k| k.to_string())
            .collect(),
        batches: output.batches.clone(),
        sink_mode: SinkMode::Replace,
    }
}

fn ensure_target_schema(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }
    let conn = duckdb::Connection::open(db_path)
        .with_context(|| format!("Failed to open DuckDB database: {}", db_path.display()))?;
    ensure_projection_tables(&conn)?;
    Ok(())
}

/// Stage a CSV export into the `raw_events` table (append mode).
pub fn load_raw_job(csv_path: &Path, db_path: &Path, config: &EtlConfig) -> Result<(u64, u64)> {
    let source = SourceSpec::Csv(csv_path.to_path_buf());
    let outcome = scan_source(&source, config)?;

    let mut conn = duckdb::Connection::open(db_path)
        .with_context(|| format!("Failed to open DuckDB database: {}", db_path.display()))?;
    let written = admill_sinks::schema::append_raw_events(
        &mut conn,
        &outcome.events,
        config.write_batch_size,
    )?;
    Ok((written, outcome.rows_skipped))
}
