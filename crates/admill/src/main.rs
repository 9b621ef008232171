//! Admill CLI.
//!
//! Batch jobs deriving session documents and analytic projections from a
//! flat ad-event log. Both jobs are idempotent full reloads: rerunning
//! against unchanged input reproduces identical output.

use admill::jobs::{
    aggregate_events, aggregate_job, load_raw_job, scan_source, sessionize_job, SourceSpec,
};
use admill_model::{AnchorMode, EtlConfig};
use admill_sessions::sessionize;
use admill_sinks::SinkTarget;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "admill", about = "Ad-event sessionization and projection batch jobs")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// Inactivity timeout closing a session, in minutes
    #[arg(long, env = "ADMILL_SESSION_TIMEOUT_MINUTES", default_value_t = 30)]
    timeout_minutes: i64,

    /// Rows pulled from the source per chunk
    #[arg(long, env = "ADMILL_READ_CHUNK_SIZE", default_value_t = 5000)]
    chunk_size: usize,

    /// Rows per sink write batch (50-1000 is the useful range)
    #[arg(long, env = "ADMILL_WRITE_BATCH_SIZE", default_value_t = 500)]
    batch_size: usize,

    /// Anchor for 30-day windowed projections: latest-event | fixed-clock
    #[arg(long, env = "ADMILL_ANCHOR", default_value = "latest-event")]
    anchor: AnchorMode,

    /// CSV field separator
    #[arg(long, env = "ADMILL_CSV_SEPARATOR", default_value = ",")]
    csv_separator: String,
}

impl CommonOpts {
    fn to_config(&self) -> Result<EtlConfig> {
        let separator = match self.csv_separator.as_bytes() {
            [byte] => *byte,
            _ => anyhow::bail!(
                "CSV separator must be a single byte, got '{}'",
                self.csv_separator
            ),
        };
        let mut config = EtlConfig::default().with_timeout_minutes(self.timeout_minutes);
        config.read_chunk_size = self.chunk_size;
        config.write_batch_size = self.batch_size;
        config.anchor_mode = self.anchor;
        config.csv_separator = separator;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Window raw events into nested session documents
    Sessionize {
        /// Event source: csv path/uri or duckdb path/uri
        #[arg(long)]
        source: String,

        /// Output path for NDJSON session documents
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        opts: CommonOpts,
    },

    /// Recompute every analytic projection from the raw event stream
    Aggregate {
        /// Event source: csv path/uri or duckdb path/uri
        #[arg(long)]
        source: String,

        /// Projection sink: duckdb://path or parquet://dir
        #[arg(long)]
        sink: String,

        #[command(flatten)]
        opts: CommonOpts,
    },

    /// Sessionize and aggregate over one source scan
    Run {
        /// Event source: csv path/uri or duckdb path/uri
        #[arg(long)]
        source: String,

        /// Output path for NDJSON session documents
        #[arg(long)]
        out: PathBuf,

        /// Projection sink: duckdb://path or parquet://dir
        #[arg(long)]
        sink: String,

        #[command(flatten)]
        opts: CommonOpts,
    },

    /// Stage a CSV export into the raw_events table
    LoadRaw {
        /// CSV file to load
        #[arg(long)]
        source: PathBuf,

        /// DuckDB database holding raw_events
        #[arg(long)]
        db: PathBuf,

        #[command(flatten)]
        opts: CommonOpts,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = admill_logging::init_logging("admill", cli.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Sessionize { source, out, opts } => {
            let config = opts.to_config()?;
            let source = SourceSpec::parse(&source)?;
            let summary = sessionize_job(&source, &out, &config)?;
            println!(
                "Sessionized {} events ({} rows skipped) into {} sessions: {}",
                summary.events_scanned,
                summary.rows_skipped,
                summary.sessions_written,
                summary.out_path.display()
            );
            Ok(())
        }
        Commands::Aggregate { source, sink, opts } => {
            let config = opts.to_config()?;
            let source = SourceSpec::parse(&source)?;
            let target = SinkTarget::parse(&sink).context("Invalid sink")?;
            let summary = aggregate_job(&source, &target, &config)?;
            print_aggregate_summary(&summary);
            Ok(())
        }
        Commands::Run {
            source,
            out,
            sink,
            opts,
        } => {
            let config = opts.to_config()?;
            let source = SourceSpec::parse(&source)?;
            let target = SinkTarget::parse(&sink).context("Invalid sink")?;

            // One source scan shared by both consumers.
            let outcome = scan_source(&source, &config)?;
            let events_scanned = outcome.events.len();

            let sessions = sessionize(outcome.events.clone(), config.session_timeout);
            let written = admill_sinks::write_sessions(
                &out,
                &sessions,
                config.write_batch_size,
                &admill_model::RunId::new(),
            )?;
            println!(
                "Sessionized {} events into {} sessions: {}",
                events_scanned,
                written,
                out.display()
            );

            let summary = aggregate_events(&outcome, &target, &config)?;
            print_aggregate_summary(&summary);
            Ok(())
        }
        Commands::LoadRaw { source, db, opts } => {
            let config = opts.to_config()?;
            let (written, skipped) = load_raw_job(&source, &db, &config)?;
            println!(
                "Loaded {} raw events ({} rows skipped) into {}",
                written,
                skipped,
                db.display()
            );
            Ok(())
        }
    }
}

fn print_aggregate_summary(summary: &admill::jobs::AggregateSummary) {
    println!(
        "Aggregated {} events ({} rows skipped): {} rows written, {} batches failed",
        summary.events_scanned,
        summary.rows_skipped,
        summary.rows_written,
        summary.batches_failed
    );
    for (name, rows) in &summary.projections {
        println!("  {}: {} rows", name, rows);
    }
}
