//! Event Source Reader.
//!
//! Pulls raw event rows from a delimited bulk file or the `raw_events`
//! table in bounded chunks and normalizes field types. Malformed rows are
//! skipped with a counted warning; an unreachable source is fatal before
//! anything downstream runs.

use admill_model::RawEvent;
use std::path::PathBuf;
use thiserror::Error;

mod csv_source;
mod normalize;
mod table_source;

pub use csv_source::CsvEventSource;
pub use table_source::{DuckDbEventSource, RAW_EVENTS_TABLE};

/// Fatal source failures. Row-level parse errors never surface here; they
/// are counted on the source and the row is dropped.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source is unreadable: {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("Source is missing required column '{0}'")]
    MissingColumn(String),

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Db(#[from] duckdb::Error),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A sequence of normalized events, delivered in bounded chunks.
pub trait EventSource {
    /// Next chunk of valid events, or `None` once the source is drained.
    /// An empty source yields `None` on the first call.
    fn next_chunk(&mut self) -> SourceResult<Option<Vec<RawEvent>>>;

    /// Rows dropped so far because a field failed to normalize.
    fn rows_skipped(&self) -> u64;
}

/// Everything one full scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub events: Vec<RawEvent>,
    pub rows_skipped: u64,
}

/// Drain a source into memory, preserving source order.
pub fn read_all<S: EventSource>(source: &mut S) -> SourceResult<ScanOutcome> {
    let mut events = Vec::new();
    while let Some(chunk) = source.next_chunk()? {
        events.extend(chunk);
    }
    Ok(ScanOutcome {
        events,
        rows_skipped: source.rows_skipped(),
    })
}
