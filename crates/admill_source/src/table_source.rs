//! DuckDB `raw_events` table source.
//!
//! Scans the staging table in bounded pages and funnels every row through
//! the same normalization path as the CSV reader, so the two backends are
//! interchangeable upstream of the engines.

use crate::normalize::{normalize, RawRecord};
use crate::{EventSource, SourceError, SourceResult};
use admill_model::RawEvent;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Staging table holding one row per raw event.
pub const RAW_EVENTS_TABLE: &str = "raw_events";

const SCAN_SQL: &str = "\
SELECT event_id, CAST(user_id AS VARCHAR), advertiser_name, campaign_name, \
       device, location, CAST(ts AS VARCHAR), CAST(bid_amount AS VARCHAR), \
       CAST(ad_cost AS VARCHAR), CAST(was_clicked AS VARCHAR), \
       COALESCE(CAST(click_ts AS VARCHAR), ''), \
       COALESCE(CAST(ad_revenue AS VARCHAR), ''), ad_slot_size, \
       COALESCE(targeting_country, ''), COALESCE(targeting_interest, ''), \
       COALESCE(targeting_criteria, ''), \
       COALESCE(CAST(campaign_start AS VARCHAR), ''), \
       COALESCE(CAST(campaign_end AS VARCHAR), '') \
FROM raw_events ORDER BY event_id LIMIT ? OFFSET ?";

/// Pages through `raw_events` in stable `event_id` order.
pub struct DuckDbEventSource {
    db_path: PathBuf,
    conn: Connection,
    chunk_size: usize,
    offset: u64,
    rows_skipped: u64,
    done: bool,
}

impl DuckDbEventSource {
    pub fn open(db_path: impl AsRef<Path>, chunk_size: usize) -> SourceResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.exists() {
            return Err(SourceError::Unavailable {
                path: db_path,
                reason: "database file does not exist".to_string(),
            });
        }
        let conn = Connection::open(&db_path).map_err(|e| SourceError::Unavailable {
            path: db_path.clone(),
            reason: e.to_string(),
        })?;

        let table_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [RAW_EVENTS_TABLE],
            |row| row.get(0),
        )?;
        if table_count == 0 {
            return Err(SourceError::Unavailable {
                path: db_path,
                reason: format!("table {} does not exist", RAW_EVENTS_TABLE),
            });
        }

        debug!("Opened DuckDB source: {}", db_path.display());
        Ok(Self {
            db_path,
            conn,
            chunk_size: chunk_size.max(1),
            offset: 0,
            rows_skipped: 0,
            done: false,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl EventSource for DuckDbEventSource {
    fn next_chunk(&mut self) -> SourceResult<Option<Vec<RawEvent>>> {
        if self.done {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(SCAN_SQL)?;
        let records: Vec<RawRecord> = stmt
            .query_map(
                duckdb::params![self.chunk_size as i64, self.offset as i64],
                |row| {
                    Ok(RawRecord {
                        event_id: row.get(0)?,
                        user_id: row.get(1)?,
                        advertiser_name: row.get(2)?,
                        campaign_name: row.get(3)?,
                        device: row.get(4)?,
                        location: row.get(5)?,
                        timestamp: row.get(6)?,
                        bid_amount: row.get(7)?,
                        ad_cost: row.get(8)?,
                        was_clicked: row.get(9)?,
                        click_timestamp: row.get(10)?,
                        ad_revenue: row.get(11)?,
                        ad_slot_size: row.get(12)?,
                        targeting_country: row.get(13)?,
                        targeting_interest: row.get(14)?,
                        targeting_criteria: row.get(15)?,
                        campaign_start: row.get(16)?,
                        campaign_end: row.get(17)?,
                    })
                },
            )?
            .collect::<Result<_, _>>()?;

        if records.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.offset += records.len() as u64;
        if records.len() < self.chunk_size {
            self.done = true;
        }

        let mut chunk = Vec::with_capacity(records.len());
        for record in &records {
            match normalize(record) {
                Ok(event) => chunk.push(event),
                Err(err) => {
                    self.rows_skipped += 1;
                    warn!(event_id = %record.event_id, "Skipping malformed row: {}", err);
                }
            }
        }
        Ok(Some(chunk))
    }

    fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }
}
