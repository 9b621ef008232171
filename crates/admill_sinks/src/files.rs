//! File-backed sinks: Parquet projection exports and NDJSON session
//! documents. Both stage into a hidden temp file and promote with an
//! atomic rename on commit, so readers never observe a half-written file.

use admill_model::{RunId, Session};
use anyhow::{Context, Result};
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn run_prefix(run_id: &RunId) -> String {
    blake3::hash(run_id.as_str().as_bytes()).to_hex()[..16].to_string()
}

struct ParquetTarget {
    writer: Option<ArrowWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    rows_written: u64,
}

/// Writes each target to `<dir>/<table>.parquet`, replace semantics.
pub struct ParquetDirSink {
    output_dir: PathBuf,
    run_id: RunId,
    targets: BTreeMap<String, ParquetTarget>,
}

impl ParquetDirSink {
    pub fn open(output_dir: impl AsRef<Path>, run_id: RunId) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;
        Ok(Self {
            output_dir,
            run_id,
            targets: BTreeMap::new(),
        })
    }

    pub fn init(&mut self, table: &str, schema: SchemaRef) -> Result<()> {
        let final_path = self.output_dir.join(format!("{}.parquet", table));
        let temp_path = self
            .output_dir
            .join(format!(".{}_{}.parquet.tmp", table, run_prefix(&self.run_id)));

        info!(
            "Initializing Parquet target: {} (temp: {})",
            final_path.display(),
            temp_path.display()
        );

        let file = File::create(&temp_path).with_context(|| {
            format!("Failed to create temp parquet file: {}", temp_path.display())
        })?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .context("Failed to create Parquet writer")?;

        self.targets.insert(
            table.to_string(),
            ParquetTarget {
                writer: Some(writer),
                temp_path,
                final_path,
                rows_written: 0,
            },
        );
        Ok(())
    }

    pub fn write_batch(&mut self, table: &str, batch: &RecordBatch) -> Result<u64> {
        let target = self
            .targets
            .get_mut(table)
            .ok_or_else(|| anyhow::anyhow!("Target not initialized: {}", table))?;
        let writer = target
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Parquet writer already closed: {}", table))?;

        writer
            .write(batch)
            .context("Failed to write batch to Parquet")?;
        let rows = batch.num_rows() as u64;
        target.rows_written += rows;
        debug!(
            "Wrote {} rows to {} (total: {})",
            rows, table, target.rows_written
        );
        Ok(rows)
    }

    pub fn commit(&mut self) -> Result<u64> {
        let mut total_rows = 0;
        for (table, target) in &mut self.targets {
            if let Some(writer) = target.writer.take() {
                writer.close().context("Failed to close Parquet writer")?;
            }
            std::fs::rename(&target.temp_path, &target.final_path).with_context(|| {
                format!(
                    "Failed to rename {} -> {}",
                    target.temp_path.display(),
                    target.final_path.display()
                )
            })?;
            info!(
                "Committed Parquet target: {} ({} rows)",
                target.final_path.display(),
                target.rows_written
            );
            total_rows += target.rows_written;
        }
        self.targets.clear();
        Ok(total_rows)
    }

    pub fn rollback(&mut self) -> Result<()> {
        for target in self.targets.values_mut() {
            drop(target.writer.take());
            if target.temp_path.exists() {
                let _ = std::fs::remove_file(&target.temp_path);
                warn!("Rolled back Parquet temp file: {}", target.temp_path.display());
            }
        }
        self.targets.clear();
        Ok(())
    }
}

impl Drop for ParquetDirSink {
    fn drop(&mut self) {
        for target in self.targets.values_mut() {
            drop(target.writer.take());
            if target.temp_path.exists() {
                let _ = std::fs::remove_file(&target.temp_path);
                warn!(
                    "Cleaned up orphaned temp file: {}",
                    target.temp_path.display()
                );
            }
        }
    }
}

/// Session-document sink: one JSON document per line.
pub struct NdjsonSessionSink {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    docs_written: u64,
}

impl NdjsonSessionSink {
    pub fn create(path: impl AsRef<Path>, run_id: &RunId) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory: {}", parent.display())
                })?;
            }
        }

        let file_name = final_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("sessions.ndjson");
        let temp_path = final_path.with_file_name(format!(".{}_{}.tmp", file_name, run_prefix(run_id)));

        info!(
            "Initializing session sink: {} (temp: {})",
            final_path.display(),
            temp_path.display()
        );
        let file = File::create(&temp_path).with_context(|| {
            format!("Failed to create temp session file: {}", temp_path.display())
        })?;

        Ok(Self {
            temp_path,
            final_path,
            writer: Some(BufWriter::new(file)),
            docs_written: 0,
        })
    }

    /// Write one bounded batch of session documents.
    pub fn write_batch(&mut self, sessions: &[Session]) -> Result<u64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Session sink already closed"))?;
        for session in sessions {
            serde_json::to_writer(&mut *writer, session)
                .context("Failed to serialize session document")?;
            writer
                .write_all(b"\n")
                .context("Failed to write session document")?;
        }
        self.docs_written += sessions.len() as u64;
        debug!(
            "Wrote {} session documents (total: {})",
            sessions.len(),
            self.docs_written
        );
        Ok(sessions.len() as u64)
    }

    pub fn docs_written(&self) -> u64 {
        self.docs_written
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("Failed to flush session sink")?;
        }
        std::fs::rename(&self.temp_path, &self.final_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                self.temp_path.display(),
                self.final_path.display()
            )
        })?;
        info!(
            "Committed session sink: {} ({} documents)",
            self.final_path.display(),
            self.docs_written
        );
        Ok(self.final_path.clone())
    }
}

impl Drop for NdjsonSessionSink {
    fn drop(&mut self) {
        drop(self.writer.take());
        if self.temp_path.exists() {
            let _ = std::fs::remove_file(&self.temp_path);
            warn!("Cleaned up orphaned temp file: {}", self.temp_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn int_batch(values: &[i64]) -> (SchemaRef, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int64Array::from(values.to_vec()))],
        )
        .unwrap();
        (schema, batch)
    }

    #[test]
    fn parquet_commit_promotes_temp_file() {
        let dir = tempdir().unwrap();
        let mut sink = ParquetDirSink::open(dir.path(), RunId::new()).unwrap();
        let (schema, batch) = int_batch(&[1, 2, 3]);

        sink.init("metrics", schema).unwrap();
        sink.write_batch("metrics", &batch).unwrap();
        let rows = sink.commit().unwrap();
        assert_eq!(rows, 3);

        let final_path = dir.path().join("metrics.parquet");
        assert!(final_path.exists());
        // No stray temp files.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let file = File::open(final_path).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let read = reader.next().unwrap().unwrap();
        assert_eq!(read.num_rows(), 3);
    }

    #[test]
    fn parquet_rerun_replaces_previous_export() {
        let dir = tempdir().unwrap();
        for values in [&[1i64, 2, 3][..], &[7][..]] {
            let mut sink = ParquetDirSink::open(dir.path(), RunId::new()).unwrap();
            let (schema, batch) = int_batch(values);
            sink.init("metrics", schema).unwrap();
            sink.write_batch("metrics", &batch).unwrap();
            sink.commit().unwrap();
        }

        let file = File::open(dir.path().join("metrics.parquet")).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let read = reader.next().unwrap().unwrap();
        assert_eq!(read.num_rows(), 1);
    }

    #[test]
    fn parquet_rollback_removes_temp() {
        let dir = tempdir().unwrap();
        let mut sink = ParquetDirSink::open(dir.path(), RunId::new()).unwrap();
        let (schema, batch) = int_batch(&[1]);
        sink.init("metrics", schema).unwrap();
        sink.write_batch("metrics", &batch).unwrap();
        sink.rollback().unwrap();

        assert!(!dir.path().join("metrics.parquet").exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn ndjson_sink_writes_one_document_per_line() {
        use admill_model::{Impression, RawEvent, SlotSize};
        use chrono::{TimeZone, Utc};
        use rust_decimal::Decimal;

        let event = RawEvent {
            event_id: "e1".into(),
            user_id: 5,
            advertiser_name: "Acme".into(),
            campaign_name: "C_1".into(),
            device: "mobile".into(),
            location: "Kyiv".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            bid_amount: Decimal::ONE,
            ad_cost: Decimal::TWO,
            was_clicked: false,
            click_timestamp: None,
            ad_revenue: None,
            slot: SlotSize {
                width: 300,
                height: 250,
            },
            targeting_country: None,
            targeting_interest: None,
            targeting_criteria: None,
            campaign_start: None,
            campaign_end: None,
        };
        let session = Session::from_impressions(5, vec![Impression::from_event(&event)]).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.ndjson");
        let mut sink = NdjsonSessionSink::create(&path, &RunId::new()).unwrap();
        sink.write_batch(std::slice::from_ref(&session)).unwrap();
        sink.write_batch(std::slice::from_ref(&session)).unwrap();
        assert_eq!(sink.docs_written(), 2);
        sink.commit().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let doc: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(doc["userId"], 5);
        assert_eq!(doc["impressionsCount"], 1);
    }

    #[test]
    fn ndjson_uncommitted_temp_is_cleaned_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.ndjson");
        {
            let _sink = NdjsonSessionSink::create(&path, &RunId::new()).unwrap();
        }
        assert!(!path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }
}
