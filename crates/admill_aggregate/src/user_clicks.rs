//! Per-user click counts over the rolling window.

use crate::batch::in_batches;
use crate::{Projection, WINDOW_BUCKET, WINDOW_DAYS};
use admill_model::RawEvent;
use anyhow::Result;
use arrow::array::{Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key `(time_bucket, user_id)`; click counter. Only clicked events inside
/// the window contribute.
#[derive(Default)]
pub struct TopUsersByClicks {
    clicks: BTreeMap<i64, i64>,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
}

impl Projection for TopUsersByClicks {
    fn name(&self) -> &'static str {
        "top_users_by_clicks"
    }

    fn target_table(&self) -> &'static str {
        "top_users_by_clicks"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("time_bucket", DataType::Utf8, false),
            Field::new("user_id", DataType::Int64, false),
            Field::new("total_clicks", DataType::Int64, false),
        ]))
    }

    fn begin(&mut self, anchor: Option<DateTime<Utc>>) {
        self.clicks.clear();
        self.window_end = anchor;
        self.window_start = anchor.map(|end| end - Duration::days(WINDOW_DAYS));
    }

    fn observe(&mut self, event: &RawEvent) {
        if !event.was_clicked {
            return;
        }
        let (Some(start), Some(end)) = (self.window_start, self.window_end) else {
            return;
        };
        if event.timestamp < start || event.timestamp > end {
            return;
        }
        *self.clicks.entry(event.user_id).or_insert(0) += 1;
    }

    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>> {
        let rows: Vec<(i64, i64)> = self
            .clicks
            .iter()
            .map(|(&user_id, &total)| (user_id, total))
            .collect();

        let schema = self.schema();
        in_batches(&rows, batch_size, |chunk| {
            Ok(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|_| WINDOW_BUCKET),
                    )),
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|(user_id, _)| *user_id),
                    )),
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|(_, total)| *total),
                    )),
                ],
            )?)
        })
    }
}
