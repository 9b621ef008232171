//! Full-fidelity per-user engagement history.

use crate::batch::{in_batches, timestamp_micros};
use crate::Projection;
use admill_model::RawEvent;
use anyhow::Result;
use arrow::array::{BooleanArray, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, Utc};
use std::sync::Arc;

struct Row {
    user_id: i64,
    event_time: DateTime<Utc>,
    campaign_name: String,
    advertiser_name: String,
    was_clicked: bool,
}

/// No aggregation: one output row per input event, ordered
/// `(user_id asc, event_time desc)` so the sink serves newest-first range
/// lookups per user.
#[derive(Default)]
pub struct UserEngagementHistory {
    rows: Vec<Row>,
}

impl Projection for UserEngagementHistory {
    fn name(&self) -> &'static str {
        "user_engagement_history"
    }

    fn target_table(&self) -> &'static str {
        "user_engagement_history"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Int64, false),
            Field::new(
                "event_time",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("campaign_name", DataType::Utf8, false),
            Field::new("advertiser_name", DataType::Utf8, false),
            Field::new("was_clicked", DataType::Boolean, false),
        ]))
    }

    fn begin(&mut self, _anchor: Option<DateTime<Utc>>) {
        self.rows.clear();
    }

    fn observe(&mut self, event: &RawEvent) {
        self.rows.push(Row {
            user_id: event.user_id,
            event_time: event.timestamp,
            campaign_name: event.campaign_name.clone(),
            advertiser_name: event.advertiser_name.clone(),
            was_clicked: event.was_clicked,
        });
    }

    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>> {
        self.rows.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| b.event_time.cmp(&a.event_time))
                .then_with(|| a.campaign_name.cmp(&b.campaign_name))
        });

        let schema = self.schema();
        in_batches(&self.rows, batch_size, |chunk| {
            let times = TimestampMicrosecondArray::from_iter_values(
                chunk.iter().map(|row| timestamp_micros(row.event_time)),
            )
            .with_timezone("UTC");
            Ok(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|row| row.user_id),
                    )),
                    Arc::new(times),
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|row| row.campaign_name.as_str()),
                    )),
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|row| row.advertiser_name.as_str()),
                    )),
                    Arc::new(BooleanArray::from_iter(
                        chunk.iter().map(|row| Some(row.was_clicked)),
                    )),
                ],
            )?)
        })
    }
}
