//! Per-campaign daily impressions, clicks, and click-through rate.

use crate::batch::{date_array, in_batches};
use crate::Projection;
use admill_model::RawEvent;
use anyhow::Result;
use arrow::array::{Date32Array, Float64Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
struct DailyCounts {
    impressions: i64,
    clicks: i64,
}

/// Key `(campaign_id, event_date)`; counter accumulation. Events whose
/// campaign name carries no numeric id suffix are skipped for this
/// projection only.
#[derive(Default)]
pub struct CampaignDailyMetrics {
    counts: BTreeMap<(i64, NaiveDate), DailyCounts>,
}

struct Row {
    campaign_id: i64,
    event_date: NaiveDate,
    impressions: i64,
    clicks: i64,
}

impl Projection for CampaignDailyMetrics {
    fn name(&self) -> &'static str {
        "campaign_daily_metrics"
    }

    fn target_table(&self) -> &'static str {
        "campaign_daily_metrics"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("campaign_id", DataType::Int64, false),
            Field::new("event_date", DataType::Date32, false),
            Field::new("impressions", DataType::Int64, false),
            Field::new("clicks", DataType::Int64, false),
            Field::new("ctr", DataType::Float64, false),
        ]))
    }

    fn begin(&mut self, _anchor: Option<DateTime<Utc>>) {
        self.counts.clear();
    }

    fn observe(&mut self, event: &RawEvent) {
        let Some(campaign_id) = event.campaign_id() else {
            return;
        };
        let entry = self
            .counts
            .entry((campaign_id, event.event_date()))
            .or_default();
        entry.impressions += 1;
        if event.was_clicked {
            entry.clicks += 1;
        }
    }

    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>> {
        let rows: Vec<Row> = self
            .counts
            .iter()
            .map(|(&(campaign_id, event_date), counts)| Row {
                campaign_id,
                event_date,
                impressions: counts.impressions,
                clicks: counts.clicks,
            })
            .collect();

        let schema = self.schema();
        in_batches(&rows, batch_size, |chunk| {
            let ctr = Float64Array::from_iter_values(chunk.iter().map(|row| {
                if row.impressions > 0 {
                    row.clicks as f64 / row.impressions as f64
                } else {
                    0.0
                }
            }));
            let dates: Date32Array = date_array(chunk.iter().map(|row| row.event_date));
            Ok(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|row| row.campaign_id),
                    )),
                    Arc::new(dates),
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|row| row.impressions),
                    )),
                    Arc::new(Int64Array::from_iter_values(
                        chunk.iter().map(|row| row.clicks),
                    )),
                    Arc::new(ctr),
                ],
            )?)
        })
    }
}
