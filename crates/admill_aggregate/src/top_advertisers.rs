//! Total advertiser spend over the rolling window.

use crate::batch::{decimal_array, in_batches, spend_type};
use crate::{Projection, WINDOW_BUCKET, WINDOW_DAYS};
use admill_model::RawEvent;
use anyhow::Result;
use arrow::array::{RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key `(time_bucket, advertiser_name)`; decimal sum of ad cost inside
/// the 30-day window.
#[derive(Default)]
pub struct TopAdvertisersBySpend {
    spend: BTreeMap<String, Decimal>,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
}

impl Projection for TopAdvertisersBySpend {
    fn name(&self) -> &'static str {
        "top_advertisers_by_spend"
    }

    fn target_table(&self) -> &'static str {
        "top_advertisers_by_spend"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("time_bucket", DataType::Utf8, false),
            Field::new("advertiser_name", DataType::Utf8, false),
            Field::new("total_spend", spend_type(), false),
        ]))
    }

    fn begin(&mut self, anchor: Option<DateTime<Utc>>) {
        self.spend.clear();
        self.window_end = anchor;
        self.window_start = anchor.map(|end| end - Duration::days(WINDOW_DAYS));
    }

    fn observe(&mut self, event: &RawEvent) {
        let (Some(start), Some(end)) = (self.window_start, self.window_end) else {
            return;
        };
        if event.timestamp < start || event.timestamp > end {
            return;
        }
        let advertiser = event.advertiser_name.trim();
        if advertiser.is_empty() {
            return;
        }
        *self
            .spend
            .entry(advertiser.to_string())
            .or_insert(Decimal::ZERO) += event.ad_cost;
    }

    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>> {
        let rows: Vec<(&String, &Decimal)> = self.spend.iter().collect();

        let schema = self.schema();
        in_batches(&rows, batch_size, |chunk| {
            Ok(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|_| WINDOW_BUCKET),
                    )),
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|(advertiser, _)| advertiser.as_str()),
                    )),
                    Arc::new(decimal_array(chunk.iter().map(|(_, spend)| **spend))),
                ],
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{base_time, event, EventSpec};
    use arrow::array::{Array, Decimal128Array, StringArray};

    #[test]
    fn window_bounds_are_inclusive_of_anchor() {
        let mut projection = TopAdvertisersBySpend::default();
        let anchor = base_time() + Duration::days(31);
        projection.begin(Some(anchor));

        // At the anchor itself.
        projection.observe(&event(EventSpec {
            minutes: 60 * 24 * 31,
            cost: Decimal::new(100, 2),
            ..EventSpec::default()
        }));
        // 31 days before the anchor: outside.
        projection.observe(&event(EventSpec {
            minutes: 0,
            cost: Decimal::new(999, 2),
            ..EventSpec::default()
        }));

        let batches = projection.flush(100).unwrap();
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);
        let spend = batch
            .column_by_name("total_spend")
            .unwrap()
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .unwrap();
        assert_eq!(spend.value(0), 10_000);
    }

    #[test]
    fn advertisers_accumulate_independently() {
        let mut projection = TopAdvertisersBySpend::default();
        projection.begin(Some(base_time() + Duration::days(1)));
        for (advertiser, cost) in [("Acme", 100), ("Zenith", 250), ("Acme", 50)] {
            projection.observe(&event(EventSpec {
                advertiser,
                cost: Decimal::new(cost, 2),
                ..EventSpec::default()
            }));
        }
        let batches = projection.flush(100).unwrap();
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        let names = batch
            .column_by_name("advertiser_name")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let spend = batch
            .column_by_name("total_spend")
            .unwrap()
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .unwrap();
        assert_eq!(names.value(0), "Acme");
        assert_eq!(spend.value(0), 15_000);
        assert_eq!(names.value(1), "Zenith");
        assert_eq!(spend.value(1), 25_000);
    }
}
