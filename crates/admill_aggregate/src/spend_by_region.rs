//! Advertiser ad-cost totals by region and day.

use crate::batch::{date_array, decimal_array, in_batches, spend_type};
use crate::Projection;
use admill_model::RawEvent;
use anyhow::Result;
use arrow::array::{RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key `(region, event_date, advertiser_name)`; decimal sum of ad cost
/// over every event regardless of click outcome. Rows with no region or
/// no advertiser are excluded from this projection only.
#[derive(Default)]
pub struct AdvertiserSpendByRegion {
    spend: BTreeMap<(String, NaiveDate, String), Decimal>,
}

impl Projection for AdvertiserSpendByRegion {
    fn name(&self) -> &'static str {
        "advertiser_spend_by_region"
    }

    fn target_table(&self) -> &'static str {
        "advertiser_spend_by_region"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, false),
            Field::new("event_date", DataType::Date32, false),
            Field::new("advertiser_name", DataType::Utf8, false),
            Field::new("total_spend", spend_type(), false),
        ]))
    }

    fn begin(&mut self, _anchor: Option<DateTime<Utc>>) {
        self.spend.clear();
    }

    fn observe(&mut self, event: &RawEvent) {
        let Some(region) = event.targeting_country.as_deref().map(str::trim) else {
            return;
        };
        let advertiser = event.advertiser_name.trim();
        if region.is_empty() || advertiser.is_empty() {
            return;
        }
        let key = (
            region.to_string(),
            event.event_date(),
            advertiser.to_string(),
        );
        *self.spend.entry(key).or_insert(Decimal::ZERO) += event.ad_cost;
    }

    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>> {
        let rows: Vec<(&(String, NaiveDate, String), &Decimal)> = self.spend.iter().collect();

        let schema = self.schema();
        in_batches(&rows, batch_size, |chunk| {
            Ok(RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|((region, _, _), _)| region.as_str()),
                    )),
                    Arc::new(date_array(chunk.iter().map(|((_, date, _), _)| *date))),
                    Arc::new(StringArray::from_iter_values(
                        chunk.iter().map(|((_, _, advertiser), _)| advertiser.as_str()),
                    )),
                    Arc::new(decimal_array(chunk.iter().map(|(_, spend)| **spend))),
                ],
            )?)
        })
    }
}
