//! Arrow array construction shared by the projections.

use anyhow::Result;
use arrow::array::{Date32Array, Decimal128Array, Decimal128Builder, RecordBatch};
use arrow::datatypes::DataType;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Precision/scale of every money column.
pub const SPEND_PRECISION: u8 = 18;
pub const SPEND_SCALE: i8 = 4;

pub(crate) fn spend_type() -> DataType {
    DataType::Decimal128(SPEND_PRECISION, SPEND_SCALE)
}

/// Split rows into batches of at most `batch_size`, building each with
/// `build`. A short final batch is still emitted; empty input emits none.
pub(crate) fn in_batches<R>(
    rows: &[R],
    batch_size: usize,
    build: impl Fn(&[R]) -> Result<RecordBatch>,
) -> Result<Vec<RecordBatch>> {
    rows.chunks(batch_size.max(1)).map(|chunk| build(chunk)).collect()
}

/// Money values as a fixed-scale `Decimal128` column; exact, no float
/// rounding drift.
pub(crate) fn decimal_array(values: impl Iterator<Item = Decimal>) -> Decimal128Array {
    let mut builder = Decimal128Builder::new().with_data_type(spend_type());
    for value in values {
        let mut scaled = value;
        scaled.rescale(SPEND_SCALE as u32);
        builder.append_value(scaled.mantissa());
    }
    builder.finish()
}

pub(crate) fn date_array(values: impl Iterator<Item = NaiveDate>) -> Date32Array {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    Date32Array::from_iter_values(
        values.map(|date| date.signed_duration_since(epoch).num_days() as i32),
    )
}

pub(crate) fn timestamp_micros(value: DateTime<Utc>) -> i64 {
    value.timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn decimal_array_rescales_exactly() {
        let array = decimal_array([Decimal::new(1000, 2), Decimal::new(1550, 2)].into_iter());
        // 10.00 and 15.50 at scale 4.
        assert_eq!(array.value(0), 100_000);
        assert_eq!(array.value(1), 155_000);
    }

    #[test]
    fn date_array_is_days_since_epoch() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 11).unwrap();
        let array = date_array([date].into_iter());
        assert_eq!(array.value(0), 10);
    }
}
