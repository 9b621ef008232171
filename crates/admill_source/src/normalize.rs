//! Field normalization shared by the CSV and table scanners.
//!
//! Both backends surface untyped string fields; this module turns one row
//! of them into a typed [`RawEvent`] or a row-level error naming the
//! offending field.

use admill_model::{RawEvent, SlotSize};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// One row of raw string fields, in source column order.
#[derive(Debug, Default, Clone)]
pub(crate) struct RawRecord {
    pub event_id: String,
    pub user_id: String,
    pub advertiser_name: String,
    pub campaign_name: String,
    pub device: String,
    pub location: String,
    pub timestamp: String,
    pub bid_amount: String,
    pub ad_cost: String,
    pub was_clicked: String,
    pub click_timestamp: String,
    pub ad_revenue: String,
    pub ad_slot_size: String,
    pub targeting_country: String,
    pub targeting_interest: String,
    pub targeting_criteria: String,
    pub campaign_start: String,
    pub campaign_end: String,
}

/// A row that failed normalization: which field, and why.
#[derive(Debug)]
pub(crate) struct RowError {
    pub field: &'static str,
    pub reason: String,
}

impl RowError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unparseable timestamp '{}'", value))
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| format!("unparseable date '{}': {}", value, e))
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|e| format!("unparseable decimal '{}': {}", value, e))
}

pub(crate) fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim() {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" | "" => Ok(false),
        other => Err(format!("unparseable boolean '{}'", other)),
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn normalize(record: &RawRecord) -> Result<RawEvent, RowError> {
    let timestamp = parse_timestamp(&record.timestamp)
        .map_err(|reason| RowError::new("Timestamp", reason))?;
    let user_id = record
        .user_id
        .trim()
        .parse::<i64>()
        .map_err(|e| RowError::new("UserID", format!("'{}': {}", record.user_id, e)))?;
    let bid_amount =
        parse_decimal(&record.bid_amount).map_err(|reason| RowError::new("BidAmount", reason))?;
    let ad_cost =
        parse_decimal(&record.ad_cost).map_err(|reason| RowError::new("AdCost", reason))?;
    let was_clicked =
        parse_bool(&record.was_clicked).map_err(|reason| RowError::new("WasClicked", reason))?;
    let slot = SlotSize::from_str(record.ad_slot_size.trim())
        .map_err(|reason| RowError::new("AdSlotSize", reason))?;

    // Click fields only matter on clicked rows; a clicked row with a bad
    // click field is still a malformed row.
    let click_timestamp = match optional(&record.click_timestamp) {
        Some(raw) if was_clicked => Some(
            parse_timestamp(&raw).map_err(|reason| RowError::new("ClickTimestamp", reason))?,
        ),
        _ => None,
    };
    let ad_revenue = match optional(&record.ad_revenue) {
        Some(raw) if was_clicked => {
            Some(parse_decimal(&raw).map_err(|reason| RowError::new("AdRevenue", reason))?)
        }
        _ => None,
    };

    let campaign_start = match optional(&record.campaign_start) {
        Some(raw) => {
            Some(parse_date(&raw).map_err(|reason| RowError::new("CampaignStartDate", reason))?)
        }
        None => None,
    };
    let campaign_end = match optional(&record.campaign_end) {
        Some(raw) => {
            Some(parse_date(&raw).map_err(|reason| RowError::new("CampaignEndDate", reason))?)
        }
        None => None,
    };

    Ok(RawEvent {
        event_id: record.event_id.trim().to_string(),
        user_id,
        advertiser_name: record.advertiser_name.trim().to_string(),
        campaign_name: record.campaign_name.trim().to_string(),
        device: record.device.trim().to_string(),
        location: record.location.trim().to_string(),
        timestamp,
        bid_amount,
        ad_cost,
        was_clicked,
        click_timestamp,
        ad_revenue,
        slot,
        targeting_country: optional(&record.targeting_country),
        targeting_interest: optional(&record.targeting_interest),
        targeting_criteria: optional(&record.targeting_criteria),
        campaign_start,
        campaign_end,
    })
}
