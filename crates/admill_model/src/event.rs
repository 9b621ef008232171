//! Normalized raw-event rows and the campaign snapshot value object.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ad-slot dimensions, parsed from the `WxH` column format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for SlotSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("ad slot size '{}' is not WxH", s))?;
        let width = w
            .trim()
            .parse()
            .map_err(|e| format!("ad slot width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse()
            .map_err(|e| format!("ad slot height '{}': {}", h, e))?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for SlotSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One observed ad impression, optionally followed by a click.
///
/// Immutable once ingested. The campaign fields are a snapshot taken at
/// impression time, not a live reference; two events naming the same
/// campaign may carry different targeting values.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event_id: String,
    pub user_id: i64,
    pub advertiser_name: String,
    pub campaign_name: String,
    pub device: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub bid_amount: Decimal,
    pub ad_cost: Decimal,
    pub was_clicked: bool,
    pub click_timestamp: Option<DateTime<Utc>>,
    pub ad_revenue: Option<Decimal>,
    pub slot: SlotSize,
    pub targeting_country: Option<String>,
    pub targeting_interest: Option<String>,
    pub targeting_criteria: Option<String>,
    pub campaign_start: Option<NaiveDate>,
    pub campaign_end: Option<NaiveDate>,
}

impl RawEvent {
    /// Calendar date of the impression, used as the daily grouping key.
    pub fn event_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Numeric campaign id, if the campaign name carries one.
    pub fn campaign_id(&self) -> Option<i64> {
        campaign_id_from_name(&self.campaign_name)
    }
}

/// Extract the numeric id from a `..._<id>` campaign name.
pub fn campaign_id_from_name(name: &str) -> Option<i64> {
    name.rsplit('_').next()?.parse().ok()
}

/// Campaign state as of one impression.
///
/// Copy-on-read: built per event, embedded into the nested document, never
/// a reference to a mutable campaign entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSnapshot {
    pub campaign_id: Option<i64>,
    pub name: String,
    pub advertiser_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub targeting_criteria: Option<String>,
    pub targeting_interest: Option<String>,
    pub targeting_country: Option<String>,
    pub ad_slot_size: SlotSize,
}

impl CampaignSnapshot {
    pub fn from_event(event: &RawEvent) -> Self {
        Self {
            campaign_id: event.campaign_id(),
            name: event.campaign_name.clone(),
            advertiser_name: event.advertiser_name.clone(),
            start_date: event.campaign_start,
            end_date: event.campaign_end,
            targeting_criteria: event.targeting_criteria.clone(),
            targeting_interest: event.targeting_interest.clone(),
            targeting_country: event.targeting_country.clone(),
            ad_slot_size: event.slot,
        }
    }
}
