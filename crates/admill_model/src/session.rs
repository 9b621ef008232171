//! Nested session document shape.
//!
//! One [`Session`] is a maximal run of a single user's impressions with no
//! inactivity gap larger than the configured timeout. Sessions are built
//! once by the windowing engine and never mutated afterwards.

use crate::event::{CampaignSnapshot, RawEvent};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A click on an impression: timestamp plus realized revenue.
///
/// Owned by its parent impression; no identity of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Click {
    pub click_timestamp: DateTime<Utc>,
    pub ad_revenue: Decimal,
}

/// One raw event reshaped for embedding inside a session document.
///
/// `clicks` is a list even though the feed emits at most one click per
/// impression; the document shape stays forward-compatible with multi-click
/// feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    pub impression_id: String,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub location: String,
    pub campaign: CampaignSnapshot,
    pub bid_amount: Decimal,
    pub ad_cost: Decimal,
    pub clicks: Vec<Click>,
}

impl Impression {
    pub fn from_event(event: &RawEvent) -> Self {
        let mut clicks = Vec::new();
        if event.was_clicked {
            if let (Some(ts), Some(revenue)) = (event.click_timestamp, event.ad_revenue) {
                clicks.push(Click {
                    click_timestamp: ts,
                    ad_revenue: revenue,
                });
            }
        }
        Self {
            impression_id: event.event_id.clone(),
            timestamp: event.timestamp,
            device: event.device.clone(),
            location: event.location.clone(),
            campaign: CampaignSnapshot::from_event(event),
            bid_amount: event.bid_amount,
            ad_cost: event.ad_cost,
            clicks,
        }
    }

    pub fn click_count(&self) -> usize {
        self.clicks.len()
    }
}

/// A completed session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: i64,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub impressions_count: usize,
    pub clicks_count: usize,
    pub impressions: Vec<Impression>,
}

impl Session {
    /// Assemble a session from a non-empty bag of one user's impressions.
    ///
    /// Returns `None` for an empty bag; an empty bag is never flushed.
    pub fn from_impressions(user_id: i64, impressions: Vec<Impression>) -> Option<Self> {
        let session_start = impressions.first()?.timestamp;
        let session_end = impressions.last()?.timestamp;
        let clicks_count = impressions.iter().map(Impression::click_count).sum();
        Some(Self {
            user_id,
            session_start,
            session_end,
            impressions_count: impressions.len(),
            clicks_count,
            impressions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SlotSize;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn event(id: &str, clicked: bool) -> RawEvent {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        RawEvent {
            event_id: id.to_string(),
            user_id: 7,
            advertiser_name: "Acme".into(),
            campaign_name: "Spring_3".into(),
            device: "mobile".into(),
            location: "Kyiv".into(),
            timestamp: ts,
            bid_amount: Decimal::new(125, 2),
            ad_cost: Decimal::new(250, 2),
            was_clicked: clicked,
            click_timestamp: clicked.then(|| ts + chrono::Duration::seconds(5)),
            ad_revenue: clicked.then(|| Decimal::new(999, 2)),
            slot: SlotSize {
                width: 300,
                height: 250,
            },
            targeting_country: Some("UA".into()),
            targeting_interest: None,
            targeting_criteria: None,
            campaign_start: None,
            campaign_end: None,
        }
    }

    #[test]
    fn impression_embeds_single_click() {
        let imp = Impression::from_event(&event("e1", true));
        assert_eq!(imp.clicks.len(), 1);
        assert_eq!(imp.clicks[0].ad_revenue, Decimal::new(999, 2));
        assert_eq!(imp.campaign.campaign_id, Some(3));
    }

    #[test]
    fn impression_without_click_has_empty_list() {
        let imp = Impression::from_event(&event("e2", false));
        assert!(imp.clicks.is_empty());
    }

    #[test]
    fn session_counts_impressions_and_clicks() {
        let imps = vec![
            Impression::from_event(&event("a", true)),
            Impression::from_event(&event("b", false)),
            Impression::from_event(&event("c", true)),
        ];
        let session = Session::from_impressions(7, imps).unwrap();
        assert_eq!(session.impressions_count, 3);
        assert_eq!(session.clicks_count, 2);
        assert_eq!(session.user_id, 7);
    }

    #[test]
    fn empty_bag_is_never_a_session() {
        assert!(Session::from_impressions(7, Vec::new()).is_none());
    }

    #[test]
    fn session_document_uses_camel_case_keys() {
        let session =
            Session::from_impressions(7, vec![Impression::from_event(&event("a", true))]).unwrap();
        let doc = serde_json::to_value(&session).unwrap();
        assert!(doc.get("userId").is_some());
        assert!(doc.get("sessionStart").is_some());
        assert!(doc.get("impressionsCount").is_some());
        let imp = &doc["impressions"][0];
        assert!(imp.get("impressionId").is_some());
        assert!(imp["clicks"][0].get("clickTimestamp").is_some());
        assert!(imp["campaign"].get("adSlotSize").is_some());
    }
}
