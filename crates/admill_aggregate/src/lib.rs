//! Aggregation Fan-out Engine.
//!
//! Scans the raw event sequence once and feeds every registered
//! projection's accumulator on each row, so an expensive sequential source
//! scan is paid once regardless of how many projections exist. Projections
//! are transient: cleared on `begin`, rebuilt per run, flushed as Arrow
//! batches for a full-reload write.
//!
//! Windowed projections anchor "now" on the dataset's own latest event by
//! default (the source has no wall-clock freshness guarantee), which needs
//! a max-timestamp pass before the aggregation pass.

use admill_model::{AnchorMode, RawEvent};
use anyhow::Result;
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use chrono::{DateTime, Utc};
use tracing::info;

mod batch;
mod campaign_daily;
mod engagement;
mod spend_by_region;
mod top_advertisers;
mod user_clicks;

pub use batch::{SPEND_PRECISION, SPEND_SCALE};
pub use campaign_daily::CampaignDailyMetrics;
pub use engagement::UserEngagementHistory;
pub use spend_by_region::AdvertiserSpendByRegion;
pub use top_advertisers::TopAdvertisersBySpend;
pub use user_clicks::TopUsersByClicks;

/// Days covered by the rolling-window projections.
pub const WINDOW_DAYS: i64 = 30;

/// Label stored in the `time_bucket` key column of windowed projections.
pub const WINDOW_BUCKET: &str = "last_30_days";

/// One independently keyed aggregate view over the raw event stream.
///
/// The accumulation operator of every implementation is commutative and
/// associative per key, so scan order never changes flushed values; flush
/// order is fixed by the implementation so reruns emit identical batches.
pub trait Projection {
    /// Short name used in logs and run summaries.
    fn name(&self) -> &'static str;

    /// Target table this projection reloads.
    fn target_table(&self) -> &'static str;

    fn schema(&self) -> SchemaRef;

    /// Reset state for a new run. `anchor` is the upper bound of the
    /// rolling window, or `None` when the source held no events.
    fn begin(&mut self, anchor: Option<DateTime<Utc>>);

    fn observe(&mut self, event: &RawEvent);

    /// Drain the accumulator into row batches of at most `batch_size`
    /// rows. A short final batch is still emitted.
    fn flush(&mut self, batch_size: usize) -> Result<Vec<RecordBatch>>;
}

/// Flushed output of one projection, ready for a sink.
pub struct ProjectionOutput {
    pub name: &'static str,
    pub table: &'static str,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl ProjectionOutput {
    pub fn rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

/// Scan statistics for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub events_scanned: usize,
    pub anchor: Option<DateTime<Utc>>,
}

/// Drives N independent projections over one pass of the source.
pub struct FanOutEngine {
    projections: Vec<Box<dyn Projection>>,
    anchor_mode: AnchorMode,
}

impl FanOutEngine {
    pub fn new(anchor_mode: AnchorMode) -> Self {
        Self {
            projections: Vec::new(),
            anchor_mode,
        }
    }

    /// Engine preloaded with the full projection set.
    pub fn with_default_projections(anchor_mode: AnchorMode) -> Self {
        let mut engine = Self::new(anchor_mode);
        engine.register(Box::new(CampaignDailyMetrics::default()));
        engine.register(Box::new(TopUsersByClicks::default()));
        engine.register(Box::new(AdvertiserSpendByRegion::default()));
        engine.register(Box::new(TopAdvertisersBySpend::default()));
        engine.register(Box::new(UserEngagementHistory::default()));
        engine
    }

    /// Add a projection; the scan loop itself never changes.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_names(&self) -> Vec<&'static str> {
        self.projections.iter().map(|p| p.name()).collect()
    }

    /// Run the aggregation pass over the full event sequence.
    ///
    /// With the latest-event anchor mode this is two passes: a
    /// max-timestamp scan to fix the window, then the observe loop.
    pub fn scan(&mut self, events: &[RawEvent]) -> ScanStats {
        let anchor = match self.anchor_mode {
            AnchorMode::LatestEvent => events.iter().map(|e| e.timestamp).max(),
            AnchorMode::FixedClock => Some(Utc::now()),
        };

        for projection in &mut self.projections {
            projection.begin(anchor);
        }
        for event in events {
            for projection in &mut self.projections {
                projection.observe(event);
            }
        }

        info!(
            events = events.len(),
            projections = self.projections.len(),
            anchor = ?anchor,
            "Fan-out scan complete"
        );
        ScanStats {
            events_scanned: events.len(),
            anchor,
        }
    }

    /// Flush every projection into bounded row batches.
    pub fn flush(&mut self, batch_size: usize) -> Result<Vec<ProjectionOutput>> {
        let mut outputs = Vec::with_capacity(self.projections.len());
        for projection in &mut self.projections {
            let batches = projection.flush(batch_size)?;
            outputs.push(ProjectionOutput {
                name: projection.name(),
                table: projection.target_table(),
                schema: projection.schema(),
                batches,
            });
        }
        Ok(outputs)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{event, EventSpec};
    use super::*;
    use arrow::array::{Array, Int64Array};

    fn column_i64<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int64Array {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
    }

    #[test]
    fn one_scan_feeds_every_projection() {
        let mut engine = FanOutEngine::with_default_projections(AnchorMode::LatestEvent);
        let events = vec![
            event(EventSpec {
                clicked: true,
                ..EventSpec::default()
            }),
            event(EventSpec {
                user_id: 2,
                minutes: 5,
                ..EventSpec::default()
            }),
        ];
        let stats = engine.scan(&events);
        assert_eq!(stats.events_scanned, 2);
        assert_eq!(stats.anchor, Some(events[1].timestamp));

        let outputs = engine.flush(100).unwrap();
        assert_eq!(outputs.len(), 5);
        for output in &outputs {
            assert!(output.rows() > 0, "projection {} flushed nothing", output.name);
        }
    }

    #[test]
    fn empty_source_flushes_empty_projections() {
        let mut engine = FanOutEngine::with_default_projections(AnchorMode::LatestEvent);
        let stats = engine.scan(&[]);
        assert_eq!(stats.anchor, None);
        let outputs = engine.flush(100).unwrap();
        for output in outputs {
            assert_eq!(output.rows(), 0);
        }
    }

    #[test]
    fn campaign_totals_match_scanned_totals() {
        // The sum of impressions/clicks over all (campaign, date) keys
        // equals the totals of the scanned events.
        let mut engine = FanOutEngine::new(AnchorMode::LatestEvent);
        engine.register(Box::new(CampaignDailyMetrics::default()));

        let events: Vec<_> = (0..40)
            .map(|i| {
                event(EventSpec {
                    user_id: i % 7,
                    campaign: if i % 2 == 0 { "A_1" } else { "B_2" },
                    minutes: i * 60,
                    clicked: i % 3 == 0,
                    ..EventSpec::default()
                })
            })
            .collect();
        let total_clicks = events.iter().filter(|e| e.was_clicked).count() as i64;
        engine.scan(&events);

        let outputs = engine.flush(7).unwrap();
        let mut impressions = 0;
        let mut clicks = 0;
        for batch in &outputs[0].batches {
            let imp = column_i64(batch, "impressions");
            let clk = column_i64(batch, "clicks");
            for i in 0..batch.num_rows() {
                impressions += imp.value(i);
                clicks += clk.value(i);
            }
        }
        assert_eq!(impressions, events.len() as i64);
        assert_eq!(clicks, total_clicks);
    }

    #[test]
    fn rerunning_the_engine_reproduces_identical_batches() {
        let events: Vec<_> = (0..30)
            .map(|i| {
                event(EventSpec {
                    user_id: i % 5,
                    minutes: i * 17,
                    clicked: i % 2 == 0,
                    ..EventSpec::default()
                })
            })
            .collect();

        let run = |events: &[admill_model::RawEvent]| {
            let mut engine = FanOutEngine::with_default_projections(AnchorMode::LatestEvent);
            engine.scan(events);
            engine.flush(8).unwrap()
        };
        let first = run(&events);
        let second = run(&events);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.batches, b.batches, "projection {} drifted", a.name);
        }
    }

    #[test]
    fn begin_clears_prior_state() {
        let mut engine = FanOutEngine::with_default_projections(AnchorMode::LatestEvent);
        let events = vec![event(EventSpec::default())];
        engine.scan(&events);
        engine.flush(100).unwrap();

        // Second scan over the same events must not double-count.
        engine.scan(&events);
        let outputs = engine.flush(100).unwrap();
        assert_eq!(outputs.last().unwrap().rows(), 1);
    }
}
