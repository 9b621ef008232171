//! Index/Schema Ensurer and the raw-event staging loader.
//!
//! Confirms that target tables exist with the expected key layout before a
//! writer runs. No migration logic; reloads replace tables wholesale.

use admill_model::RawEvent;
use anyhow::{Context, Result};
use duckdb::Connection;
use tracing::{debug, info};

/// Staging table for raw events, matching the bulk-file column set.
pub const RAW_EVENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS raw_events (
    event_id VARCHAR NOT NULL,
    user_id BIGINT NOT NULL,
    advertiser_name VARCHAR NOT NULL,
    campaign_name VARCHAR NOT NULL,
    device VARCHAR,
    location VARCHAR,
    ts TIMESTAMP NOT NULL,
    bid_amount DECIMAL(18, 4) NOT NULL,
    ad_cost DECIMAL(18, 4) NOT NULL,
    was_clicked BOOLEAN NOT NULL,
    click_ts TIMESTAMP,
    ad_revenue DECIMAL(18, 4),
    ad_slot_size VARCHAR NOT NULL,
    targeting_country VARCHAR,
    targeting_interest VARCHAR,
    targeting_criteria VARCHAR,
    campaign_start DATE,
    campaign_end DATE
)";

/// Projection tables with their exact key layouts.
pub const PROJECTION_DDL: &[(&str, &str)] = &[
    (
        "campaign_daily_metrics",
        "CREATE TABLE IF NOT EXISTS campaign_daily_metrics (
            campaign_id BIGINT NOT NULL,
            event_date DATE NOT NULL,
            impressions BIGINT NOT NULL,
            clicks BIGINT NOT NULL,
            ctr DOUBLE NOT NULL,
            PRIMARY KEY (campaign_id, event_date)
        )",
    ),
    (
        "top_users_by_clicks",
        "CREATE TABLE IF NOT EXISTS top_users_by_clicks (
            time_bucket VARCHAR NOT NULL,
            user_id BIGINT NOT NULL,
            total_clicks BIGINT NOT NULL,
            PRIMARY KEY (time_bucket, user_id)
        )",
    ),
    (
        "advertiser_spend_by_region",
        "CREATE TABLE IF NOT EXISTS advertiser_spend_by_region (
            region VARCHAR NOT NULL,
            event_date DATE NOT NULL,
            advertiser_name VARCHAR NOT NULL,
            total_spend DECIMAL(18, 4) NOT NULL,
            PRIMARY KEY (region, event_date, advertiser_name)
        )",
    ),
    (
        "top_advertisers_by_spend",
        "CREATE TABLE IF NOT EXISTS top_advertisers_by_spend (
            time_bucket VARCHAR NOT NULL,
            advertiser_name VARCHAR NOT NULL,
            total_spend DECIMAL(18, 4) NOT NULL,
            PRIMARY KEY (time_bucket, advertiser_name)
        )",
    ),
    (
        "user_engagement_history",
        "CREATE TABLE IF NOT EXISTS user_engagement_history (
            user_id BIGINT NOT NULL,
            event_time TIMESTAMPTZ NOT NULL,
            campaign_name VARCHAR NOT NULL,
            advertiser_name VARCHAR NOT NULL,
            was_clicked BOOLEAN NOT NULL
        )",
    ),
];

/// Key columns of a projection table, in primary-key order.
pub fn projection_key_columns(table: &str) -> &'static [&'static str] {
    match table {
        "campaign_daily_metrics" => &["campaign_id", "event_date"],
        "top_users_by_clicks" => &["time_bucket", "user_id"],
        "advertiser_spend_by_region" => &["region", "event_date", "advertiser_name"],
        "top_advertisers_by_spend" => &["time_bucket", "advertiser_name"],
        // user_engagement_history is range-scanned, not point-keyed.
        _ => &[],
    }
}

pub fn ensure_raw_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(RAW_EVENTS_DDL)
        .context("Failed to ensure raw_events table")?;
    debug!("Ensured raw_events table");
    Ok(())
}

pub fn ensure_projection_tables(conn: &Connection) -> Result<()> {
    for (table, ddl) in PROJECTION_DDL {
        conn.execute_batch(ddl)
            .with_context(|| format!("Failed to ensure projection table {}", table))?;
    }
    debug!("Ensured {} projection tables", PROJECTION_DDL.len());
    Ok(())
}

const INSERT_RAW_SQL: &str = "\
INSERT INTO raw_events VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), \
 CAST(? AS DECIMAL(18, 4)), CAST(? AS DECIMAL(18, 4)), ?, CAST(? AS TIMESTAMP), \
 CAST(? AS DECIMAL(18, 4)), ?, ?, ?, ?, CAST(? AS DATE), CAST(? AS DATE))";

fn naive(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Append normalized events into `raw_events`, one transaction per batch.
pub fn append_raw_events(
    conn: &mut Connection,
    events: &[RawEvent],
    batch_size: usize,
) -> Result<u64> {
    ensure_raw_events_table(conn)?;

    let mut written = 0u64;
    for chunk in events.chunks(batch_size.max(1)) {
        let tx = conn
            .transaction()
            .context("Failed to begin raw-event transaction")?;
        {
            let mut stmt = tx
                .prepare(INSERT_RAW_SQL)
                .context("Failed to prepare raw-event insert")?;
            for event in chunk {
                stmt.execute(duckdb::params![
                    event.event_id,
                    event.user_id,
                    event.advertiser_name,
                    event.campaign_name,
                    event.device,
                    event.location,
                    naive(event.timestamp),
                    event.bid_amount.to_string(),
                    event.ad_cost.to_string(),
                    event.was_clicked,
                    event.click_timestamp.map(naive),
                    event.ad_revenue.map(|d| d.to_string()),
                    event.slot.to_string(),
                    event.targeting_country,
                    event.targeting_interest,
                    event.targeting_criteria,
                    event.campaign_start.map(|d| d.to_string()),
                    event.campaign_end.map(|d| d.to_string()),
                ])
                .context("Failed to insert raw event")?;
            }
        }
        tx.commit().context("Failed to commit raw-event batch")?;
        written += chunk.len() as u64;
    }

    info!("Loaded {} raw events", written);
    Ok(written)
}
