//! Run-level configuration shared by the engines and the CLI.

use chrono::Duration;
use std::str::FromStr;

/// Default inactivity timeout between two consecutive impressions.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Default number of rows pulled from the source per chunk.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 5_000;

/// Default rows per sink write batch.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;

/// How windowed projections anchor "now".
///
/// The source carries no wall-clock freshness guarantee, so by default the
/// dataset's own latest event defines today (`LatestEvent`). `FixedClock`
/// trusts the scheduler's clock instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorMode {
    #[default]
    LatestEvent,
    FixedClock,
}

impl AnchorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorMode::LatestEvent => "latest-event",
            AnchorMode::FixedClock => "fixed-clock",
        }
    }
}

impl FromStr for AnchorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest-event" => Ok(AnchorMode::LatestEvent),
            "fixed-clock" => Ok(AnchorMode::FixedClock),
            other => Err(format!(
                "unknown anchor mode '{}' (expected latest-event or fixed-clock)",
                other
            )),
        }
    }
}

/// Canonical pipeline configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// Inactivity timeout closing a session.
    pub session_timeout: Duration,
    /// Rows pulled from the source per chunk.
    pub read_chunk_size: usize,
    /// Rows per sink write batch.
    pub write_batch_size: usize,
    /// Anchoring strategy for 30-day windowed projections.
    pub anchor_mode: AnchorMode,
    /// CSV field separator for bulk-file sources.
    pub csv_separator: u8,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINUTES),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            anchor_mode: AnchorMode::default(),
            csv_separator: b',',
        }
    }
}

impl EtlConfig {
    pub fn with_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_timeout = Duration::minutes(minutes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EtlConfig::default();
        assert_eq!(config.session_timeout, Duration::minutes(30));
        assert_eq!(config.write_batch_size, 500);
        assert_eq!(config.anchor_mode, AnchorMode::LatestEvent);
    }

    #[test]
    fn anchor_mode_round_trips() {
        for mode in [AnchorMode::LatestEvent, AnchorMode::FixedClock] {
            assert_eq!(mode.as_str().parse::<AnchorMode>().unwrap(), mode);
        }
        assert!("sometimes".parse::<AnchorMode>().is_err());
    }
}
