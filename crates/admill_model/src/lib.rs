//! Shared domain types for the Admill batch pipeline.
//!
//! Everything downstream of the source reader works in terms of these
//! types: normalized [`RawEvent`] rows, the nested session document shape
//! ([`Session`] / [`Impression`] / [`Click`]), and run-level configuration.

pub mod config;
pub mod event;
pub mod run;
pub mod session;

pub use config::{
    AnchorMode, EtlConfig, DEFAULT_READ_CHUNK_SIZE, DEFAULT_SESSION_TIMEOUT_MINUTES,
    DEFAULT_WRITE_BATCH_SIZE,
};
pub use event::{campaign_id_from_name, CampaignSnapshot, RawEvent, SlotSize};
pub use run::{RunId, SinkMode};
pub use session::{Click, Impression, Session};
