//! Admill: batch derivation of session documents and analytic
//! projections from flat ad-event logs.

pub mod jobs;
