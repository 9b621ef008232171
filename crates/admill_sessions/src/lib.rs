//! Session Windowing Engine.
//!
//! Converts a flat per-user event stream into nested session documents
//! using an inactivity-gap rule: within one user's timestamp-ordered
//! events, a gap strictly greater than the timeout closes the open
//! session. Session boundaries are a pure function of user id and
//! timestamp gaps; no other field participates.

use admill_model::{Impression, RawEvent, Session};
use chrono::Duration;
use tracing::debug;

/// Partition events into session documents.
///
/// Events are stably sorted by `(user_id, timestamp)` first, so callers
/// may pass the stream in source order. Returned sessions are ordered by
/// user, then by session start.
pub fn sessionize(mut events: Vec<RawEvent>, timeout: Duration) -> Vec<Session> {
    events.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    let mut sessions = Vec::new();
    let mut bag: Vec<Impression> = Vec::new();
    let mut current_user = None;
    let mut last_ts = None;

    for event in &events {
        let user_changed = current_user != Some(event.user_id);
        let gap_exceeded = match last_ts {
            Some(last) if !user_changed => event.timestamp - last > timeout,
            _ => true,
        };

        if user_changed || gap_exceeded {
            flush(&mut bag, current_user, &mut sessions);
            current_user = Some(event.user_id);
        }
        bag.push(Impression::from_event(event));
        last_ts = Some(event.timestamp);
    }
    flush(&mut bag, current_user, &mut sessions);

    debug!(
        events = events.len(),
        sessions = sessions.len(),
        "Windowing complete"
    );
    sessions
}

/// Close the open bag into a session. An empty bag is never flushed.
fn flush(bag: &mut Vec<Impression>, user_id: Option<i64>, out: &mut Vec<Session>) {
    if bag.is_empty() {
        return;
    }
    let Some(user_id) = user_id else {
        return;
    };
    if let Some(session) = Session::from_impressions(user_id, std::mem::take(bag)) {
        out.push(session);
    }
}
