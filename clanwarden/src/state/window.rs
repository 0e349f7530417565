// clanwarden/src/state/window.rs
//
// Per-user sliding message window.
//
// Design:
//   - Time-ascending ring buffer (VecDeque), pruned on every insert to the
//     longest configured window so memory stays bounded per user
//   - Sub-window views (events_in) for each configured flood window
//   - Rate helper floors the elapsed span at 1s to avoid division blowups

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::events::MessageEvent;

#[derive(Debug)]
pub struct MessageWindow {
    pub username: String,
    pub events:   VecDeque<MessageEvent>,
}

impl MessageWindow {
    pub fn new(username: &str) -> Self {
        Self { username: username.to_string(), events: VecDeque::new() }
    }

    /// Append a message and drop everything older than `horizon_secs`
    /// relative to the new message's timestamp.
    pub fn ingest(&mut self, text: &str, at: DateTime<Utc>, horizon_secs: u64) {
        // Out-of-order arrivals are clamped so the buffer stays time-ascending.
        let ts = match self.events.back() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        self.events.push_back(MessageEvent {
            username:  self.username.clone(),
            text:      text.to_string(),
            timestamp: ts,
        });
        self.expire_old(at, horizon_secs);
    }

    pub fn expire_old(&mut self, now: DateTime<Utc>, horizon_secs: u64) {
        let cutoff = now - Duration::seconds(horizon_secs as i64);
        while self.events.front().map(|e| e.timestamp < cutoff).unwrap_or(false) {
            self.events.pop_front();
        }
    }

    /// Messages no older than `seconds` before `now`, oldest first.
    pub fn events_in(&self, now: DateTime<Utc>, seconds: u64) -> Vec<&MessageEvent> {
        let cutoff = now - Duration::seconds(seconds as i64);
        self.events.iter().filter(|e| e.timestamp >= cutoff).collect()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.events.front().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Messages per second over `events`, measured from the oldest one to `now`.
pub fn rate_per_sec(events: &[&MessageEvent], now: DateTime<Utc>) -> f64 {
    let Some(first) = events.first() else { return 0.0 };
    let span_ms = (now - first.timestamp).num_milliseconds().max(1000);
    events.len() as f64 / (span_ms as f64 / 1000.0)
}
