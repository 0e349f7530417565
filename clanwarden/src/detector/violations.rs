// clanwarden/src/detector/violations.rs
//
// Detector-side violation counter. Independent of PlayerRecord: it only
// grades how often a user tripped a heuristic recently, and forgets after
// `reset_secs` without a new violation.

use chrono::{DateTime, Duration, Utc};

use crate::events::VerdictLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationCounter {
    pub count:          u32,
    pub last_violation: DateTime<Utc>,
}

impl ViolationCounter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { count: 0, last_violation: now }
    }

    fn is_stale(&self, now: DateTime<Utc>, reset_secs: u64) -> bool {
        now - self.last_violation > Duration::seconds(reset_secs as i64)
    }

    /// Register one violation at `now`; returns the updated count.
    pub fn record(&mut self, now: DateTime<Utc>, reset_secs: u64) -> u32 {
        if self.is_stale(now, reset_secs) {
            self.count = 0;
        }
        self.count += 1;
        self.last_violation = now;
        self.count
    }

    /// Current count without registering anything.
    pub fn current(&self, now: DateTime<Utc>, reset_secs: u64) -> u32 {
        if self.is_stale(now, reset_secs) { 0 } else { self.count }
    }
}

/// Map a running count onto a verdict level.
pub fn grade(count: u32, warn_threshold: u32, kick_threshold: u32) -> VerdictLevel {
    if count >= kick_threshold {
        VerdictLevel::Kick
    } else if count >= warn_threshold {
        VerdictLevel::Warn
    } else {
        VerdictLevel::Ok
    }
}
