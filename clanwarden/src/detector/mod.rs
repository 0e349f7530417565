// clanwarden/src/detector/mod.rs
//
// Anomaly detector: per-user sliding windows + lexical heuristics → Verdict.
//
// Evaluation order for each message (first hit wins):
//   1. link        hard trigger, skips every window
//   2. windows     shortest first; windows below the rate-check sample size
//                  are skipped. Per window:
//                    identical → trivial → similar   (content, larger sample,
//                                                     rate > allowed × content mult)
//                    flood                            (rate > allowed × flood mult
//                                                     and count > limit × fill ratio)
//   3. gibberish   optional, message-local, capped at Warn
//
// Hits feed a per-user violation counter; the counter grades the verdict.

pub mod content;
pub mod gibberish;
pub mod link;
pub mod violations;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::config::{DetectorConfig, WindowSpec};
use crate::events::{MessageEvent, Signal, Verdict, VerdictLevel, Violation};
use crate::state::records::user_key;
use crate::state::window::{rate_per_sec, MessageWindow};
use violations::{grade, ViolationCounter};

pub struct AnomalyDetector {
    cfg:      DetectorConfig,
    windows:  DashMap<String, MessageWindow>,
    counters: DashMap<String, ViolationCounter>,
}

impl AnomalyDetector {
    pub fn new(mut cfg: DetectorConfig) -> Self {
        cfg.windows.sort_by_key(|w| w.duration_secs);
        Self { cfg, windows: DashMap::new(), counters: DashMap::new() }
    }

    pub fn add_message(&self, username: &str, text: &str) -> Verdict {
        self.add_message_at(username, text, Utc::now())
    }

    /// Ingest one chat line at `now` and classify the sender.
    pub fn add_message_at(&self, username: &str, text: &str, now: DateTime<Utc>) -> Verdict {
        let key = user_key(username);
        let horizon = self.cfg.max_window_secs();

        let violation = {
            let mut window = self
                .windows
                .entry(key.clone())
                .or_insert_with(|| MessageWindow::new(username));
            window.ingest(text, now, horizon);
            self.evaluate(&window, text, now)
        };

        self.grade(&key, violation, now)
    }

    fn grade(&self, key: &str, violation: Option<Violation>, now: DateTime<Utc>) -> Verdict {
        let reset = self.cfg.violation_reset_secs;
        let Some(v) = violation else {
            let count = self.counters.get(key).map(|c| c.current(now, reset)).unwrap_or(0);
            return Verdict { level: VerdictLevel::Ok, reason: "ok".into(), signal: None, violations: count };
        };

        let count = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| ViolationCounter::new(now))
            .record(now, reset);

        let mut level = grade(count, self.cfg.violation_warn_threshold, self.cfg.violation_kick_threshold);
        if v.signal == Signal::Gibberish {
            level = level.min(VerdictLevel::Warn);
        }
        debug!(user = key, signal = %v.signal, count, level = %level, "Violation");

        Verdict { level, reason: v.reason, signal: Some(v.signal), violations: count }
    }

    /// Run every heuristic against a freshly updated window.
    pub fn evaluate(&self, window: &MessageWindow, text: &str, now: DateTime<Utc>) -> Option<Violation> {
        if self.cfg.link_protection && link::contains_link(text) {
            return Some(Violation { signal: Signal::Link, reason: "link".into() });
        }

        for spec in &self.cfg.windows {
            let events = window.events_in(now, spec.duration_secs);
            if events.len() < self.cfg.min_messages_for_rate_check {
                continue;
            }
            if let Some(v) = self.check_window(spec, &events, now) {
                return Some(v);
            }
        }

        if let Some(max) = self.cfg.gibberish_max_consonants {
            let run = gibberish::longest_consonant_run(text);
            if run > max {
                return Some(Violation {
                    signal: Signal::Gibberish,
                    reason: format!("gibberish ({} consonants in a row > {})", run, max),
                });
            }
        }
        None
    }

    fn check_window(&self, spec: &WindowSpec, events: &[&MessageEvent], now: DateTime<Utc>) -> Option<Violation> {
        let cfg = &self.cfg;
        let count = events.len();
        let rate = rate_per_sec(events, now);
        let allowed = spec.allowed_rate();
        let content_rate_ok = rate > allowed * cfg.rate_multiplier_content;

        if count >= cfg.min_messages_for_content_check {
            let identical = content::max_identical(events);
            if identical >= cfg.identical_threshold && content_rate_ok {
                return Some(Violation {
                    signal: Signal::Identical,
                    reason: format!("identical ({}/{}) in {} window", identical, cfg.identical_threshold, spec.name),
                });
            }

            let trivial = content::count_trivial(events);
            if trivial >= cfg.trivial_threshold && content_rate_ok {
                return Some(Violation {
                    signal: Signal::Trivial,
                    reason: format!("trivial ({}/{}) in {} window", trivial, cfg.trivial_threshold, spec.name),
                });
            }

            if identical < cfg.identical_threshold {
                let pairs = content::count_similar_pairs(events);
                let threshold = cfg
                    .similar_pairs_threshold
                    .max((count as f64 * cfg.similar_pairs_ratio).floor() as usize);
                if pairs >= threshold && content_rate_ok {
                    return Some(Violation {
                        signal: Signal::Similar,
                        reason: format!("similar ({}/{}) in {} window", pairs, threshold, spec.name),
                    });
                }
            }
        }

        if rate > allowed * cfg.rate_multiplier_flood && count as f64 > spec.limit as f64 * cfg.flood_fill_ratio {
            return Some(Violation {
                signal: Signal::Flood,
                reason: format!(
                    "flood (rate {:.1} > {:.1}*{}) in {} window",
                    rate, allowed, cfg.rate_multiplier_flood, spec.name
                ),
            });
        }
        None
    }

    /// Drop all per-user state (window and violation counter).
    pub fn forget(&self, username: &str) {
        let key = user_key(username);
        self.windows.remove(&key);
        self.counters.remove(&key);
    }

    /// Evict windows with no message inside the horizon and stale counters.
    pub fn expire_idle(&self, now: DateTime<Utc>) -> usize {
        let horizon = self.cfg.max_window_secs();
        let reset = self.cfg.violation_reset_secs;
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            w.expire_old(now, horizon);
            !w.is_empty()
        });
        self.counters.retain(|_, c| c.current(now, reset) > 0);
        before - self.windows.len()
    }

    /// Retained window length for a user (0 when untracked).
    pub fn window_len(&self, username: &str) -> usize {
        self.windows.get(&user_key(username)).map(|w| w.len()).unwrap_or(0)
    }

    /// Oldest retained message time for a user.
    pub fn window_oldest(&self, username: &str) -> Option<DateTime<Utc>> {
        self.windows.get(&user_key(username)).and_then(|w| w.oldest())
    }

    pub fn n_users(&self) -> usize {
        self.windows.len()
    }
}
