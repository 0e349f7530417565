// clanwarden/src/state/board.rs
//
// Violator board — the bounded, most-recent-first table of active offenders
// that backs the UI page. Every mutation republishes the full snapshot.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::events::{ViolatorCount, ViolatorRow};
use crate::state::records::user_key;

/// Receives the full violator snapshot after every change.
pub trait UiSink: Send + Sync {
    fn publish(&self, snapshot: &[ViolatorRow]);
}

/// Stable short row id for a username.
pub fn row_id(username: &str) -> String {
    let mut h = Sha256::new();
    h.update(b"violator:");
    h.update(user_key(username).as_bytes());
    hex::encode(&h.finalize()[..8])
}

pub struct ViolatorBoard {
    rows: Mutex<VecDeque<ViolatorRow>>,
    cap:  usize,
    sink: Arc<dyn UiSink>,
}

impl ViolatorBoard {
    pub fn new(cap: usize, sink: Arc<dyn UiSink>) -> Self {
        Self { rows: Mutex::new(VecDeque::new()), cap: cap.max(1), sink }
    }

    /// Insert or replace the row for `username` and move it to the front.
    pub fn upsert(&self, username: &str, count: ViolatorCount, reason: &str) {
        let id = row_id(username);
        let snapshot = {
            let mut rows = self.rows.lock();
            rows.retain(|r| r.id != id);
            rows.push_front(ViolatorRow {
                id,
                username:    username.to_string(),
                count,
                last_reason: reason.to_string(),
                date:        Utc::now(),
            });
            rows.truncate(self.cap);
            rows.iter().cloned().collect::<Vec<_>>()
        };
        self.sink.publish(&snapshot);
    }

    pub fn remove(&self, username: &str) {
        let id = row_id(username);
        let snapshot = {
            let mut rows = self.rows.lock();
            let before = rows.len();
            rows.retain(|r| r.id != id);
            if rows.len() == before {
                return;
            }
            rows.iter().cloned().collect::<Vec<_>>()
        };
        self.sink.publish(&snapshot);
    }

    pub fn snapshot(&self) -> Vec<ViolatorRow> {
        self.rows.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Writes the snapshot as pretty JSON, replacing the file each time.
pub struct JsonFileUiSink {
    path: PathBuf,
}

impl JsonFileUiSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UiSink for JsonFileUiSink {
    fn publish(&self, snapshot: &[ViolatorRow]) {
        let body = serde_json::json!({ "violators": snapshot });
        let json = serde_json::to_string_pretty(&body).unwrap_or_default();
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("Violator snapshot write to {} failed: {}", self.path.display(), e);
        }
    }
}

/// Keeps the last published snapshot in memory.
#[derive(Default)]
pub struct MemoryUiSink {
    pub last:      Mutex<Vec<ViolatorRow>>,
    pub publishes: std::sync::atomic::AtomicUsize,
}

impl UiSink for MemoryUiSink {
    fn publish(&self, snapshot: &[ViolatorRow]) {
        *self.last.lock() = snapshot.to_vec();
        self.publishes.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn board(cap: usize) -> (ViolatorBoard, Arc<MemoryUiSink>) {
        let sink = Arc::new(MemoryUiSink::default());
        (ViolatorBoard::new(cap, sink.clone()), sink)
    }

    #[test]
    fn upsert_replaces_by_identity_and_moves_to_front() {
        let (b, sink) = board(10);
        b.upsert("Alex", ViolatorCount::Warns(1), "spam");
        b.upsert("Steve", ViolatorCount::Warns(1), "caps");
        b.upsert("alex", ViolatorCount::Banned, "limit");

        let rows = sink.last.lock().clone();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "alex");
        assert_eq!(rows[0].count, ViolatorCount::Banned);
        assert_eq!(rows[1].username, "Steve");
        assert_eq!(sink.publishes.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn board_is_capped_most_recent_first() {
        let (b, _) = board(3);
        for name in ["a", "b", "c", "d", "e"] {
            b.upsert(name, ViolatorCount::Warns(1), "x");
        }
        let names: Vec<_> = b.snapshot().into_iter().map(|r| r.username).collect();
        assert_eq!(names, vec!["e", "d", "c"]);
    }

    #[test]
    fn remove_of_absent_row_does_not_publish() {
        let (b, sink) = board(3);
        b.remove("ghost");
        assert_eq!(sink.publishes.load(Ordering::Relaxed), 0);
        b.upsert("alex", ViolatorCount::Warns(1), "x");
        b.remove("ALEX");
        assert!(b.is_empty());
        assert_eq!(sink.publishes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn row_id_is_stable_and_case_insensitive() {
        assert_eq!(row_id("Alex"), row_id("alex"));
        assert_ne!(row_id("alex"), row_id("steve"));
        assert_eq!(row_id("alex").len(), 16);
    }
}
