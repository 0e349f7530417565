// clanwarden/src/state/records.rs
//
// Player record persistence.
//
// The store is an external collaborator: a durable username → PlayerRecord
// map. Two implementations ship here:
//   MemoryRecordStore  — DashMap only (tests, dry runs)
//   JsonRecordStore    — DashMap + whole-file JSON snapshot on every write
//
// Keys are lower-cased usernames. A failed write leaves the in-memory copy
// updated; callers log the error and carry on.

use std::collections::HashMap;
use std::path::PathBuf;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::events::PlayerRecord;

/// Canonical record key for a username.
pub fn user_key(username: &str) -> String {
    username.trim().to_lowercase()
}

pub trait RecordStore: Send + Sync {
    fn get_all(&self) -> Result<HashMap<String, PlayerRecord>, StoreError>;
    fn get(&self, username: &str) -> Result<Option<PlayerRecord>, StoreError>;
    fn set(&self, username: &str, record: PlayerRecord) -> Result<(), StoreError>;

    /// Lazily materialized record: the zero value when nothing is stored.
    fn load(&self, username: &str) -> Result<PlayerRecord, StoreError> {
        Ok(self.get(username)?.unwrap_or_default())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, PlayerRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_all(&self) -> Result<HashMap<String, PlayerRecord>, StoreError> {
        Ok(self.records.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
    }

    fn get(&self, username: &str) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.records.get(&user_key(username)).map(|r| r.clone()))
    }

    fn set(&self, username: &str, record: PlayerRecord) -> Result<(), StoreError> {
        self.records.insert(user_key(username), record);
        Ok(())
    }
}

// ── JSON file ─────────────────────────────────────────────────────────────────

pub struct JsonRecordStore {
    path:    PathBuf,
    records: DashMap<String, PlayerRecord>,
    write:   parking_lot::Mutex<()>, // serializes snapshot writes
}

impl JsonRecordStore {
    /// Open (or create on first write) the record file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path: PathBuf = path.into();
        let records = DashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if !raw.trim().is_empty() {
                let map: HashMap<String, PlayerRecord> = serde_json::from_str(&raw)?;
                for (k, v) in map {
                    records.insert(user_key(&k), v);
                }
            }
            info!(records = records.len(), path = %path.display(), "Loaded player records");
        }
        Ok(Self { path, records, write: parking_lot::Mutex::new(()) })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _w = self.write.lock();
        let snapshot: HashMap<String, PlayerRecord> =
            self.records.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(records = snapshot.len(), "Player records flushed");
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    fn get_all(&self) -> Result<HashMap<String, PlayerRecord>, StoreError> {
        Ok(self.records.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
    }

    fn get(&self, username: &str) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.records.get(&user_key(username)).map(|r| r.clone()))
    }

    fn set(&self, username: &str, record: PlayerRecord) -> Result<(), StoreError> {
        self.records.insert(user_key(username), record);
        self.flush()
    }
}
