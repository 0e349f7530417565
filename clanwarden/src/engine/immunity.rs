// clanwarden/src/engine/immunity.rs
//
// Enforcement-time exclusion primitives.
//
//   ImmunitySet  — users currently being banned. Entering returns a guard;
//                  membership ends when the guard drops, on every exit path
//                  (success, `?` early return, panic unwind, task abort).
//                  Re-entrant: nested guards for one user are ref-counted.
//   UserLocks    — per-user async mutex; every read-modify-write of a
//                  PlayerRecord runs under it, including warn → auto-ban.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::state::records::user_key;

#[derive(Default)]
pub struct ImmunitySet {
    members: DashMap<String, usize>,
}

impl ImmunitySet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>, username: &str) -> ImmunityGuard {
        let key = user_key(username);
        *self.members.entry(key.clone()).or_insert(0) += 1;
        ImmunityGuard { set: Arc::clone(self), key }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.members.contains_key(&user_key(username))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub struct ImmunityGuard {
    set: Arc<ImmunitySet>,
    key: String,
}

impl Drop for ImmunityGuard {
    fn drop(&mut self) {
        if let Some(mut n) = self.set.members.get_mut(&self.key) {
            *n = n.saturating_sub(1);
        }
        self.set.members.remove_if(&self.key, |_, n| *n == 0);
    }
}

#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the critical section for `username`. Not re-entrant.
    pub async fn lock(&self, username: &str) -> OwnedMutexGuard<()> {
        let m = self.locks.entry(user_key(username)).or_default().clone();
        m.lock_owned().await
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
