// clanwarden/src/engine/reconciler.rs
//
// Periodic reconciliation of time-bounded state.
//
//   ban sweep   (every ban_sweep_secs)   temporary bans with expiry ≤ now are
//                                        lifted: blacklist off, banInfo cleared,
//                                        UI row removed.
//   warn sweep  (every warn_sweep_secs)  warnings older than the reset horizon
//                                        are cleared and announced once.
//   rejoin                                a returning user's warnings and
//                                        temporary ban are reset.
//
// Each user is handled under its UserLocks entry and re-checked after the
// lock is taken, so a second sweep right after the first finds nothing to do.
// A failure on one user is logged and counted; the sweep moves on.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};

use super::Collaborators;
use crate::config::{render, Messages, ReconcilerConfig};
use crate::error::{DirectoryError, ModResult};
use crate::events::PlayerRecord;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub lifted: usize,
    pub failed: usize,
}

pub struct ExpiryReconciler {
    cfg:      ReconcilerConfig,
    messages: Messages,
    deps:     Collaborators,
}

impl ExpiryReconciler {
    pub fn new(cfg: ReconcilerConfig, messages: Messages, deps: Collaborators) -> Arc<Self> {
        Arc::new(Self { cfg, messages, deps })
    }

    fn warn_horizon(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.cfg.warn_reset_minutes)
    }

    fn has_stale_warnings(&self, record: &PlayerRecord, now: DateTime<Utc>) -> bool {
        record.warn_count > 0
            && record.warn_timestamp.map_or(true, |t| now - t > self.warn_horizon())
    }

    /// Usernames whose record matches `due`, sorted for a stable sweep order.
    fn candidates(&self, due: impl Fn(&PlayerRecord) -> bool) -> Option<Vec<String>> {
        match self.deps.store.get_all() {
            Ok(all) => {
                let mut names: Vec<String> =
                    all.into_iter().filter(|(_, r)| due(r)).map(|(k, _)| k).collect();
                names.sort();
                Some(names)
            }
            Err(e) => {
                error!("Reading player records for sweep failed: {}", e);
                None
            }
        }
    }

    // ── Ban expiry ────────────────────────────────────────────────────────────

    pub async fn sweep_expired_bans(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(due) = self.candidates(|r| r.ban.as_ref().is_some_and(|b| b.is_expired(now))) else {
            return report;
        };

        for name in due {
            match self.lift_expired_ban(&name, now).await {
                Ok(true) => report.lifted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(user = %name, "Ban expiry skipped, retrying next sweep: {}", e);
                }
            }
        }
        report
    }

    async fn lift_expired_ban(&self, name: &str, now: DateTime<Utc>) -> Result<bool, DirectoryError> {
        let _lock = self.deps.locks.lock(name).await;
        let mut record = self.deps.load(name);
        if !record.ban.as_ref().is_some_and(|b| b.is_expired(now)) {
            return Ok(false);
        }

        match self.deps.directory.get_user(name).await? {
            Some(user) if user.is_blacklisted => {
                self.deps.directory.set_blacklist(&user.username, false).await?;
            }
            Some(_) => {}
            None => debug!(user = %name, "Expired ban for user unknown to directory"),
        }

        record.ban = None;
        self.deps.persist(name, record);
        self.deps.board.remove(name);
        info!(user = %name, "Temporary ban expired and was lifted");
        Ok(true)
    }

    // ── Warning reset ─────────────────────────────────────────────────────────

    pub async fn sweep_stale_warnings(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(due) = self.candidates(|r| self.has_stale_warnings(r, now)) else {
            return report;
        };

        for name in due {
            let reset = {
                let _lock = self.deps.locks.lock(&name).await;
                let mut record = self.deps.load(&name);
                if self.has_stale_warnings(&record, now) {
                    record.clear_warnings();
                    self.deps.persist(&name, record);
                    self.deps.board.remove(&name);
                    true
                } else {
                    false
                }
            };
            if reset {
                report.lifted += 1;
                info!(user = %name, "Stale warnings reset");
                self.deps
                    .notifier
                    .announce(render(&self.messages.warn_reset_auto, &[("target", name.as_str())]))
                    .await;
            }
        }
        report
    }

    // ── Rejoin ────────────────────────────────────────────────────────────────

    /// Reset warnings and any temporary ban of a returning user.
    /// Returns whether anything changed. Permanent bans are left alone.
    pub async fn on_rejoin(&self, username: &str) -> ModResult<bool> {
        let _lock = self.deps.locks.lock(username).await;
        let mut record = self.deps.load(username);
        let temporary_ban = record.ban.as_ref().is_some_and(|b| b.is_temporary());
        if record.warn_count == 0 && !temporary_ban {
            return Ok(false);
        }

        if temporary_ban {
            if let Some(user) = self.deps.directory.get_user(username).await? {
                if user.is_blacklisted {
                    self.deps.directory.set_blacklist(&user.username, false).await?;
                }
            }
            record.ban = None;
        }
        record.clear_warnings();

        self.deps.persist(username, record);
        self.deps.board.remove(username);
        info!(user = %username, lifted_ban = temporary_ban, "Rejoin reset");
        Ok(true)
    }

    // ── Loops ─────────────────────────────────────────────────────────────────

    pub async fn ban_sweep_loop(self: Arc<Self>) {
        let every = std::time::Duration::from_secs(self.cfg.ban_sweep_secs.max(1));
        loop {
            tokio::time::sleep(every).await;
            let report = self.sweep_expired_bans(Utc::now()).await;
            if report != SweepReport::default() {
                info!(lifted = report.lifted, failed = report.failed, "Ban sweep");
            }
        }
    }

    pub async fn warn_sweep_loop(self: Arc<Self>) {
        let every = std::time::Duration::from_secs(self.cfg.warn_sweep_secs.max(1));
        loop {
            tokio::time::sleep(every).await;
            let report = self.sweep_stale_warnings(Utc::now()).await;
            if report != SweepReport::default() {
                info!(reset = report.lifted, "Warn sweep");
            }
        }
    }
}
