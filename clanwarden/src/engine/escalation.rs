// clanwarden/src/engine/escalation.rs
//
// Escalation engine: warn / ban / unban / unwarn against a PlayerRecord.
//
// Each operation runs its record transition (load, check, mutate, persist,
// board update) under the target's UserLocks entry. A warn that reaches
// `warns_to_ban` continues into an AutoMod ban inside the same critical
// section, so no other action on the same user can interleave between the
// warn write and the ban write. Notices are collected while locked and sent
// after the lock is released; throttle waits and the kick delay never hold it.
//
// Ban sequencing:
//   immunity enter → directory resolve → already-banned check
//   → blacklist (abort on failure, nothing written yet)
//   → record write → UI row → [lock released]
//   → announcement → kick delay → kick command
//   → immunity release (guard drop, every exit path)

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info};

use super::immunity::ImmunityGuard;
use super::Collaborators;
use crate::config::{render, EscalationConfig, Messages};
use crate::error::{ModError, ModResult};
use crate::events::{BanInfo, HistoryEntry, HistoryKind, PlayerRecord, ViolatorCount, AUTOMOD};

/// Reason callers pass when the moderator gave none.
pub const PLACEHOLDER_REASON: &str = "No reason given";

#[derive(Debug, Clone, PartialEq)]
pub struct BanOutcome {
    pub moderator: String,
    pub reason:    String,
    pub expiry:    Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarnOutcome {
    /// Count reached by this warn (the stored count is 0 again if it escalated).
    pub warn_count: u32,
    pub escalated:  Option<BanOutcome>,
}

/// What a recorded ban still owes the chat. Holds the target's immunity
/// until the kick has gone out.
struct PendingBan {
    announcement: String,
    kick:         String,
    _immune:      ImmunityGuard,
}

pub struct EscalationEngine {
    cfg:      EscalationConfig,
    messages: Messages,
    deps:     Collaborators,
}

impl EscalationEngine {
    pub fn new(cfg: EscalationConfig, messages: Messages, deps: Collaborators) -> Arc<Self> {
        Arc::new(Self { cfg, messages, deps })
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    fn normalize_reason(&self, reason: &str) -> String {
        let r = reason.trim();
        if r.is_empty() || r == PLACEHOLDER_REASON {
            self.messages.unspecified_reason.clone()
        } else {
            r.to_string()
        }
    }

    // ── Warn ──────────────────────────────────────────────────────────────────

    pub async fn apply_warn(&self, target: &str, moderator: &str, reason: &str) -> ModResult<WarnOutcome> {
        let (outcome, notice, pending) = {
            let _lock = self.deps.locks.lock(target).await;
            let now = Utc::now();
            let reason = self.normalize_reason(reason);

            let mut record = self.deps.load(target);
            if record.is_banned() {
                return Err(ModError::AlreadyBanned(target.to_string()));
            }

            record.warn_count += 1;
            record.warn_timestamp = Some(now);
            record.push_history(HistoryKind::Warn, moderator, &reason, now);
            let count = record.warn_count;
            self.deps.persist(target, record);
            self.deps.board.upsert(target, ViolatorCount::Warns(count), &reason);

            info!(user = %target, moderator = %moderator, count, limit = self.cfg.warns_to_ban,
                  "Warned: {}", reason);

            let template = if moderator == AUTOMOD {
                &self.messages.warn_success_auto
            } else {
                &self.messages.warn_success
            };
            let count_s = count.to_string();
            let limit_s = self.cfg.warns_to_ban.to_string();
            let notice = render(template, &[
                ("moderator", moderator),
                ("target",    target),
                ("reason",    &reason),
                ("count",     &count_s),
                ("limit",     &limit_s),
            ]);

            let (escalated, pending) = if count >= self.cfg.warns_to_ban {
                match self.record_ban(target, AUTOMOD, &self.messages.ban_by_warns_reason).await {
                    Ok((ban, pending)) => (Some(ban), Some(pending)),
                    Err(e) => {
                        error!(user = %target, "Escalation to ban failed: {}", e);
                        (None, None)
                    }
                }
            } else {
                (None, None)
            };

            (WarnOutcome { warn_count: count, escalated }, notice, pending)
        };

        self.deps.notifier.announce(notice).await;
        if let Some(pending) = pending {
            self.deliver_ban(pending).await;
        }
        Ok(outcome)
    }

    // ── Ban ───────────────────────────────────────────────────────────────────

    pub async fn apply_ban(&self, target: &str, moderator: &str, reason: &str) -> ModResult<BanOutcome> {
        let (outcome, pending) = {
            let _lock = self.deps.locks.lock(target).await;
            self.record_ban(target, moderator, reason).await?
        };
        self.deliver_ban(pending).await;
        Ok(outcome)
    }

    /// Ban transition; the caller holds the target's lock. Nothing is sent
    /// from here.
    async fn record_ban(&self, target: &str, moderator: &str, reason: &str) -> ModResult<(BanOutcome, PendingBan)> {
        let immune = self.deps.immunity.enter(target);

        let user = self
            .deps
            .directory
            .get_user(target)
            .await?
            .ok_or_else(|| ModError::UnknownUser(target.to_string()))?;

        let mut record = self.deps.load(target);
        let is_auto = moderator == AUTOMOD;
        if let Some(ban) = &record.ban {
            // a human may still make a temporary ban permanent
            if !ban.is_temporary() || is_auto {
                return Err(ModError::AlreadyBanned(target.to_string()));
            }
        }

        let reason = self.normalize_reason(reason);
        self.deps.directory.set_blacklist(&user.username, true).await?;

        let now = Utc::now();
        let expiry = is_auto.then(|| now + ChronoDuration::minutes(self.cfg.auto_ban_minutes));
        record.ban = Some(BanInfo {
            expiry,
            reason:    reason.clone(),
            moderator: moderator.to_string(),
        });
        record.clear_warnings();
        record.push_history(HistoryKind::Ban, moderator, &reason, now);
        self.deps.persist(target, record);
        self.deps.board.upsert(target, ViolatorCount::Banned, &reason);

        info!(user = %target, moderator = %moderator, temporary = is_auto, "Banned: {}", reason);

        let announcement = if is_auto {
            let duration = format!("{} minutes", self.cfg.auto_ban_minutes);
            render(&self.messages.ban_success_auto, &[
                ("target",   target),
                ("duration", &duration),
                ("reason",   &reason),
            ])
        } else {
            render(&self.messages.ban_success, &[
                ("moderator", moderator),
                ("target",    target),
                ("reason",    &reason),
            ])
        };
        let pending = PendingBan {
            announcement,
            kick:    render(&self.cfg.kick_command, &[("target", &user.username)]),
            _immune: immune,
        };

        Ok((BanOutcome { moderator: moderator.to_string(), reason, expiry }, pending))
    }

    /// Announcement, kick delay, kick. Immunity ends when `pending` drops.
    async fn deliver_ban(&self, pending: PendingBan) {
        self.deps.notifier.announce(pending.announcement).await;
        tokio::time::sleep(self.cfg.kick_delay()).await;
        self.deps.notifier.command(pending.kick).await;
    }

    // ── Unban / unwarn ────────────────────────────────────────────────────────

    pub async fn unban(&self, target: &str, moderator: &str) -> ModResult<()> {
        {
            let _lock = self.deps.locks.lock(target).await;

            let user = self
                .deps
                .directory
                .get_user(target)
                .await?
                .ok_or_else(|| ModError::UnknownUser(target.to_string()))?;

            let mut record = self.deps.load(target);
            if !record.is_banned() && !user.is_blacklisted {
                return Err(ModError::NotBanned(target.to_string()));
            }
            if user.is_blacklisted {
                self.deps.directory.set_blacklist(&user.username, false).await?;
            }

            record.ban = None;
            self.deps.persist(target, record);
            self.deps.board.remove(target);
        }

        info!(user = %target, moderator = %moderator, "Unbanned");
        self.deps.notifier.announce(render(&self.messages.unban_success, &[
            ("moderator", moderator),
            ("target",    target),
        ])).await;
        Ok(())
    }

    pub async fn unwarn(&self, target: &str, moderator: &str) -> ModResult<()> {
        {
            let _lock = self.deps.locks.lock(target).await;

            let mut record = self.deps.load(target);
            if record.warn_count == 0 {
                return Err(ModError::NoActiveWarnings(target.to_string()));
            }
            record.clear_warnings();
            self.deps.persist(target, record);
            self.deps.board.remove(target);
        }

        info!(user = %target, moderator = %moderator, "Warnings cleared");
        self.deps.notifier.announce(render(&self.messages.unwarn_success, &[
            ("moderator", moderator),
            ("target",    target),
        ])).await;
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Punishment history, oldest first.
    pub fn history(&self, target: &str) -> Vec<HistoryEntry> {
        self.deps.load(target).history
    }

    pub fn record(&self, target: &str) -> PlayerRecord {
        self.deps.load(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::directory::MemoryDirectory;
    use crate::engine::immunity::{ImmunitySet, UserLocks};
    use crate::events::ChannelKind;
    use crate::notify::{MemorySink, Notifier};
    use crate::state::board::{MemoryUiSink, ViolatorBoard};
    use crate::state::records::{MemoryRecordStore, RecordStore};

    struct Harness {
        engine: Arc<EscalationEngine>,
        dir:    Arc<MemoryDirectory>,
        store:  Arc<MemoryRecordStore>,
        sink:   Arc<MemorySink>,
        ui:     Arc<MemoryUiSink>,
    }

    fn harness() -> Harness {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add("alex");
        dir.add("steve");
        let store = Arc::new(MemoryRecordStore::new());
        let sink = Arc::new(MemorySink::default());
        let ui = Arc::new(MemoryUiSink::default());
        let deps = Collaborators {
            store:     store.clone(),
            directory: dir.clone(),
            notifier:  Arc::new(Notifier::new(sink.clone(), Duration::from_millis(300))),
            board:     Arc::new(ViolatorBoard::new(50, ui.clone())),
            immunity:  ImmunitySet::new(),
            locks:     UserLocks::new(),
        };
        let engine = EscalationEngine::new(EscalationConfig::default(), Messages::default(), deps);
        Harness { engine, dir, store, sink, ui }
    }

    #[tokio::test(start_paused = true)]
    async fn warns_below_threshold_accumulate() {
        let h = harness();
        for n in 1..=2 {
            let out = h.engine.apply_warn("alex", "Admin", "spam").await.unwrap();
            assert_eq!(out.warn_count, n);
            assert!(out.escalated.is_none());
        }
        let rec = h.store.get("alex").unwrap().unwrap();
        assert_eq!(rec.warn_count, 2);
        assert!(rec.ban.is_none());
        assert!(rec.warn_timestamp.is_some());

        let announced = h.sink.on_channel(ChannelKind::Clan);
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[1].lines[0], "Admin warned alex: spam (2/3)");
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_warn_escalates_to_exactly_one_auto_ban() {
        let h = harness();
        h.engine.apply_warn("alex", "Admin", "a").await.unwrap();
        h.engine.apply_warn("alex", "Admin", "b").await.unwrap();
        let out = h.engine.apply_warn("alex", AUTOMOD, "c").await.unwrap();

        let ban = out.escalated.expect("auto-ban");
        assert_eq!(ban.moderator, AUTOMOD);
        assert_eq!(ban.reason, "Warning limit reached");
        assert!(ban.expiry.is_some());

        let rec = h.engine.record("alex");
        assert_eq!(rec.warn_count, 0);
        assert_eq!(rec.ban.as_ref().unwrap().moderator, AUTOMOD);
        let bans = rec.history.iter().filter(|e| e.kind == HistoryKind::Ban).count();
        assert_eq!(bans, 1);
        assert!(h.dir.user("alex").unwrap().is_blacklisted);

        let kicks = h.sink.on_channel(ChannelKind::Command);
        assert_eq!(kicks.len(), 1);
        assert_eq!(kicks[0].lines[0], "/c kick alex");
        assert!(h.engine.collaborators().immunity.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_ban_is_permanent_and_kick_follows_announcement() {
        let h = harness();
        h.engine.apply_warn("alex", "Admin", "x").await.unwrap();
        let ban = h.engine.apply_ban("alex", "Admin", PLACEHOLDER_REASON).await.unwrap();
        assert_eq!(ban.expiry, None);
        assert_eq!(ban.reason, "Unspecified");

        let rec = h.engine.record("alex");
        assert_eq!(rec.warn_count, 0);
        assert!(rec.warn_timestamp.is_none());

        let sent = h.sink.sent.lock().clone();
        let ann = sent.iter().position(|(_, n)| n.lines[0] == "Admin banned alex. Reason: Unspecified").unwrap();
        let kick = sent.iter().position(|(_, n)| n.channel == ChannelKind::Command).unwrap();
        assert!(ann < kick);
        assert!(sent[kick].0 - sent[ann].0 >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_user_ban_changes_nothing() {
        let h = harness();
        let err = h.engine.apply_ban("ghost", "Admin", "x").await.unwrap_err();
        assert_eq!(err, ModError::UnknownUser("ghost".into()));
        assert!(h.store.is_empty());
        assert!(h.sink.notices().is_empty());
        assert!(h.engine.collaborators().immunity.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn directory_failure_aborts_ban_and_releases_immunity() {
        let h = harness();
        h.engine.apply_warn("alex", "Admin", "x").await.unwrap();
        h.dir.fail_lookups_for("alex", "timeout");

        let err = h.engine.apply_ban("alex", "Admin", "x").await.unwrap_err();
        assert!(matches!(err, ModError::Directory(_)));
        let rec = h.engine.record("alex");
        assert_eq!(rec.warn_count, 1);
        assert!(rec.ban.is_none());
        assert!(h.engine.collaborators().immunity.is_empty());
        assert_eq!(h.dir.blacklist_writes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn already_banned_rules() {
        let h = harness();
        h.engine.apply_ban("alex", AUTOMOD, "spam").await.unwrap();
        assert_eq!(
            h.engine.apply_ban("alex", AUTOMOD, "again").await.unwrap_err(),
            ModError::AlreadyBanned("alex".into())
        );
        assert_eq!(
            h.engine.apply_warn("alex", "Admin", "x").await.unwrap_err(),
            ModError::AlreadyBanned("alex".into())
        );

        // human upgrade of a temporary ban to permanent
        let ban = h.engine.apply_ban("alex", "Admin", "for good").await.unwrap();
        assert!(ban.expiry.is_none());
        assert_eq!(
            h.engine.apply_ban("alex", "Admin", "again").await.unwrap_err(),
            ModError::AlreadyBanned("alex".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unban_and_unwarn_rejections_and_success() {
        let h = harness();
        assert_eq!(h.engine.unban("alex", "Admin").await.unwrap_err(), ModError::NotBanned("alex".into()));
        assert_eq!(h.engine.unwarn("alex", "Admin").await.unwrap_err(), ModError::NoActiveWarnings("alex".into()));
        assert_eq!(h.engine.unban("ghost", "Admin").await.unwrap_err(), ModError::UnknownUser("ghost".into()));

        h.engine.apply_warn("steve", "Admin", "x").await.unwrap();
        h.engine.unwarn("steve", "Admin").await.unwrap();
        assert_eq!(h.engine.record("steve").warn_count, 0);

        h.engine.apply_ban("alex", "Admin", "x").await.unwrap();
        h.engine.unban("alex", "Admin").await.unwrap();
        assert!(!h.engine.record("alex").is_banned());
        assert!(!h.dir.user("alex").unwrap().is_blacklisted);
        assert!(h.ui.last.lock().is_empty());
        // history is append-only and unaffected by lifting
        assert_eq!(h.engine.history("alex").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_ordered_and_board_tracks_latest_state() {
        let h = harness();
        h.engine.apply_warn("alex", "Admin", "first").await.unwrap();
        h.engine.apply_warn("steve", "Admin", "other").await.unwrap();
        h.engine.apply_ban("alex", "Mod", "second").await.unwrap();

        let hist = h.engine.history("ALEX");
        let kinds: Vec<_> = hist.iter().map(|e| (e.kind, e.reason.as_str())).collect();
        assert_eq!(kinds, vec![(HistoryKind::Warn, "first"), (HistoryKind::Ban, "second")]);
        assert!(hist[0].date <= hist[1].date);

        let rows = h.ui.last.lock().clone();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "alex");
        assert_eq!(rows[0].count, ViolatorCount::Banned);
        assert_eq!(rows[1].count, ViolatorCount::Warns(1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_warns_on_one_user_escalate_once() {
        let h = harness();
        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = Arc::clone(&h.engine);
            handles.push(tokio::spawn(async move {
                engine.apply_warn("alex", AUTOMOD, &format!("spam {}", i)).await
            }));
        }
        let mut escalations = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(out) if out.escalated.is_some() => escalations += 1,
                Ok(_) => {}
                Err(ModError::AlreadyBanned(_)) => rejected += 1,
                Err(e) => panic!("unexpected {}", e),
            }
        }
        assert_eq!(escalations, 1);
        assert_eq!(rejected, 1);
        assert_eq!(h.engine.record("alex").warn_count, 0);
    }

    fn queue_backlog(h: &Harness, n: usize) {
        for i in 0..n {
            let notifier = Arc::clone(&h.engine.collaborators().notifier);
            tokio::spawn(async move { notifier.announce(format!("backlog {}", i)).await });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn user_lock_is_free_while_warn_notice_waits_for_throttle() {
        let h = harness();
        queue_backlog(&h, 10);
        let engine = Arc::clone(&h.engine);
        let warn = tokio::spawn(async move { engine.apply_warn("alex", "Admin", "x").await });

        // let every task reach its throttle wait
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.engine.record("alex").warn_count, 1);
        assert!(!warn.is_finished());

        let start = tokio::time::Instant::now();
        let guard = h.engine.collaborators().locks.lock("alex").await;
        assert_eq!(tokio::time::Instant::now(), start);
        drop(guard);

        let out = warn.await.unwrap().unwrap();
        assert_eq!(out.warn_count, 1);
        let announced = h.sink.on_channel(ChannelKind::Clan);
        assert_eq!(announced.len(), 11);
        assert_eq!(announced[10].lines[0], "Admin warned alex: x (1/3)");
    }

    #[tokio::test(start_paused = true)]
    async fn ban_releases_lock_before_announcement_and_kick() {
        let h = harness();
        queue_backlog(&h, 10);
        let engine = Arc::clone(&h.engine);
        let ban = tokio::spawn(async move { engine.apply_ban("alex", "Admin", "x").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.engine.record("alex").is_banned());
        assert!(h.engine.collaborators().immunity.contains("alex"));

        let start = tokio::time::Instant::now();
        let guard = h.engine.collaborators().locks.lock("alex").await;
        assert_eq!(tokio::time::Instant::now(), start);
        drop(guard);

        ban.await.unwrap().unwrap();
        assert_eq!(h.sink.on_channel(ChannelKind::Command).len(), 1);
        assert!(h.engine.collaborators().immunity.is_empty());
    }
}
