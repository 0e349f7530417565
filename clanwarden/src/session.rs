// clanwarden/src/session.rs
//
// ModerationSession: owns one detector, one escalation engine, one
// reconciler and the collaborators they share. Created on start, torn down
// explicitly; nothing here is process-global.
//
// Dispatch:
//   message{clan}  → chat gate → detector → (flagged) immunity enter
//                  → spawned apply_warn / apply_ban as AutoMod
//   joined         → spawned rejoin reset
//   command        → spawned command gate → engine
//
// Enforcement runs on spawned tasks so the event loop keeps consuming, and
// the immunity guard is taken before spawning so the very next event from
// the same user already sees it. Per-user ordering is enforced by UserLocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{render, Settings};
use crate::detector::AnomalyDetector;
use crate::directory::{DirectoryUser, UserDirectory, PERM_BAN, PERM_IMMUNE, PERM_WARN};
use crate::engine::escalation::{EscalationEngine, PLACEHOLDER_REASON};
use crate::engine::immunity::{ImmunityGuard, ImmunitySet, UserLocks};
use crate::engine::reconciler::ExpiryReconciler;
use crate::engine::Collaborators;
use crate::error::{ModError, ModResult};
use crate::events::{ChannelKind, ChatEvent, CommandKind, HistoryEntry, Verdict, VerdictLevel, AUTOMOD};
use crate::notify::{NotificationSink, Notifier};
use crate::state::board::{UiSink, ViolatorBoard};
use crate::state::records::{user_key, RecordStore};

const HOUSEKEEPING_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub processed:     u64,
    pub flagged:       u64,
    pub tracked_users: usize,
    pub active_bans:   usize,
}

pub struct ModerationSession {
    settings:    Settings,
    detector:    Arc<AnomalyDetector>,
    engine:      Arc<EscalationEngine>,
    reconciler:  Arc<ExpiryReconciler>,
    deps:        Collaborators,
    timers:      Mutex<JoinSet<()>>,
    enforcement: Mutex<JoinSet<()>>,
    processed:   AtomicU64,
    flagged:     AtomicU64,
}

impl ModerationSession {
    pub fn new(
        settings:  Settings,
        store:     Arc<dyn RecordStore>,
        directory: Arc<dyn UserDirectory>,
        sink:      Arc<dyn NotificationSink>,
        ui:        Arc<dyn UiSink>,
    ) -> Arc<Self> {
        let spacing = Duration::from_millis(settings.notify.spacing_ms);
        let deps = Collaborators {
            store,
            directory,
            notifier:  Arc::new(Notifier::new(sink, spacing)),
            board:     Arc::new(ViolatorBoard::new(settings.escalation.violator_board_cap, ui)),
            immunity:  ImmunitySet::new(),
            locks:     UserLocks::new(),
        };
        let detector = Arc::new(AnomalyDetector::new(settings.detector.clone()));
        let engine = EscalationEngine::new(
            settings.escalation.clone(),
            settings.messages.clone(),
            deps.clone(),
        );
        let reconciler = ExpiryReconciler::new(
            settings.reconciler.clone(),
            settings.messages.clone(),
            deps.clone(),
        );

        Arc::new(Self {
            settings,
            detector,
            engine,
            reconciler,
            deps,
            timers:      Mutex::new(JoinSet::new()),
            enforcement: Mutex::new(JoinSet::new()),
            processed:   AtomicU64::new(0),
            flagged:     AtomicU64::new(0),
        })
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn engine(&self) -> &EscalationEngine {
        &self.engine
    }

    pub fn reconciler(&self) -> &ExpiryReconciler {
        &self.reconciler
    }

    pub fn immunity(&self) -> &ImmunitySet {
        &self.deps.immunity
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Spawn the periodic sweeps and housekeeping.
    pub fn start(self: &Arc<Self>) {
        let mut timers = self.timers.lock();
        timers.spawn(Arc::clone(&self.reconciler).ban_sweep_loop());
        timers.spawn(Arc::clone(&self.reconciler).warn_sweep_loop());
        timers.spawn(Arc::clone(self).housekeeping_loop());
        info!(
            ban_sweep_secs = self.settings.reconciler.ban_sweep_secs,
            warn_sweep_secs = self.settings.reconciler.warn_sweep_secs,
            "Moderation session started"
        );
    }

    async fn housekeeping_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(HOUSEKEEPING_SECS)).await;
            let evicted = self.detector.expire_idle(Utc::now());
            self.deps.locks.prune();
            debug!(evicted, users = self.detector.n_users(), "Housekeeping");
        }
    }

    pub fn timers_running(&self) -> usize {
        self.timers.lock().len()
    }

    /// Wait for every in-flight enforcement task.
    pub async fn drain(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.enforcement.lock());
            if pending.is_empty() {
                return;
            }
            while let Some(res) = pending.join_next().await {
                log_task_exit(res);
            }
        }
    }

    /// Finish in-flight enforcement, then cancel every timer as a unit.
    pub async fn shutdown(&self) {
        self.drain().await;
        let mut timers = std::mem::take(&mut *self.timers.lock());
        timers.shutdown().await;
        info!(processed = self.processed.load(Ordering::Relaxed), "Moderation session stopped");
    }

    fn reap(&self) {
        let mut set = self.enforcement.lock();
        while let Some(res) = set.try_join_next() {
            log_task_exit(res);
        }
    }

    pub fn stats(&self) -> SessionStats {
        let active_bans = self
            .deps
            .store
            .get_all()
            .map(|all| all.values().filter(|r| r.is_banned()).count())
            .unwrap_or(0);
        SessionStats {
            processed:     self.processed.load(Ordering::Relaxed),
            flagged:       self.flagged.load(Ordering::Relaxed),
            tracked_users: self.detector.n_users(),
            active_bans,
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Consume events until the channel closes, then drain enforcement.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ChatEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        self.drain().await;
    }

    pub async fn handle(self: &Arc<Self>, event: ChatEvent) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        debug!(user = event.username(), "Chat event");
        match event {
            ChatEvent::Message { username, channel, text, timestamp } => {
                let at = timestamp.unwrap_or_else(Utc::now);
                self.on_message(&username, channel, &text, at).await;
            }
            ChatEvent::Joined { username } => {
                let session = Arc::clone(self);
                self.enforcement.lock().spawn(async move {
                    if let Err(e) = session.reconciler.on_rejoin(&username).await {
                        warn!(user = %username, "Rejoin reset failed: {}", e);
                    }
                });
            }
            ChatEvent::Command { executor, action, target, reason } => {
                let session = Arc::clone(self);
                self.enforcement.lock().spawn(async move {
                    let reason = reason.unwrap_or_else(|| PLACEHOLDER_REASON.to_string());
                    let _ = session.execute(&executor, action, &target, &reason).await;
                });
            }
        }
        self.reap();
    }

    /// Whether a chat message from `username` should reach the detector.
    async fn should_inspect(&self, username: &str, channel: ChannelKind) -> bool {
        if channel != ChannelKind::Clan {
            return false;
        }
        if user_key(username) == user_key(&self.settings.escalation.bot_name) {
            return false;
        }
        if self.deps.immunity.contains(username) {
            return false;
        }
        match self.deps.directory.get_user(username).await {
            Ok(Some(user)) => !user.is_exempt(),
            Ok(None) => false,
            Err(e) => {
                warn!(user = %username, "Directory lookup failed, message skipped: {}", e);
                false
            }
        }
    }

    async fn on_message(self: &Arc<Self>, username: &str, channel: ChannelKind, text: &str, at: DateTime<Utc>) {
        if !self.should_inspect(username, channel).await {
            return;
        }
        // the lookup above yields; a ban may have started meanwhile
        if self.deps.immunity.contains(username) {
            return;
        }

        let verdict = self.detector.add_message_at(username, text, at);
        if !verdict.is_flagged() {
            return;
        }
        self.flagged.fetch_add(1, Ordering::Relaxed);
        info!(user = %username, level = %verdict.level, violations = verdict.violations,
              "Spam detected: {}", verdict.reason);

        let guard = self.deps.immunity.enter(username);
        let session = Arc::clone(self);
        let username = username.to_string();
        self.enforcement.lock().spawn(async move {
            session.enforce(&username, &verdict, guard).await;
        });
    }

    async fn enforce(&self, username: &str, verdict: &Verdict, _guard: ImmunityGuard) {
        let reason = render(&self.settings.messages.spam_warn_reason, &[("reason", verdict.reason.as_str())]);
        let banned = match verdict.level {
            VerdictLevel::Ok => return,
            VerdictLevel::Warn => match self.engine.apply_warn(username, AUTOMOD, &reason).await {
                Ok(out) => out.escalated.is_some(),
                Err(e) => {
                    debug!(user = %username, "Auto warn not applied: {}", e);
                    false
                }
            },
            VerdictLevel::Kick => match self.engine.apply_ban(username, AUTOMOD, &reason).await {
                Ok(_) => true,
                Err(e) => {
                    debug!(user = %username, "Auto ban not applied: {}", e);
                    false
                }
            },
        };
        if banned {
            self.detector.forget(username);
        }
    }

    // ── Command gate ──────────────────────────────────────────────────────────

    /// Run one moderator command; rejections are answered privately.
    pub async fn execute(&self, executor: &str, action: CommandKind, target: &str, reason: &str) -> ModResult<()> {
        match action {
            CommandKind::Warn => self.warn(executor, target, reason).await,
            CommandKind::Ban => self.ban(executor, target, reason).await,
            CommandKind::Unban => self.unban(executor, target).await,
            CommandKind::Unwarn => self.unwarn(executor, target).await,
            CommandKind::History => self.history(executor, target).await.map(|_| ()),
        }
    }

    pub async fn warn(&self, executor: &str, target: &str, reason: &str) -> ModResult<()> {
        let result = self.warn_inner(executor, target, reason).await;
        self.answer(executor, target, result).await
    }

    pub async fn ban(&self, executor: &str, target: &str, reason: &str) -> ModResult<()> {
        let result = self.ban_inner(executor, target, reason).await;
        self.answer(executor, target, result).await
    }

    pub async fn unban(&self, executor: &str, target: &str) -> ModResult<()> {
        let result = self.unban_inner(executor, target).await;
        self.answer(executor, target, result).await
    }

    pub async fn unwarn(&self, executor: &str, target: &str) -> ModResult<()> {
        let result = self.unwarn_inner(executor, target).await;
        self.answer(executor, target, result).await
    }

    /// Send the target's history to the executor as one private message.
    pub async fn history(&self, executor: &str, target: &str) -> ModResult<Vec<HistoryEntry>> {
        let result = self.history_inner(executor, target).await;
        match result {
            Ok(entries) => {
                let lines = self.render_history(target, &entries);
                self.deps.notifier.send(ChannelKind::Private, lines, Some(executor)).await;
                Ok(entries)
            }
            Err(e) => {
                self.reject(executor, target, &e).await;
                Err(e)
            }
        }
    }

    async fn warn_inner(&self, executor: &str, target: &str, reason: &str) -> ModResult<()> {
        self.authorize(executor, PERM_WARN).await?;
        let Some(user) = self.resolve_target(executor, target).await? else { return Ok(()) };
        self.engine.apply_warn(&user.username, executor, reason).await?;
        Ok(())
    }

    async fn ban_inner(&self, executor: &str, target: &str, reason: &str) -> ModResult<()> {
        self.authorize(executor, PERM_BAN).await?;
        let Some(user) = self.resolve_target(executor, target).await? else { return Ok(()) };
        self.engine.apply_ban(&user.username, executor, reason).await?;
        self.detector.forget(&user.username);
        Ok(())
    }

    async fn unban_inner(&self, executor: &str, target: &str) -> ModResult<()> {
        self.authorize(executor, PERM_BAN).await?;
        self.engine.unban(target, executor).await
    }

    async fn unwarn_inner(&self, executor: &str, target: &str) -> ModResult<()> {
        self.authorize(executor, PERM_WARN).await?;
        self.engine.unwarn(target, executor).await
    }

    async fn history_inner(&self, executor: &str, target: &str) -> ModResult<Vec<HistoryEntry>> {
        self.authorize(executor, PERM_WARN).await?;
        Ok(self.engine.history(target))
    }

    async fn authorize(&self, executor: &str, perm: &'static str) -> ModResult<DirectoryUser> {
        let user = self
            .deps
            .directory
            .get_user(executor)
            .await?
            .ok_or_else(|| ModError::UnknownUser(executor.to_string()))?;
        if !user.can(perm) {
            return Err(ModError::Forbidden(executor.to_string(), perm));
        }
        Ok(user)
    }

    /// Target checks for punishing commands. `None` means silently ignored.
    async fn resolve_target(&self, executor: &str, target: &str) -> ModResult<Option<DirectoryUser>> {
        if self.deps.immunity.contains(target) {
            debug!(user = %target, "Target under enforcement, command ignored");
            return Ok(None);
        }
        let key = user_key(target);
        if key == user_key(executor) {
            return Err(ModError::SelfTarget);
        }
        if key == user_key(&self.settings.escalation.bot_name) {
            return Err(ModError::BotTarget);
        }
        let user = self
            .deps
            .directory
            .get_user(target)
            .await?
            .ok_or_else(|| ModError::UnknownUser(target.to_string()))?;
        if user.has_permission(PERM_IMMUNE) {
            return Err(ModError::ImmuneTarget(target.to_string()));
        }
        Ok(Some(user))
    }

    async fn answer(&self, executor: &str, target: &str, result: ModResult<()>) -> ModResult<()> {
        if let Err(e) = &result {
            self.reject(executor, target, e).await;
        }
        result
    }

    async fn reject(&self, executor: &str, target: &str, err: &ModError) {
        let m = &self.settings.messages;
        let template = match err {
            ModError::SelfTarget => &m.fail_self,
            ModError::BotTarget => &m.fail_bot,
            ModError::ImmuneTarget(_) => &m.fail_immune,
            ModError::NotBanned(_) => &m.fail_not_banned,
            ModError::AlreadyBanned(_) => &m.fail_already_banned,
            ModError::NoActiveWarnings(_) => &m.fail_no_warns,
            ModError::UnknownUser(_) => &m.fail_unknown_user,
            ModError::Forbidden(..) => &m.fail_forbidden,
            ModError::Directory(e) => {
                error!(executor = %executor, user = %target, "Command failed: {}", e);
                return;
            }
        };
        debug!(executor = %executor, user = %target, "Command rejected: {}", err);
        let text = render(template, &[("target", target)]);
        self.deps.notifier.reply(ChannelKind::Private, text, executor).await;
    }

    fn render_history(&self, target: &str, entries: &[HistoryEntry]) -> Vec<String> {
        let m = &self.settings.messages;
        if entries.is_empty() {
            return vec![render(&m.history_empty, &[("target", target)])];
        }
        let mut lines = vec![render(&m.history_header, &[("target", target)])];
        for e in entries {
            let date = e.date.format("%d.%m.%Y %H:%M").to_string();
            let kind = e.kind.to_string();
            lines.push(render(&m.history_line, &[
                ("date",      date.as_str()),
                ("kind",      kind.as_str()),
                ("moderator", e.moderator.as_str()),
                ("reason",    e.reason.as_str()),
            ]));
        }
        lines
    }
}

fn log_task_exit(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!("Enforcement task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::directory::MemoryDirectory;
    use crate::events::{BanInfo, HistoryKind, PlayerRecord};
    use crate::notify::MemorySink;
    use crate::state::board::MemoryUiSink;
    use crate::state::records::MemoryRecordStore;

    struct Harness {
        session: Arc<ModerationSession>,
        dir:     Arc<MemoryDirectory>,
        store:   Arc<MemoryRecordStore>,
        sink:    Arc<MemorySink>,
    }

    fn harness() -> Harness {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add("steve");
        dir.add("alex");
        dir.insert(DirectoryUser { is_owner: true, ..DirectoryUser::new("boss") });
        let mut moderator = DirectoryUser { is_moderator: true, ..DirectoryUser::new("mod") };
        moderator.permissions.insert(PERM_WARN.to_string());
        dir.insert(moderator);
        let mut vip = DirectoryUser::new("vip");
        vip.permissions.insert(PERM_IMMUNE.to_string());
        dir.insert(vip);

        let store = Arc::new(MemoryRecordStore::new());
        let sink = Arc::new(MemorySink::default());
        let session = ModerationSession::new(
            Settings::default(),
            store.clone(),
            dir.clone(),
            sink.clone(),
            Arc::new(MemoryUiSink::default()),
        );
        Harness { session, dir, store, sink }
    }

    fn msg(user: &str, text: &str, at: DateTime<Utc>) -> ChatEvent {
        ChatEvent::Message {
            username:  user.into(),
            channel:   ChannelKind::Clan,
            text:      text.into(),
            timestamp: Some(at),
        }
    }

    async fn spam(h: &Harness, user: &str, t0: DateTime<Utc>, from: i64, to: i64) {
        for i in from..to {
            h.session.handle(msg(user, "aaaa", t0 + ChronoDuration::seconds(i))).await;
            h.session.drain().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_spam_is_warned_by_automod() {
        let h = harness();
        spam(&h, "steve", Utc::now(), 0, 5).await;

        let rec = h.session.engine().record("steve");
        assert_eq!(rec.warn_count, 1);
        assert_eq!(rec.history[0].moderator, AUTOMOD);
        let clan = h.sink.on_channel(ChannelKind::Clan);
        assert_eq!(clan.len(), 1);
        assert_eq!(clan[0].lines[0], "AutoMod warned steve: Spam (identical (5/5) in short window) (1/3)");
        assert!(h.session.immunity().is_empty());
        assert_eq!(h.session.stats().flagged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_verdict_bans_and_resets_detector_state() {
        let h = harness();
        spam(&h, "steve", Utc::now(), 0, 7).await;

        let rec = h.session.engine().record("steve");
        let ban = rec.ban.expect("banned");
        assert_eq!(ban.moderator, AUTOMOD);
        assert!(ban.expiry.is_some());
        assert_eq!(rec.warn_count, 0);
        let kinds: Vec<_> = rec.history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![HistoryKind::Warn, HistoryKind::Warn, HistoryKind::Ban]);

        assert_eq!(h.sink.on_channel(ChannelKind::Command).len(), 1);
        assert_eq!(h.session.detector().window_len("steve"), 0);
        assert!(h.session.immunity().is_empty());
        assert_eq!(h.session.stats().active_bans, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_gate_skips_exempt_unknown_and_other_channels() {
        let h = harness();
        let t0 = Utc::now();
        for user in ["boss", "mod", "vip", "ghost", "Clanwarden"] {
            spam(&h, user, t0, 0, 7).await;
        }
        for i in 0..7 {
            let ev = ChatEvent::Message {
                username:  "steve".into(),
                channel:   ChannelKind::Global,
                text:      "aaaa".into(),
                timestamp: Some(t0 + ChronoDuration::seconds(i)),
            };
            h.session.handle(ev).await;
        }
        h.session.drain().await;

        assert!(h.sink.notices().is_empty());
        assert_eq!(h.session.detector().n_users(), 0);
        assert_eq!(h.session.stats().processed, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_from_immune_users_are_not_inspected() {
        let h = harness();
        let _guard = h.session.deps.immunity.enter("steve");
        spam(&h, "steve", Utc::now(), 0, 7).await;
        assert_eq!(h.session.detector().window_len("steve"), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn command_gate_rejections_reply_privately() {
        let h = harness();

        let err = h.session.warn("steve", "alex", "x").await.unwrap_err();
        assert_eq!(err, ModError::Forbidden("steve".into(), PERM_WARN));
        assert_eq!(h.session.warn("mod", "MOD", "x").await.unwrap_err(), ModError::SelfTarget);
        assert_eq!(h.session.warn("mod", "clanwarden", "x").await.unwrap_err(), ModError::BotTarget);
        assert_eq!(h.session.warn("mod", "vip", "x").await.unwrap_err(), ModError::ImmuneTarget("vip".into()));
        assert_eq!(h.session.warn("mod", "ghost", "x").await.unwrap_err(), ModError::UnknownUser("ghost".into()));
        // moderators hold warn but not ban
        assert_eq!(h.session.ban("mod", "alex", "x").await.unwrap_err(), ModError::Forbidden("mod".into(), PERM_BAN));

        let replies = h.sink.on_channel(ChannelKind::Private);
        assert_eq!(replies.len(), 6);
        assert_eq!(replies[0].target.as_deref(), Some("steve"));
        assert_eq!(replies[0].lines[0], "You do not have permission to do that.");
        assert_eq!(replies[3].lines[0], "vip is immune to moderation.");
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn target_under_enforcement_is_silently_ignored() {
        let h = harness();
        let _guard = h.session.deps.immunity.enter("alex");
        h.session.ban("boss", "alex", "x").await.unwrap();
        assert!(h.sink.notices().is_empty());
        assert!(!h.session.engine().record("alex").is_banned());
    }

    #[tokio::test(start_paused = true)]
    async fn owner_commands_round_trip_and_history_reply() {
        let h = harness();
        h.session.warn("boss", "alex", "rude").await.unwrap();
        h.session.ban("boss", "alex", "").await.unwrap();
        assert_eq!(
            h.session.ban("boss", "alex", "again").await.unwrap_err(),
            ModError::AlreadyBanned("alex".into())
        );

        let entries = h.session.history("boss", "alex").await.unwrap();
        assert_eq!(entries.len(), 2);
        let replies = h.sink.on_channel(ChannelKind::Private);
        let history = replies.last().unwrap();
        assert_eq!(history.lines.len(), 3);
        assert_eq!(history.lines[0], "Punishment history for alex:");
        assert!(history.lines[1].contains("WARN: by boss. Reason: rude"));
        assert!(history.lines[2].contains("BAN: by boss. Reason: Unspecified"));

        h.session.unban("boss", "alex").await.unwrap();
        assert!(!h.dir.user("alex").unwrap().is_blacklisted);
        assert_eq!(
            h.session.unwarn("boss", "alex").await.unwrap_err(),
            ModError::NoActiveWarnings("alex".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_history_gets_a_notice() {
        let h = harness();
        assert!(h.session.history("mod", "steve").await.unwrap().is_empty());
        let reply = h.sink.on_channel(ChannelKind::Private).pop().unwrap();
        assert_eq!(reply.lines, vec!["steve has no punishment history.".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_event_resets_temporary_ban() {
        let h = harness();
        let record = PlayerRecord {
            ban: Some(BanInfo {
                expiry:    Some(Utc::now() + ChronoDuration::minutes(30)),
                reason:    "spam".into(),
                moderator: AUTOMOD.into(),
            }),
            ..Default::default()
        };
        h.store.set("alex", record).unwrap();
        h.dir.set_blacklist("alex", true).await.unwrap();

        h.session.handle(ChatEvent::Joined { username: "Alex".into() }).await;
        h.session.drain().await;

        assert!(!h.session.engine().record("alex").is_banned());
        assert!(!h.dir.user("alex").unwrap().is_blacklisted);
    }

    #[tokio::test(start_paused = true)]
    async fn command_events_flow_through_the_gate() {
        let h = harness();
        h.session
            .handle(ChatEvent::Command {
                executor: "boss".into(),
                action:   CommandKind::Warn,
                target:   "steve".into(),
                reason:   Some("caps".into()),
            })
            .await;
        h.session.drain().await;
        assert_eq!(h.session.engine().record("steve").warn_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_consumes_until_close_and_shutdown_stops_timers() {
        let h = harness();
        h.session.start();
        assert_eq!(h.session.timers_running(), 3);

        let (tx, rx) = mpsc::channel(16);
        let runner = tokio::spawn(Arc::clone(&h.session).run(rx));
        let t0 = Utc::now();
        for i in 0..5 {
            tx.send(msg("steve", "aaaa", t0 + ChronoDuration::seconds(i))).await.unwrap();
        }
        drop(tx);
        runner.await.unwrap();
        assert_eq!(h.session.engine().record("steve").warn_count, 1);

        h.session.shutdown().await;
        assert_eq!(h.session.timers_running(), 0);
    }
}
