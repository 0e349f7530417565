// clanwarden/src/events.rs
//
// Shared event types and all domain types flowing through Clanwarden.
// Inbound chat events are deserialized from JSONL (tail/replay modes);
// PlayerRecord is the persisted per-user moderation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Moderator name used for every automatic action.
pub const AUTOMOD: &str = "AutoMod";

// ── Inbound events ────────────────────────────────────────────────────────────

/// Chat channel an event arrived on or a notice is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Clan,    // announcement channel, throttled
    Private, // direct reply to one user
    Global,
    Command, // raw server command (kick)
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clan => write!(f, "clan"),
            Self::Private => write!(f, "private"),
            Self::Global => write!(f, "global"),
            Self::Command => write!(f, "command"),
        }
    }
}

/// One event from the chat source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    Message {
        username: String,
        channel: ChannelKind,
        text: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Joined {
        username: String,
    },
    /// Moderator command, already parsed by the chat front end.
    Command {
        executor: String,
        action: CommandKind,
        target: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ChatEvent {
    pub fn username(&self) -> &str {
        match self {
            Self::Message { username, .. } | Self::Joined { username } => username,
            Self::Command { executor, .. } => executor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Warn,
    Ban,
    Unban,
    Unwarn,
    History,
}

/// A chat line retained in a user's sliding window.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

// ── Detector output ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLevel {
    Ok,
    Warn,
    Kick,
}

impl std::fmt::Display for VerdictLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Kick => write!(f, "KICK"),
        }
    }
}

/// Which heuristic produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Link,
    Identical,
    Trivial,
    Similar,
    Flood,
    Gibberish,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Identical => write!(f, "identical"),
            Self::Trivial => write!(f, "trivial"),
            Self::Similar => write!(f, "similar"),
            Self::Flood => write!(f, "flood"),
            Self::Gibberish => write!(f, "gibberish"),
        }
    }
}

/// A single heuristic hit, before the violation counter grades it.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub signal: Signal,
    pub reason: String,
}

/// Per-message classification returned by the detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub level: VerdictLevel,
    pub reason: String,
    pub signal: Option<Signal>,
    pub violations: u32, // running violation count for the user
}

impl Verdict {
    pub fn is_flagged(&self) -> bool {
        self.level != VerdictLevel::Ok
    }
}

// ── Persisted player state ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Warn,
    Ban,
}

impl std::fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "WARN"),
            Self::Ban => write!(f, "BAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub moderator: String,
    pub reason: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanInfo {
    pub expiry: Option<DateTime<Utc>>, // None = permanent until unban
    pub reason: String,
    pub moderator: String,
}

impl BanInfo {
    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|e| e <= now).unwrap_or(false)
    }
}

/// Durable moderation state for one user.
///
/// The zero value (no warnings, no ban, empty history) is what a lookup
/// returns for a user that was never recorded. A present `ban` implies
/// `warn_count == 0`; `history` is append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerRecord {
    pub warn_count: u32,
    pub warn_timestamp: Option<DateTime<Utc>>,
    pub ban: Option<BanInfo>,
    pub history: Vec<HistoryEntry>,
}

impl PlayerRecord {
    pub fn push_history(&mut self, kind: HistoryKind, moderator: &str, reason: &str, date: DateTime<Utc>) {
        self.history.push(HistoryEntry {
            kind,
            moderator: moderator.to_string(),
            reason: reason.to_string(),
            date,
        });
    }

    pub fn clear_warnings(&mut self) {
        self.warn_count = 0;
        self.warn_timestamp = None;
    }

    pub fn is_banned(&self) -> bool {
        self.ban.is_some()
    }
}

// ── UI snapshot ───────────────────────────────────────────────────────────────

/// Violation column of the violator table: a warn count or "BAN".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolatorCount {
    Warns(u32),
    Banned,
}

impl Serialize for ViolatorCount {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Warns(n) => s.serialize_u32(*n),
            Self::Banned => s.serialize_str("BAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolatorRow {
    pub id: String,
    pub username: String,
    pub count: ViolatorCount,
    pub last_reason: String,
    pub date: DateTime<Utc>,
}

/// Outbound notice as written by the JSONL sink.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundNotice {
    pub channel: ChannelKind,
    pub lines: Vec<String>,
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundNotice {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
