// clanwarden/src/config.rs
//
// Runtime settings. Loaded from an optional TOML file; every key has a
// default so an empty file (or no file) yields a working configuration.
//
//   [detector]     sliding windows, content thresholds, violation grading
//   [escalation]   warn→ban promotion, auto-ban length, kick command
//   [reconciler]   sweep cadence and warning reset horizon
//   [notify]       announcement spacing
//   [messages]     outbound templates, {placeholder} substitution
//
// Durations that feed calendar arithmetic are clamped on load so no
// configured value can overflow a timestamp.

use std::fmt::Display;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound for window and violation-reset lengths (one week).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 3600;
/// Upper bound for ban and warning-reset lengths (ten years).
pub const MAX_PERIOD_MINUTES: i64 = 10 * 365 * 24 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector:   DetectorConfig,
    pub escalation: EscalationConfig,
    pub reconciler: ReconcilerConfig,
    pub notify:     NotifyConfig,
    pub messages:   Messages,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut settings: Self = toml::from_str(raw)?;
        settings.clamp_periods();
        settings.detector.windows.sort_by_key(|w| w.duration_secs);
        Ok(settings)
    }

    fn clamp_periods(&mut self) {
        for w in &mut self.detector.windows {
            clamp_logged(&format!("detector.windows.{}", w.name), &mut w.duration_secs, 1, MAX_WINDOW_SECS);
        }
        clamp_logged("detector.violation_reset_secs", &mut self.detector.violation_reset_secs, 1, MAX_WINDOW_SECS);
        clamp_logged("escalation.auto_ban_minutes", &mut self.escalation.auto_ban_minutes, 1, MAX_PERIOD_MINUTES);
        clamp_logged("reconciler.warn_reset_minutes", &mut self.reconciler.warn_reset_minutes, 1, MAX_PERIOD_MINUTES);
    }
}

fn clamp_logged<T: PartialOrd + Copy + Display>(key: &str, value: &mut T, min: T, max: T) {
    let clamped = if *value < min {
        min
    } else if *value > max {
        max
    } else {
        *value
    };
    if clamped != *value {
        warn!(key, from = %*value, to = %clamped, "Config value out of range, clamped");
        *value = clamped;
    }
}

// ── Detector ──────────────────────────────────────────────────────────────────

/// A flood-rate window: at most `limit` messages per `duration_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub name:          String,
    pub duration_secs: u64,
    pub limit:         u32,
}

impl WindowSpec {
    pub fn new(name: &str, duration_secs: u64, limit: u32) -> Self {
        Self { name: name.to_string(), duration_secs, limit }
    }

    pub fn allowed_rate(&self) -> f64 {
        self.limit as f64 / self.duration_secs.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub windows:                        Vec<WindowSpec>,
    pub min_messages_for_rate_check:    usize,
    pub min_messages_for_content_check: usize,
    pub identical_threshold:            usize,
    pub trivial_threshold:              usize,
    pub similar_pairs_threshold:        usize,
    pub similar_pairs_ratio:            f64,   // dynamic floor: count * ratio
    pub rate_multiplier_content:        f64,
    pub rate_multiplier_flood:          f64,
    pub flood_fill_ratio:               f64,   // count must exceed limit * ratio
    pub link_protection:                bool,
    pub gibberish_max_consonants:       Option<usize>,
    pub violation_warn_threshold:       u32,
    pub violation_kick_threshold:       u32,
    pub violation_reset_secs:           u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            windows: vec![
                WindowSpec::new("short", 8, 6),
                WindowSpec::new("medium", 20, 10),
                WindowSpec::new("long", 60, 25),
            ],
            min_messages_for_rate_check:    4,
            min_messages_for_content_check: 5,
            identical_threshold:            5,
            trivial_threshold:              4,
            similar_pairs_threshold:        4,
            similar_pairs_ratio:            0.3,
            rate_multiplier_content:        1.0,
            rate_multiplier_flood:          1.8,
            flood_fill_ratio:               0.7,
            link_protection:                true,
            gibberish_max_consonants:       None,
            violation_warn_threshold:       1,
            violation_kick_threshold:       3,
            violation_reset_secs:           300,
        }
    }
}

impl DetectorConfig {
    /// Longest configured window; the retention horizon of every user window.
    pub fn max_window_secs(&self) -> u64 {
        self.windows.iter().map(|w| w.duration_secs).max().unwrap_or(0)
    }
}

// ── Escalation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub warns_to_ban:       u32,
    pub auto_ban_minutes:   i64,
    pub kick_delay_ms:      u64,
    pub kick_command:       String,
    pub bot_name:           String,
    pub violator_board_cap: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            warns_to_ban:       3,
            auto_ban_minutes:   60,
            kick_delay_ms:      300,
            kick_command:       "/c kick {target}".to_string(),
            bot_name:           "Clanwarden".to_string(),
            violator_board_cap: 50,
        }
    }
}

impl EscalationConfig {
    pub fn kick_delay(&self) -> Duration {
        Duration::from_millis(self.kick_delay_ms)
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub ban_sweep_secs:     u64,
    pub warn_sweep_secs:    u64,
    pub warn_reset_minutes: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ban_sweep_secs:     60,
            warn_sweep_secs:    300,
            warn_reset_minutes: 1440,
        }
    }
}

// ── Notify ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub spacing_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { spacing_ms: 300 }
    }
}

// ── Message templates ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub warn_success:        String,
    pub warn_success_auto:   String,
    pub ban_success:         String,
    pub ban_success_auto:    String,
    pub ban_by_warns_reason: String,
    pub spam_warn_reason:    String,
    pub unban_success:       String,
    pub unwarn_success:      String,
    pub warn_reset_auto:     String,
    pub fail_self:           String,
    pub fail_bot:            String,
    pub fail_immune:         String,
    pub fail_not_banned:     String,
    pub fail_already_banned: String,
    pub fail_no_warns:       String,
    pub fail_unknown_user:   String,
    pub fail_forbidden:      String,
    pub history_header:      String,
    pub history_line:        String,
    pub history_empty:       String,
    pub unspecified_reason:  String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            warn_success:        "{moderator} warned {target}: {reason} ({count}/{limit})".into(),
            warn_success_auto:   "AutoMod warned {target}: {reason} ({count}/{limit})".into(),
            ban_success:         "{moderator} banned {target}. Reason: {reason}".into(),
            ban_success_auto:    "{target} is banned for {duration}. Reason: {reason}".into(),
            ban_by_warns_reason: "Warning limit reached".into(),
            spam_warn_reason:    "Spam ({reason})".into(),
            unban_success:       "{moderator} unbanned {target}".into(),
            unwarn_success:      "{moderator} cleared the warnings of {target}".into(),
            warn_reset_auto:     "Warnings of {target} expired and were reset".into(),
            fail_self:           "You cannot punish yourself.".into(),
            fail_bot:            "You cannot punish the bot.".into(),
            fail_immune:         "{target} is immune to moderation.".into(),
            fail_not_banned:     "{target} is not banned.".into(),
            fail_already_banned: "{target} is already banned.".into(),
            fail_no_warns:       "{target} has no active warnings.".into(),
            fail_unknown_user:   "Player {target} was not found.".into(),
            fail_forbidden:      "You do not have permission to do that.".into(),
            history_header:      "Punishment history for {target}:".into(),
            history_line:        "{date} - {kind}: by {moderator}. Reason: {reason}".into(),
            history_empty:       "{target} has no punishment history.".into(),
            unspecified_reason:  "Unspecified".into(),
        }
    }
}

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is a valid regex"))
}

/// Substitute every `{key}` in `template` with its value in a single pass.
/// Substituted text is never rescanned; unknown keys are left as written.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(k, _)| *k == &caps[1])
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
