// clanwarden/src/notify/mod.rs
//
// Outbound notifications.
//
// NotificationSink is the transport seam (chat API in production, JSONL file
// in tail/replay mode). Notifier wraps it with announcement throttling:
// clan-channel sends are spaced at least `spacing` apart; every other
// channel goes straight through.

pub mod throttle;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::events::{ChannelKind, OutboundNotice};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: ChannelKind, lines: &[String], target: Option<&str>) -> anyhow::Result<()>;
}

pub use throttle::Notifier;

// ── JSONL sink ────────────────────────────────────────────────────────────────

/// Appends every notice to `<dir>/outbound.jsonl`.
pub struct JsonlSink {
    out: PathBuf,
}

impl JsonlSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out })
    }
}

#[async_trait]
impl NotificationSink for JsonlSink {
    async fn send(&self, channel: ChannelKind, lines: &[String], target: Option<&str>) -> anyhow::Result<()> {
        let notice = OutboundNotice {
            channel,
            lines:     lines.to_vec(),
            target:    target.map(str::to_string),
            timestamp: Utc::now(),
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out.join("outbound.jsonl"))
            .await?;
        f.write_all((notice.to_jsonl() + "\n").as_bytes()).await?;
        Ok(())
    }
}

// ── In-memory sink ────────────────────────────────────────────────────────────

/// Records every notice with the tokio clock time it was sent at.
#[derive(Default)]
pub struct MemorySink {
    pub sent: parking_lot::Mutex<Vec<(tokio::time::Instant, OutboundNotice)>>,
}

impl MemorySink {
    pub fn notices(&self) -> Vec<OutboundNotice> {
        self.sent.lock().iter().map(|(_, n)| n.clone()).collect()
    }

    pub fn on_channel(&self, channel: ChannelKind) -> Vec<OutboundNotice> {
        self.notices().into_iter().filter(|n| n.channel == channel).collect()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn send(&self, channel: ChannelKind, lines: &[String], target: Option<&str>) -> anyhow::Result<()> {
        let notice = OutboundNotice {
            channel,
            lines:     lines.to_vec(),
            target:    target.map(str::to_string),
            timestamp: Utc::now(),
        };
        self.sent.lock().push((tokio::time::Instant::now(), notice));
        Ok(())
    }
}
