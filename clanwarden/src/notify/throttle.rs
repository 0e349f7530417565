// clanwarden/src/notify/throttle.rs
//
// Announcement throttle. One shared "next free slot" instant: each clan send
// reserves the earliest slot ≥ now and ≥ previous slot + spacing, releases
// the lock, then sleeps until its slot. Effective send times are strictly
// serialized and no lock is held across the sleep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use super::NotificationSink;
use crate::events::ChannelKind;

pub struct Notifier {
    sink:      Arc<dyn NotificationSink>,
    spacing:   Duration,
    last_slot: Mutex<Option<Instant>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, spacing: Duration) -> Self {
        Self { sink, spacing, last_slot: Mutex::new(None) }
    }

    fn reserve_slot(&self) -> Instant {
        let now = Instant::now();
        let mut last = self.last_slot.lock();
        let slot = match *last {
            Some(prev) if prev + self.spacing > now => prev + self.spacing,
            _ => now,
        };
        *last = Some(slot);
        slot
    }

    /// Send one or more lines. Clan sends are throttled; failures are logged.
    pub async fn send(&self, channel: ChannelKind, lines: Vec<String>, target: Option<&str>) {
        if channel == ChannelKind::Clan {
            let slot = self.reserve_slot();
            tokio::time::sleep_until(slot).await;
        }
        if let Err(e) = self.sink.send(channel, &lines, target).await {
            warn!(channel = %channel, "Notification send failed: {}", e);
        }
    }

    pub async fn announce(&self, text: String) {
        self.send(ChannelKind::Clan, vec![text], None).await;
    }

    pub async fn reply(&self, channel: ChannelKind, text: String, target: &str) {
        self.send(channel, vec![text], Some(target)).await;
    }

    pub async fn command(&self, text: String) {
        self.send(ChannelKind::Command, vec![text], None).await;
    }
}
