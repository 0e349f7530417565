pub mod escalation;
pub mod immunity;
pub mod reconciler;

use std::sync::Arc;

use tracing::error;

use crate::directory::UserDirectory;
use crate::events::PlayerRecord;
use crate::notify::Notifier;
use crate::state::board::ViolatorBoard;
use crate::state::records::RecordStore;
use immunity::{ImmunitySet, UserLocks};

/// Handles shared by the escalation engine and the expiry reconciler.
/// Both mutate PlayerRecords, always under the same per-user lock.
#[derive(Clone)]
pub struct Collaborators {
    pub store:     Arc<dyn RecordStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub notifier:  Arc<Notifier>,
    pub board:     Arc<ViolatorBoard>,
    pub immunity:  Arc<ImmunitySet>,
    pub locks:     Arc<UserLocks>,
}

impl Collaborators {
    /// Record for `username`, or the zero value if absent or unreadable.
    pub fn load(&self, username: &str) -> PlayerRecord {
        self.store.load(username).unwrap_or_else(|e| {
            error!(user = %username, "Loading player record failed: {}", e);
            PlayerRecord::default()
        })
    }

    /// Best-effort write; a failure is logged and never propagated.
    pub fn persist(&self, username: &str, record: PlayerRecord) {
        if let Err(e) = self.store.set(username, record) {
            error!(user = %username, "Persisting player record failed: {}", e);
        }
    }
}
