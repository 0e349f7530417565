// clanwarden/src/directory.rs
//
// External user directory seam: identity resolution, roles, permissions
// and the blacklist flag. The in-memory implementation backs tests and the
// tail/replay binary (seeded from a JSON file of users).

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DirectoryError;
use crate::state::records::user_key;

pub const PERM_WARN:   &str = "moderation.warn";
pub const PERM_BAN:    &str = "moderation.ban";
pub const PERM_IMMUNE: &str = "moderation.immune";

/// Snapshot of one user as the directory knows them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryUser {
    pub username:       String,
    pub is_owner:       bool,
    pub is_moderator:   bool,
    pub is_blacklisted: bool,
    pub permissions:    HashSet<String>,
}

impl DirectoryUser {
    pub fn new(username: &str) -> Self {
        Self { username: username.to_string(), ..Default::default() }
    }

    pub fn has_permission(&self, perm: &str) -> bool {
        self.permissions.contains(perm)
    }

    /// Owners implicitly hold every moderation permission.
    pub fn can(&self, perm: &str) -> bool {
        self.is_owner || self.has_permission(perm)
    }

    /// Exempt from automatic spam detection.
    pub fn is_exempt(&self) -> bool {
        self.is_owner || self.is_moderator || self.has_permission(PERM_IMMUNE)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, name: &str) -> Result<Option<DirectoryUser>, DirectoryError>;
    async fn set_blacklist(&self, name: &str, blacklisted: bool) -> Result<(), DirectoryError>;
}

// ── In-memory directory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDirectory {
    users:            DashMap<String, DirectoryUser>,
    failing_lookups:  DashMap<String, String>, // user → injected error message
    auto_register:    bool,
    pub blacklist_writes: std::sync::atomic::AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `[{"username": .., "is_owner": .., "permissions": [..]}, ...]`.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading directory {}", path.display()))?;
        let users: Vec<DirectoryUser> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing directory {}", path.display()))?;
        let dir = Self::new();
        for u in users {
            dir.insert(u);
        }
        info!(users = dir.len(), "Loaded user directory");
        Ok(dir)
    }

    /// Resolve unknown names as plain members instead of returning None.
    pub fn auto_register(mut self) -> Self {
        self.auto_register = true;
        self
    }

    pub fn insert(&self, user: DirectoryUser) {
        self.users.insert(user_key(&user.username), user);
    }

    pub fn add(&self, username: &str) {
        self.insert(DirectoryUser::new(username));
    }

    pub fn user(&self, name: &str) -> Option<DirectoryUser> {
        self.users.get(&user_key(name)).map(|u| u.clone())
    }

    pub fn fail_lookups_for(&self, name: &str, message: &str) {
        self.failing_lookups.insert(user_key(name), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_lookups.clear();
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_user(&self, name: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let key = user_key(name);
        if let Some(msg) = self.failing_lookups.get(&key) {
            return Err(DirectoryError::Lookup { user: name.to_string(), message: msg.clone() });
        }
        if self.auto_register {
            let user = self.users.entry(key).or_insert_with(|| DirectoryUser::new(name.trim()));
            return Ok(Some(user.clone()));
        }
        Ok(self.users.get(&key).map(|u| u.clone()))
    }

    async fn set_blacklist(&self, name: &str, blacklisted: bool) -> Result<(), DirectoryError> {
        let key = user_key(name);
        if let Some(msg) = self.failing_lookups.get(&key) {
            return Err(DirectoryError::Blacklist { user: name.to_string(), message: msg.clone() });
        }
        match self.users.get_mut(&key) {
            Some(mut u) => {
                u.is_blacklisted = blacklisted;
                self.blacklist_writes.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(())
            }
            None => Err(DirectoryError::Blacklist { user: name.to_string(), message: "no such user".into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_blacklist() {
        let dir = MemoryDirectory::new();
        dir.add("Alex");
        let u = dir.get_user("ALEX").await.unwrap().unwrap();
        assert!(!u.is_blacklisted);

        dir.set_blacklist("alex", true).await.unwrap();
        assert!(dir.user("alex").unwrap().is_blacklisted);
        assert!(dir.get_user("ghost").await.unwrap().is_none());
        assert!(dir.set_blacklist("ghost", true).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let dir = MemoryDirectory::new();
        dir.add("alex");
        dir.fail_lookups_for("alex", "timeout");
        assert!(matches!(dir.get_user("alex").await, Err(DirectoryError::Lookup { .. })));
        dir.clear_failures();
        assert!(dir.get_user("alex").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auto_register_resolves_unknown_names() {
        let dir = MemoryDirectory::new().auto_register();
        let u = dir.get_user("Newbie").await.unwrap().unwrap();
        assert_eq!(u.username, "Newbie");
        assert!(!u.is_exempt());
        assert_eq!(dir.len(), 1);
        dir.set_blacklist("newbie", true).await.unwrap();
    }

    #[test]
    fn roles_and_permissions() {
        let mut u = DirectoryUser::new("mod");
        assert!(!u.can(PERM_BAN) && !u.is_exempt());
        u.permissions.insert(PERM_IMMUNE.to_string());
        assert!(u.is_exempt());
        let owner = DirectoryUser { is_owner: true, ..DirectoryUser::new("boss") };
        assert!(owner.can(PERM_BAN));
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"[{"username":"Boss","is_owner":true},{"username":"alex","permissions":["moderation.warn"]}]"#).unwrap();
        let d = MemoryDirectory::from_json_file(&path).unwrap();
        assert_eq!(d.len(), 2);
        assert!(d.user("boss").unwrap().is_owner);
        assert!(d.user("alex").unwrap().has_permission(PERM_WARN));
    }
}
