//! Durable alias registry
//!
//! Maps user-chosen aliases to Discord delivery targets and persists
//! the whole table to a JSON file after every mutation. The registry
//! owns both the in-memory table and the file; all reads and writes go
//! through this type.

use crate::utils::ensure_dir;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Name of the registry file inside the data directory
pub const REGISTRY_FILE: &str = "registry.json";

/// What a registered identifier denotes on the Discord side.
///
/// Captured when the registration is created: `/register` issued in a
/// direct message binds the invoking user, `/register` issued in a
/// guild channel binds that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    User,
    Channel,
}

/// A registered delivery target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Discord snowflake, kept as a string
    pub id: String,
    pub kind: TargetKind,
}

impl Target {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::User,
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::Channel,
        }
    }
}

/// Alias registry backed by a JSON file.
///
/// Only alias uniqueness is enforced here; callers that also need
/// identifier uniqueness check [`Registry::alias_for`] before
/// registering.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    entries: BTreeMap<String, Target>,
}

impl Registry {
    /// Open the registry stored under `data_dir`, creating the directory
    /// and an empty file if none exists. An unreadable file is renamed
    /// aside and the registry starts empty.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Self {
        let dir = ensure_dir(data_dir);
        let path = dir.join(REGISTRY_FILE);
        let entries = Self::load(&path);
        let registry = Self { path, entries };
        if !registry.path.exists() {
            registry.persist();
        }
        registry
    }

    fn load(path: &Path) -> BTreeMap<String, Target> {
        if !path.exists() {
            return BTreeMap::new();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!("Error loading registry: {}", e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str::<BTreeMap<String, Target>>(&content) {
            Ok(entries) => {
                info!("Loaded {} registered names", entries.len());
                entries
            }
            Err(e) => {
                error!("Error loading registry: {}", e);
                Self::quarantine(path);
                BTreeMap::new()
            }
        }
    }

    /// Rename an unparsable registry file aside so the next save cannot
    /// overwrite it
    fn quarantine(path: &Path) {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let backup = path.with_extension(format!("json.{}.bak", stamp));
        match std::fs::rename(path, &backup) {
            Ok(()) => warn!("Unreadable registry file moved to {}", backup.display()),
            Err(e) => error!("Failed to back up unreadable registry file: {}", e),
        }
    }

    /// Register `alias` for `target`. Returns false if the alias is
    /// already taken. The table is persisted before returning true.
    pub fn register(&mut self, alias: impl Into<String>, target: Target) -> bool {
        let alias = alias.into();
        if self.entries.contains_key(&alias) {
            return false;
        }
        self.entries.insert(alias, target);
        self.persist();
        true
    }

    /// Remove `alias`. Returns false if it was not registered.
    pub fn unregister(&mut self, alias: &str) -> bool {
        if self.entries.remove(alias).is_some() {
            self.persist();
            true
        } else {
            false
        }
    }

    /// Look up the target registered under `alias`
    pub fn resolve(&self, alias: &str) -> Option<&Target> {
        self.entries.get(alias)
    }

    /// Reverse lookup: the alias bound to a Discord identifier, if any.
    /// Aliases iterate in sorted order, so the first match is stable.
    pub fn alias_for(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, target)| target.id == id)
            .map(|(alias, _)| alias.as_str())
    }

    /// All registrations, as an independent copy
    pub fn all(&self) -> BTreeMap<String, Target> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the full table to disk. Failures are logged, never raised;
    /// the in-memory table stays authoritative until the next save.
    fn persist(&self) {
        let content = match serde_json::to_string_pretty(&self.entries) {
            Ok(content) => content,
            Err(e) => {
                error!("Error serializing registry: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, content) {
            error!("Error saving registry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_empty_registry_file() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::open(tmp.path());

        assert!(registry.is_empty());
        assert!(tmp.path().join(REGISTRY_FILE).exists());
    }

    #[test]
    fn test_register_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());

        assert!(registry.register("alice", Target::user("1001")));
        assert!(registry.register("kitchen", Target::channel("2002")));

        let target = registry.resolve("alice").unwrap();
        assert_eq!(target.id, "1001");
        assert_eq!(target.kind, TargetKind::User);

        let target = registry.resolve("kitchen").unwrap();
        assert_eq!(target.id, "2002");
        assert_eq!(target.kind, TargetKind::Channel);

        assert!(registry.resolve("nobody").is_none());
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());

        assert!(registry.register("alice", Target::user("1001")));
        assert!(!registry.register("alice", Target::user("9999")));

        // Original binding untouched
        assert_eq!(registry.resolve("alice").unwrap().id, "1001");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_identifier_under_two_aliases_is_allowed() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());

        assert!(registry.register("alice", Target::user("1001")));
        assert!(registry.register("alice-backup", Target::user("1001")));
        assert_eq!(registry.len(), 2);

        // First match in sorted alias order wins
        assert_eq!(registry.alias_for("1001"), Some("alice"));
    }

    #[test]
    fn test_unregister() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());

        registry.register("alice", Target::user("1001"));
        assert!(registry.unregister("alice"));
        assert!(registry.resolve("alice").is_none());

        assert!(!registry.unregister("alice"));
        assert!(!registry.unregister("never-existed"));
    }

    #[test]
    fn test_registrations_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut registry = Registry::open(tmp.path());
            registry.register("alice", Target::user("1001"));
            registry.register("kitchen", Target::channel("2002"));
        }

        let registry = Registry::open(tmp.path());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("alice").unwrap().id, "1001");
        assert_eq!(registry.resolve("kitchen").unwrap().kind, TargetKind::Channel);
    }

    #[test]
    fn test_all_returns_independent_copy() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());
        registry.register("alice", Target::user("1001"));

        let mut copy = registry.all();
        copy.insert("mallory".to_string(), Target::user("6666"));

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("mallory").is_none());
    }

    #[test]
    fn test_unreadable_file_is_quarantined() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(REGISTRY_FILE), "{not valid json").unwrap();

        let mut registry = Registry::open(tmp.path());
        assert!(registry.is_empty());

        // The broken file was moved aside, not overwritten
        let backups: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert_eq!(backups.len(), 1);
        let saved = std::fs::read_to_string(backups[0].path()).unwrap();
        assert_eq!(saved, "{not valid json");

        // And a fresh registry works in its place
        assert!(registry.register("alice", Target::user("1001")));
        let reopened = Registry::open(tmp.path());
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_registry_file_is_plain_alias_map() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::open(tmp.path());
        registry.register("alice", Target::user("1001"));

        let content = std::fs::read_to_string(tmp.path().join(REGISTRY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["alice"]["id"], "1001");
        assert_eq!(value["alice"]["kind"], "user");
    }
}
