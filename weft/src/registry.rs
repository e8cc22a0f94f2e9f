//! Team-scoped worker registry: `{team_id, name}` → handle + metadata.
//!
//! Names are agent names or `keeper:<id>`. Metadata is an open JSON map
//! (role, status, tokens, ...). The TeamManager's monitor unregisters entries
//! when a worker terminates so the table never leaks past worker death.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub team_id: String,
    pub name: String,
}

impl RegistryKey {
    pub fn agent(team_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            name: name.into(),
        }
    }

    pub fn keeper(team_id: impl Into<String>, keeper_id: &str) -> Self {
        Self {
            team_id: team_id.into(),
            name: format!("keeper:{keeper_id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Agent,
    Keeper,
}

#[derive(Clone)]
pub struct RegistryEntry {
    pub kind: WorkerKind,
    pub metadata: Map<String, Value>,
    /// Cancelling this token asks the worker to shut down.
    pub cancel: CancellationToken,
}

/// Clonable process-wide registry.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<RegistryKey, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: RegistryKey, entry: RegistryEntry) {
        self.entries.insert(key, entry);
    }

    pub fn lookup(&self, key: &RegistryKey) -> Option<RegistryEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Atomic read-modify-write on an entry's metadata. Returns false when the
    /// key is gone.
    pub fn update_metadata<F>(&self, key: &RegistryKey, f: F) -> bool
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                f(&mut entry.metadata);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, key: &RegistryKey) -> Option<RegistryEntry> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Entries matching a predicate.
    pub fn select<F>(&self, predicate: F) -> Vec<(RegistryKey, RegistryEntry)>
    where
        F: Fn(&RegistryKey, &RegistryEntry) -> bool,
    {
        self.entries
            .iter()
            .filter(|e| predicate(e.key(), e.value()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// All worker names registered for a team.
    pub fn names_for_team(&self, team_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().team_id == team_id)
            .map(|e| e.key().name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(kind: WorkerKind) -> RegistryEntry {
        RegistryEntry {
            kind,
            metadata: Map::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = Registry::new();
        let key = RegistryKey::agent("t1", "alice");
        registry.register(key.clone(), entry(WorkerKind::Agent));
        assert!(registry.lookup(&key).is_some());
        registry.unregister(&key);
        assert!(registry.lookup(&key).is_none());
    }

    #[test]
    fn metadata_update_is_read_modify_write() {
        let registry = Registry::new();
        let key = RegistryKey::agent("t1", "alice");
        registry.register(key.clone(), entry(WorkerKind::Agent));
        assert!(registry.update_metadata(&key, |m| {
            m.insert("status".into(), json!("working"));
        }));
        let meta = registry.lookup(&key).unwrap().metadata;
        assert_eq!(meta["status"], "working");
        assert!(!registry.update_metadata(&RegistryKey::agent("t1", "bob"), |_| {}));
    }

    #[test]
    fn select_by_predicate_and_team_names() {
        let registry = Registry::new();
        registry.register(RegistryKey::agent("t1", "alice"), entry(WorkerKind::Agent));
        registry.register(RegistryKey::keeper("t1", "k1"), entry(WorkerKind::Keeper));
        registry.register(RegistryKey::agent("t2", "zoe"), entry(WorkerKind::Agent));

        let keepers = registry.select(|_, e| e.kind == WorkerKind::Keeper);
        assert_eq!(keepers.len(), 1);
        assert_eq!(registry.names_for_team("t1"), vec!["alice", "keeper:k1"]);
    }
}
