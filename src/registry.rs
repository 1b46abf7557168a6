//! In-memory registry of reconciled Che managers
//!
//! The manager reconciler publishes the last successfully observed state of
//! every CheManager here, and the routing solver reads it on each invocation.
//! The registry is a cache, not a source of truth: it is initialized empty at
//! process start and is always reconstructable from the cluster. Readers must
//! treat entries as possibly one reconcile cycle stale.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::crd::{CheManager, RoutingMode};
use kube::ResourceExt;

/// Identity of a manager: its namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerKey {
    pub namespace: String,
    pub name: String,
}

impl ManagerKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(manager: &CheManager) -> Self {
        Self {
            namespace: manager.namespace().unwrap_or_else(|| "default".to_string()),
            name: manager.name_any(),
        }
    }
}

impl std::fmt::Display for ManagerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The last-reconciled state of a manager, as the solver needs to see it
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerRecord {
    pub namespace: String,
    pub name: String,
    /// Externally reachable base domain of the gateway
    pub host: String,
    /// Routing mode; `None` is a synonym for single-host
    pub routing: Option<RoutingMode>,
    /// Whether the manager's gateway is known operational
    pub established: bool,
}

impl ManagerRecord {
    /// Build a record from an observed manager object
    pub fn from_manager(manager: &CheManager, established: bool) -> Self {
        let key = ManagerKey::of(manager);
        Self {
            namespace: key.namespace,
            name: key.name,
            host: manager.spec.host.clone(),
            routing: manager.spec.routing,
            established,
        }
    }

    pub fn key(&self) -> ManagerKey {
        ManagerKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_single_host(&self) -> bool {
        matches!(self.routing, None | Some(RoutingMode::SingleHost))
    }
}

/// Concurrency-safe map from manager identity to its last-reconciled record.
///
/// Handles are cheap clones of the same shared state; one is injected into
/// each controller rather than reached through a global.
#[derive(Clone, Default)]
pub struct ManagerRegistry {
    inner: Arc<RwLock<HashMap<ManagerKey, ManagerRecord>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for a manager
    pub fn put(&self, key: ManagerKey, record: ManagerRecord) {
        self.inner
            .write()
            .expect("manager registry lock poisoned")
            .insert(key, record);
    }

    /// Look up a manager by identity
    pub fn get(&self, key: &ManagerKey) -> Option<ManagerRecord> {
        self.inner
            .read()
            .expect("manager registry lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove a manager; a no-op if it was never registered
    pub fn delete(&self, key: &ManagerKey) {
        self.inner
            .write()
            .expect("manager registry lock poisoned")
            .remove(key);
    }

    /// Point-in-time snapshot of all registered managers.
    ///
    /// The returned map is a copy; it never aliases live registry storage.
    pub fn list(&self) -> HashMap<ManagerKey, ManagerRecord> {
        self.inner
            .read()
            .expect("manager registry lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("manager registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ns: &str, name: &str, host: &str) -> ManagerRecord {
        ManagerRecord {
            namespace: ns.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            routing: None,
            established: false,
        }
    }

    #[test]
    fn put_then_get_returns_the_record() {
        let registry = ManagerRegistry::new();
        let key = ManagerKey::new("ns", "che");
        registry.put(key.clone(), record("ns", "che", "over.the.rainbow"));

        let found = registry.get(&key).expect("record should be present");
        assert_eq!(found.host, "over.the.rainbow");
    }

    #[test]
    fn put_replaces_an_existing_record() {
        let registry = ManagerRegistry::new();
        let key = ManagerKey::new("ns", "che");
        registry.put(key.clone(), record("ns", "che", "over.the.rainbow"));
        registry.put(key.clone(), record("ns", "che", "over.the.shoulder"));

        let found = registry.get(&key).expect("record should be present");
        assert_eq!(found.host, "over.the.shoulder");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn delete_removes_the_record_and_is_idempotent() {
        let registry = ManagerRegistry::new();
        let key = ManagerKey::new("ns", "che");
        registry.put(key.clone(), record("ns", "che", "h"));

        registry.delete(&key);
        assert!(registry.get(&key).is_none());

        // second delete is a no-op
        registry.delete(&key);
        assert!(registry.is_empty());
    }

    #[test]
    fn list_returns_a_snapshot_not_a_view() {
        let registry = ManagerRegistry::new();
        let key = ManagerKey::new("ns", "che");
        registry.put(key.clone(), record("ns", "che", "h"));

        let snapshot = registry.list();
        registry.delete(&key);

        // the snapshot is unaffected by later mutation
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_writers_and_readers_do_not_tear() {
        let registry = ManagerRegistry::new();
        let mut handles = Vec::new();

        for i in 0..8 {
            let reg = registry.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    let key = ManagerKey::new("ns", format!("che-{}", i));
                    reg.put(key.clone(), record("ns", &format!("che-{}", i), "h"));
                    let _ = reg.get(&key);
                    let _ = reg.list();
                    if j % 2 == 0 {
                        reg.delete(&key);
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        // every surviving record is internally consistent
        for (key, rec) in registry.list() {
            assert_eq!(key, rec.key());
        }
    }
}
