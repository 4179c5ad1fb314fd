//! The per-node namespace table.
//!
//! Maps namespace strings to slots, each holding one [`CentroidManager`]
//! behind its own async mutex. The outer map guards structure only (insert
//! and lookup of entries); per-namespace work serializes on the slot mutex,
//! which may be held across awaits. The two are never held at the same time:
//! a lookup clones the slot handle out of the map before locking it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::index::CentroidManager;

/// Shared handle to one namespace's manager.
pub type Slot = Arc<Mutex<CentroidManager>>;

/// Namespaced managers with per-slot locking.
#[derive(Debug, Default)]
pub struct NamespaceTable {
    slots: DashMap<String, Slot>,
}

impl NamespaceTable {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// All namespaces currently present.
    pub fn namespaces(&self) -> Vec<String> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    /// Clones the slot handle for a namespace out of the map. The map lock
    /// is released before the returned slot can be awaited on.
    pub fn get(&self, namespace: &str) -> Option<Slot> {
        self.slots.get(namespace).map(|e| Arc::clone(e.value()))
    }

    /// Inserts a manager under a namespace, replacing any previous slot.
    pub fn insert(&self, namespace: impl Into<String>, manager: CentroidManager) -> Slot {
        let slot: Slot = Arc::new(Mutex::new(manager));
        self.slots.insert(namespace.into(), Arc::clone(&slot));
        slot
    }

    /// Returns the slot for a namespace, creating it with `seed` when absent.
    /// Concurrent creators race on the map entry; exactly one wins.
    pub fn get_or_insert_with<F>(&self, namespace: &str, seed: F) -> Slot
    where
        F: FnOnce() -> CentroidManager,
    {
        let entry = self
            .slots
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(seed())));
        Arc::clone(entry.value())
    }

    /// Runs `f` against the manager for a namespace, serialized on the slot
    /// mutex. Returns `None` when the namespace does not exist.
    pub async fn access<F, R>(&self, namespace: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut CentroidManager) -> R,
    {
        let slot = self.get(namespace)?;
        let mut manager = slot.lock().await;
        Some(f(&mut manager))
    }

    /// Drops every slot. Used by test fixtures between cases.
    pub fn reset(&self) {
        self.slots.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ManagerConfig;
    use vecmesh_core::DataPoint;

    fn manager() -> CentroidManager {
        CentroidManager::new(ManagerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_access_missing_namespace() {
        let table = NamespaceTable::new();
        let r = table.access("nope", |cm| cm.len_dp()).await;
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn test_insert_and_access() {
        let table = NamespaceTable::new();
        table.insert("ns", manager());

        let len = table
            .access("ns", |cm| {
                cm.add_data_point(DataPoint::new(vec![1.0, 2.0], Vec::new()))
                    .unwrap();
                cm.len_dp()
            })
            .await;
        assert_eq!(len, Some(1));
        assert_eq!(table.namespaces(), vec!["ns".to_string()]);
    }

    #[tokio::test]
    async fn test_get_or_insert_with_races_once() {
        let table = Arc::new(NamespaceTable::new());
        let a = table.get_or_insert_with("ns", manager);
        let b = table.get_or_insert_with("ns", manager);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_parallel_access_across_namespaces() {
        let table = Arc::new(NamespaceTable::new());
        table.insert("a", manager());
        table.insert("b", manager());

        let t1 = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .access("a", |cm| {
                        cm.add_data_point(DataPoint::new(vec![1.0], Vec::new())).ok();
                    })
                    .await
            })
        };
        let t2 = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .access("b", |cm| {
                        cm.add_data_point(DataPoint::new(vec![2.0], Vec::new())).ok();
                    })
                    .await
            })
        };
        t1.await.unwrap();
        t2.await.unwrap();

        assert_eq!(table.access("a", |cm| cm.len_dp()).await, Some(1));
        assert_eq!(table.access("b", |cm| cm.len_dp()).await, Some(1));
    }
}
