//! In-memory `KeyValueStore`.
//!
//! Entries live in one map per namespace, keyed by the canonical form of
//! their characteristics. Predicate operations scan the namespace.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use super::characteristics::Characteristics;
use super::kv::{Entry, KeyValueStore, Namespace, Partition, StoreError, StoreResolver};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";

type NamespaceMap = HashMap<String, Entry>;

/// Process-local store guarded by a single `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<Namespace, NamespaceMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in `namespace`.
    pub fn len(&self, namespace: Namespace) -> usize {
        rw_read(&self.namespaces, SOURCE, "len")
            .get(&namespace)
            .map_or(0, HashMap::len)
    }

    /// True when no namespace holds an entry.
    pub fn is_empty(&self) -> bool {
        rw_read(&self.namespaces, SOURCE, "is_empty")
            .values()
            .all(HashMap::is_empty)
    }
}

impl KeyValueStore for MemoryStore {
    fn store(
        &self,
        namespace: Namespace,
        key: &Characteristics,
        value: Value,
    ) -> Result<(), StoreError> {
        rw_write(&self.namespaces, SOURCE, "store")
            .entry(namespace)
            .or_default()
            .insert(key.canonical(), Entry::new(key.clone(), value));
        Ok(())
    }

    fn get(&self, namespace: Namespace, key: &Characteristics) -> Result<Option<Entry>, StoreError> {
        Ok(rw_read(&self.namespaces, SOURCE, "get")
            .get(&namespace)
            .and_then(|entries| entries.get(&key.canonical()))
            .cloned())
    }

    fn remove(&self, namespace: Namespace, key: &Characteristics) -> Result<(), StoreError> {
        if let Some(entries) = rw_write(&self.namespaces, SOURCE, "remove").get_mut(&namespace) {
            entries.remove(&key.canonical());
        }
        Ok(())
    }

    fn remove_all(
        &self,
        namespace: Namespace,
        predicate: &Characteristics,
    ) -> Result<usize, StoreError> {
        let mut namespaces = rw_write(&self.namespaces, SOURCE, "remove_all");
        let Some(entries) = namespaces.get_mut(&namespace) else {
            return Ok(0);
        };

        let before = entries.len();
        entries.retain(|_, entry| !entry.characteristics().contains_all(predicate));
        let removed = before - entries.len();

        debug!(
            namespace = namespace.as_str(),
            removed, "Removed entries matching predicate"
        );
        Ok(removed)
    }

    fn find_all(
        &self,
        namespace: Namespace,
        predicate: &Characteristics,
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(rw_read(&self.namespaces, SOURCE, "find_all")
            .get(&namespace)
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| entry.characteristics().contains_all(predicate))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<(), StoreError> {
        rw_write(&self.namespaces, SOURCE, "clear").clear();
        Ok(())
    }
}

/// Resolver handing out one in-memory store per partition.
#[derive(Clone, Default)]
pub struct MemoryStoreResolver {
    shared: Arc<MemoryStore>,
    local: Arc<MemoryStore>,
}

impl MemoryStoreResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct handle on the store behind `partition`.
    pub fn store(&self, partition: Partition) -> &Arc<MemoryStore> {
        match partition {
            Partition::Shared => &self.shared,
            Partition::Local => &self.local,
        }
    }
}

impl StoreResolver for MemoryStoreResolver {
    fn resolve(&self, partition: Partition) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let store: Arc<dyn KeyValueStore> = self.store(partition).clone();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;

    fn key(pairs: &[(&str, i64)]) -> Characteristics {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn store_overwrites_same_key() {
        let store = MemoryStore::new();
        store
            .store(Namespace::Response, &key(&[("a", 1)]), json!("first"))
            .expect("store");
        store
            .store(Namespace::Response, &key(&[("a", 1)]), json!("second"))
            .expect("store");

        assert_eq!(store.len(Namespace::Response), 1);
        let entry = store
            .get(Namespace::Response, &key(&[("a", 1)]))
            .expect("get")
            .expect("entry present");
        assert_eq!(entry.data(), &json!("second"));
    }

    #[test]
    fn namespaces_are_independent() {
        let store = MemoryStore::new();
        store
            .store(Namespace::Response, &key(&[("a", 1)]), json!(1))
            .expect("store");

        assert!(store.get(Namespace::Index, &key(&[("a", 1)])).expect("get").is_none());
        assert_eq!(store.len(Namespace::Index), 0);
    }

    #[test]
    fn find_all_matches_supersets() {
        let store = MemoryStore::new();
        store
            .store(Namespace::Index, &key(&[("a", 1), ("b", 1)]), json!(1))
            .expect("store");
        store
            .store(Namespace::Index, &key(&[("a", 1), ("b", 2)]), json!(2))
            .expect("store");
        store
            .store(Namespace::Index, &key(&[("a", 2)]), json!(3))
            .expect("store");

        let found = store
            .find_all(Namespace::Index, &key(&[("a", 1)]))
            .expect("find_all");
        assert_eq!(found.len(), 2);

        let found = store
            .find_all(Namespace::Index, &key(&[("b", 2)]))
            .expect("find_all");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data(), &json!(2));
    }

    #[test]
    fn remove_all_drops_only_matches() {
        let store = MemoryStore::new();
        store
            .store(Namespace::Index, &key(&[("a", 1), ("b", 1)]), json!(1))
            .expect("store");
        store
            .store(Namespace::Index, &key(&[("a", 2)]), json!(2))
            .expect("store");

        let removed = store
            .remove_all(Namespace::Index, &key(&[("a", 1)]))
            .expect("remove_all");
        assert_eq!(removed, 1);
        assert_eq!(store.len(Namespace::Index), 1);
    }

    #[test]
    fn clear_empties_every_namespace() {
        let store = MemoryStore::new();
        store
            .store(Namespace::Response, &key(&[("a", 1)]), json!(1))
            .expect("store");
        store
            .store(Namespace::Index, &key(&[("a", 1)]), json!(1))
            .expect("store");

        store.clear().expect("clear");
        assert!(store.is_empty());
    }

    #[test]
    fn resolver_keeps_partitions_apart() {
        let resolver = MemoryStoreResolver::new();
        resolver
            .resolve(Partition::Shared)
            .expect("resolve")
            .store(Namespace::Response, &key(&[("a", 1)]), json!(1))
            .expect("store");

        assert_eq!(resolver.store(Partition::Shared).len(Namespace::Response), 1);
        assert_eq!(resolver.store(Partition::Local).len(Namespace::Response), 0);
    }

    #[test]
    fn memory_store_recovers_from_poisoned_lock() {
        let store = MemoryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .namespaces
                .write()
                .expect("namespace lock should be acquired");
            panic!("poison namespace lock");
        }));

        store
            .store(Namespace::Response, &key(&[("a", 1)]), json!(1))
            .expect("store after poison");
        assert_eq!(store.len(Namespace::Response), 1);
    }
}
