//! Key/value persistence contract the engine indexes on top of.
//!
//! Entries are addressed by `(Namespace, Characteristics)`. Predicate
//! operations select every entry whose characteristics contain all pairs of
//! the needle set.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::characteristics::Characteristics;

/// Storage scope of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Visible to every node of a cluster.
    Shared,
    /// Visible to this node only.
    Local,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Shared, Partition::Local];

    pub fn from_shared(shared: bool) -> Self {
        if shared {
            Partition::Shared
        } else {
            Partition::Local
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Shared => "shared",
            Partition::Local => "local",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaces used by the response cache within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Response entries, keyed by response key.
    Response,
    /// Back-pointers from identity + tags to the response key.
    Index,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Response => "response",
            Namespace::Index => "index",
        }
    }
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    characteristics: Characteristics,
    data: Value,
}

impl Entry {
    pub fn new(characteristics: Characteristics, data: Value) -> Self {
        Self {
            characteristics,
            data,
        }
    }

    /// Storage key of the entry.
    pub fn characteristics(&self) -> &Characteristics {
        &self.characteristics
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode cache value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Namespaced key/value store with predicate selection.
///
/// Implementations provide atomic per-key `store`, `get` and `remove`.
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite the entry at `key`.
    fn store(&self, namespace: Namespace, key: &Characteristics, value: Value)
    -> Result<(), StoreError>;

    fn get(&self, namespace: Namespace, key: &Characteristics) -> Result<Option<Entry>, StoreError>;

    fn remove(&self, namespace: Namespace, key: &Characteristics) -> Result<(), StoreError>;

    /// Remove every entry whose key contains all pairs of `predicate`.
    ///
    /// Returns the number of removed entries.
    fn remove_all(&self, namespace: Namespace, predicate: &Characteristics)
    -> Result<usize, StoreError>;

    /// Every entry whose key contains all pairs of `predicate`.
    fn find_all(
        &self,
        namespace: Namespace,
        predicate: &Characteristics,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Drop every entry in every namespace.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Hands out the store backing a partition.
///
/// The engine resolves each partition once, on first use.
pub trait StoreResolver: Send + Sync {
    fn resolve(&self, partition: Partition) -> Result<Arc<dyn KeyValueStore>, StoreError>;
}
