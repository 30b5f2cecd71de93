//! Response Cache System
//!
//! A tag-indexed HTTP response cache:
//!
//! - **Engine** (`ResponseCacheStore`): stores rendered responses by request
//!   identity, indexes them by application tags, evicts lazily on read
//! - **Action queue**: defers removals until the surrounding unit of work commits
//! - **Verifiers**: application-defined validity checks on top of expiry
//! - **Layer** (`response_cache_layer`): axum middleware serving and filling the cache
//!
//! ## Configuration
//!
//! Layer behavior is controlled via `respcache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//! # ... see config.rs for all options
//! ```

mod characteristics;
mod config;
mod engine;
mod error;
mod identity;
mod kv;
mod lock;
mod memory;
mod middleware;
mod payload;
mod queue;
mod record;
pub mod tags;
mod transaction;
mod verifier;

pub use characteristics::{Characteristics, Scalar};
pub use config::CacheConfig;
pub use engine::{ResponseCacheStore, TAG_PREFIX};
pub use error::CacheError;
pub use identity::{RequestPath, ResponseIdentity};
pub use kv::{Entry, KeyValueStore, Namespace, Partition, StoreError, StoreResolver};
pub use memory::{MemoryStore, MemoryStoreResolver};
pub use middleware::{
    CacheState, identity_from_request, response_cache_layer, should_store_response,
};
pub use payload::{CachedPayload, HeaderMutation};
pub use queue::{ActionExecutor, ActionQueue, CacheAction};
pub use record::CacheRecord;
pub use transaction::{
    LocalTransactionManager, ResourceId, TransactionError, TransactionManager,
    TransactionalResource,
};
pub use verifier::{CacheVerifier, CacheVerifying, LookupError, VerifierLookup, VerifierRegistry};

pub(crate) use engine::{
    METRIC_EVICT_TOTAL, METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_STORE_TOTAL,
};
pub(crate) use queue::{METRIC_COMMIT_MS, METRIC_DEFERRED_ACTION_TOTAL};
