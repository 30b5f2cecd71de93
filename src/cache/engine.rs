//! Response cache engine.
//!
//! Each partition keeps two namespaces:
//!
//! - `Response`: one entry per identity, keyed by `response_key(id)`, holding
//!   the serialized `CacheRecord`. Later stores overwrite it.
//! - `Index`: one entry per identity and tag combination, keyed by
//!   `response_key(id)` merged with the record's tags prefixed by `cust`,
//!   holding `response_key(id)` as a back-pointer.
//!
//! Index entries left behind by an overwrite with different tags stay until
//! their identity is evicted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::characteristics::Characteristics;
use super::error::CacheError;
use super::identity::ResponseIdentity;
use super::kv::{KeyValueStore, Namespace, Partition, StoreError, StoreResolver};
use super::lock::{mutex_lock, rw_read, rw_write};
use super::queue::{ActionExecutor, ActionQueue, CacheAction};
use super::record::CacheRecord;
use super::transaction::{ResourceId, TransactionManager, TransactionalResource};
use super::verifier::CacheVerifying;

const SOURCE: &str = "cache::engine";

/// Prefix separating tag keys from identity keys in index entries.
pub const TAG_PREFIX: &str = "cust";

pub(crate) const METRIC_HIT_TOTAL: &str = "respcache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "respcache_miss_total";
pub(crate) const METRIC_STORE_TOTAL: &str = "respcache_store_total";
pub(crate) const METRIC_EVICT_TOTAL: &str = "respcache_evict_total";

#[derive(Debug, Clone, Copy)]
enum EvictReason {
    Expired,
    Malformed,
    Verifier,
    Removed,
    Tagged,
}

impl EvictReason {
    fn as_str(self) -> &'static str {
        match self {
            EvictReason::Expired => "expired",
            EvictReason::Malformed => "malformed",
            EvictReason::Verifier => "verifier",
            EvictReason::Removed => "removed",
            EvictReason::Tagged => "tagged",
        }
    }
}

/// Lazily resolved store handles for both partitions.
struct Partitions {
    resolver: Arc<dyn StoreResolver>,
    shared: RwLock<Option<Arc<dyn KeyValueStore>>>,
    local: RwLock<Option<Arc<dyn KeyValueStore>>>,
    closed: AtomicBool,
}

impl Partitions {
    fn new(resolver: Arc<dyn StoreResolver>) -> Self {
        Self {
            resolver,
            shared: RwLock::new(None),
            local: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn slot(&self, partition: Partition) -> &RwLock<Option<Arc<dyn KeyValueStore>>> {
        match partition {
            Partition::Shared => &self.shared,
            Partition::Local => &self.local,
        }
    }

    /// Store handle for `partition`, resolved on first use.
    fn handle(&self, partition: Partition) -> Result<Arc<dyn KeyValueStore>, CacheError> {
        self.ensure_open()?;
        let slot = self.slot(partition);

        if let Some(store) = rw_read(slot, SOURCE, "handle.read").as_ref() {
            return Ok(store.clone());
        }

        let mut guard = rw_write(slot, SOURCE, "handle.write");
        if let Some(store) = guard.as_ref() {
            return Ok(store.clone());
        }
        let store = self.resolver.resolve(partition)?;
        debug!(partition = partition.as_str(), "Resolved cache store");
        *guard = Some(store.clone());
        Ok(store)
    }

    fn release(&self) {
        self.closed.store(true, Ordering::Release);
        for partition in Partition::ALL {
            rw_write(self.slot(partition), SOURCE, "release").take();
        }
    }

    /// Drop the response of `response_key` and every index entry of that identity.
    fn evict_identity(
        &self,
        store: &dyn KeyValueStore,
        partition: Partition,
        response_key: &Characteristics,
        reason: EvictReason,
    ) -> Result<(), CacheError> {
        store.remove(Namespace::Response, response_key)?;
        let index_entries = store.remove_all(Namespace::Index, response_key)?;

        debug!(
            partition = partition.as_str(),
            key = %response_key,
            index_entries,
            reason = reason.as_str(),
            "Evicted cached response"
        );
        counter!(METRIC_EVICT_TOTAL, "reason" => reason.as_str()).increment(1);
        Ok(())
    }

    fn remove_tagged(
        &self,
        partition: Partition,
        needles: &Characteristics,
    ) -> Result<usize, CacheError> {
        let store = self.handle(partition)?;
        let matches = store.find_all(
            Namespace::Index,
            &needles.with_prefixed_keys(TAG_PREFIX),
        )?;
        let count = matches.len();

        for entry in matches {
            match serde_json::from_value::<Characteristics>(entry.data().clone()) {
                Ok(response_key) => store.remove(Namespace::Response, &response_key)?,
                Err(error) => warn!(
                    partition = partition.as_str(),
                    key = %entry.characteristics(),
                    error = %error,
                    "Malformed index back-pointer; dropping index entry only"
                ),
            }
            store.remove(Namespace::Index, entry.characteristics())?;
            counter!(METRIC_EVICT_TOTAL, "reason" => EvictReason::Tagged.as_str()).increment(1);
        }

        Ok(count)
    }
}

impl ActionExecutor for Partitions {
    fn apply(&self, action: &CacheAction) -> Result<(), CacheError> {
        match action {
            CacheAction::RemoveById { id, partition } => {
                let store = self.handle(*partition)?;
                self.evict_identity(
                    store.as_ref(),
                    *partition,
                    &id.response_key(),
                    EvictReason::Removed,
                )?;
                info!(partition = partition.as_str(), identity = %id, "Cached response removed");
            }
            CacheAction::RemoveByTags { needles, partition } => {
                let removed = self.remove_tagged(*partition, needles)?;
                info!(
                    partition = partition.as_str(),
                    needles = %needles,
                    removed,
                    "Cached responses removed by characteristics"
                );
            }
        }
        Ok(())
    }
}

/// Tag-indexed response cache over a shared and a local store.
///
/// Removals go through a transactional queue registered with the
/// transaction manager; `store`, `get` and `clear` act immediately.
pub struct ResponseCacheStore {
    partitions: Arc<Partitions>,
    queue: Arc<ActionQueue<Partitions>>,
    verifying: CacheVerifying,
    transactions: Arc<dyn TransactionManager>,
    resource: Mutex<Option<ResourceId>>,
}

impl ResponseCacheStore {
    /// Build an engine and register its action queue with `transactions`.
    pub fn new(
        resolver: Arc<dyn StoreResolver>,
        verifying: CacheVerifying,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        let partitions = Arc::new(Partitions::new(resolver));
        let queue = Arc::new(ActionQueue::new(partitions.clone()));
        let resource: Arc<dyn TransactionalResource> = queue.clone();
        let resource_id = transactions.register_resource(resource);

        Self {
            partitions,
            queue,
            verifying,
            transactions,
            resource: Mutex::new(Some(resource_id)),
        }
    }

    /// Store `record` under `id`, replacing any previous response of that identity.
    ///
    /// Fails with `InvalidVerifier` before writing anything when the record
    /// names a verifier that does not resolve.
    pub fn store(
        &self,
        id: &ResponseIdentity,
        record: &CacheRecord,
        partition: Partition,
    ) -> Result<(), CacheError> {
        self.partitions.ensure_open()?;
        if let Some(reference) = record.verifier_ref.as_deref() {
            self.verifying.assert_verifier(reference)?;
        }

        let store = self.partitions.handle(partition)?;
        let response_key = id.response_key();
        let index_key =
            response_key.merge(&record.tag_characteristics.with_prefixed_keys(TAG_PREFIX));

        let value = serde_json::to_value(record).map_err(StoreError::from)?;
        let pointer = serde_json::to_value(&response_key).map_err(StoreError::from)?;

        store.store(Namespace::Response, &response_key, value)?;
        store.store(Namespace::Index, &index_key, pointer)?;

        debug!(
            partition = partition.as_str(),
            identity = %id,
            tags = %record.tag_characteristics,
            expire_at = %record.payload.expire_at,
            "Cached response stored"
        );
        counter!(METRIC_STORE_TOTAL).increment(1);
        Ok(())
    }

    /// Fetch the record stored under `id`.
    ///
    /// Malformed, expired or verifier-rejected records are evicted on the spot
    /// and reported as a miss.
    pub fn get(
        &self,
        id: &ResponseIdentity,
        partition: Partition,
        now: OffsetDateTime,
    ) -> Result<Option<CacheRecord>, CacheError> {
        let store = self.partitions.handle(partition)?;
        let response_key = id.response_key();

        let Some(entry) = store.get(Namespace::Response, &response_key)? else {
            debug!(partition = partition.as_str(), identity = %id, outcome = "miss", "Cache lookup");
            counter!(METRIC_MISS_TOTAL).increment(1);
            return Ok(None);
        };

        let reason = match serde_json::from_value::<CacheRecord>(entry.into_data()) {
            Err(error) => {
                warn!(
                    partition = partition.as_str(),
                    identity = %id,
                    error = %error,
                    "Malformed cached response; evicting"
                );
                EvictReason::Malformed
            }
            Ok(record) if record.payload.is_expired(now) => EvictReason::Expired,
            Ok(record) if !self.verifying.verify_validity(id, &record, now) => {
                EvictReason::Verifier
            }
            Ok(record) => {
                debug!(partition = partition.as_str(), identity = %id, outcome = "hit", "Cache lookup");
                counter!(METRIC_HIT_TOTAL).increment(1);
                return Ok(Some(record));
            }
        };

        self.partitions
            .evict_identity(store.as_ref(), partition, &response_key, reason)?;
        counter!(METRIC_MISS_TOTAL).increment(1);
        Ok(None)
    }

    /// Evict the response of `id` and all its index entries once the current
    /// transaction commits, or now when none is active.
    pub fn remove(&self, id: &ResponseIdentity, partition: Partition) -> Result<(), CacheError> {
        self.partitions.ensure_open()?;
        self.queue.register(CacheAction::RemoveById {
            id: id.clone(),
            partition,
        })
    }

    /// Evict every response whose tags contain all `needles`, deferred like
    /// [`remove`](Self::remove).
    ///
    /// Only the matching index entries go; other tag variants of an affected
    /// identity stay.
    pub fn remove_by_characteristics(
        &self,
        needles: &Characteristics,
        partition: Partition,
    ) -> Result<(), CacheError> {
        self.partitions.ensure_open()?;
        self.queue.register(CacheAction::RemoveByTags {
            needles: needles.clone(),
            partition,
        })
    }

    /// Wipe one partition, or both when `partition` is `None`.
    pub fn clear(&self, partition: Option<Partition>) -> Result<(), CacheError> {
        self.partitions.ensure_open()?;
        let targets = match partition {
            Some(partition) => vec![partition],
            None => Partition::ALL.to_vec(),
        };

        for partition in targets {
            self.partitions.handle(partition)?.clear()?;
            info!(partition = partition.as_str(), "Response cache cleared");
        }
        Ok(())
    }

    /// Number of removals waiting for the current transaction to commit.
    pub fn pending_actions(&self) -> usize {
        self.queue.pending()
    }

    /// Release the store handles and leave the transaction manager.
    ///
    /// Every later operation fails with `CacheError::Closed`. Closing twice is a no-op.
    /// Dropping the engine closes it.
    pub fn close(&self) {
        let Some(resource_id) = mutex_lock(&self.resource, SOURCE, "close").take() else {
            return;
        };
        self.transactions.unregister_resource(resource_id);
        self.partitions.release();
        info!("Response cache engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.partitions.closed.load(Ordering::Acquire)
    }
}

impl Drop for ResponseCacheStore {
    fn drop(&mut self) {
        self.close();
    }
}
