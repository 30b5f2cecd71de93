//! Transactional action queue.
//!
//! Removals are registered as `CacheAction`s. Outside a transaction they run
//! at once; inside one they are buffered and applied in registration order
//! on commit, or dropped on rollback.

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::characteristics::Characteristics;
use super::error::CacheError;
use super::identity::ResponseIdentity;
use super::kv::Partition;
use super::lock::mutex_lock;
use super::transaction::TransactionalResource;

const SOURCE: &str = "cache::queue";

pub(crate) const METRIC_DEFERRED_ACTION_TOTAL: &str = "respcache_deferred_action_total";
pub(crate) const METRIC_COMMIT_MS: &str = "respcache_commit_ms";

/// A deferred cache mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheAction {
    /// Evict the response of one identity together with all its index entries.
    RemoveById {
        id: ResponseIdentity,
        partition: Partition,
    },
    /// Evict every response whose tags contain all `needles`.
    RemoveByTags {
        needles: Characteristics,
        partition: Partition,
    },
}

/// Applies actions once they are due.
pub trait ActionExecutor: Send + Sync {
    fn apply(&self, action: &CacheAction) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
enum QueueState {
    #[default]
    Idle,
    Active(Vec<CacheAction>),
}

/// Transactional resource buffering `CacheAction`s.
pub struct ActionQueue<E> {
    executor: Arc<E>,
    state: Mutex<QueueState>,
}

impl<E: ActionExecutor> ActionQueue<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            executor,
            state: Mutex::new(QueueState::Idle),
        }
    }

    /// Run `action` now, or buffer it while a transaction is active.
    pub fn register(&self, action: CacheAction) -> Result<(), CacheError> {
        {
            let mut state = mutex_lock(&self.state, SOURCE, "register");
            if let QueueState::Active(buffer) = &mut *state {
                debug!(action = ?action, position = buffer.len(), "Cache action buffered");
                buffer.push(action);
                counter!(METRIC_DEFERRED_ACTION_TOTAL, "mode" => "buffered").increment(1);
                return Ok(());
            }
        }

        counter!(METRIC_DEFERRED_ACTION_TOTAL, "mode" => "immediate").increment(1);
        self.executor.apply(&action)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            *mutex_lock(&self.state, SOURCE, "is_active"),
            QueueState::Active(_)
        )
    }

    /// Number of buffered actions.
    pub fn pending(&self) -> usize {
        match &*mutex_lock(&self.state, SOURCE, "pending") {
            QueueState::Active(buffer) => buffer.len(),
            QueueState::Idle => 0,
        }
    }

    fn take_buffer(&self, op: &'static str) -> Vec<CacheAction> {
        match mem::take(&mut *mutex_lock(&self.state, SOURCE, op)) {
            QueueState::Active(buffer) => buffer,
            QueueState::Idle => Vec::new(),
        }
    }
}

impl<E: ActionExecutor> TransactionalResource for ActionQueue<E> {
    fn begin_transaction(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "begin_transaction");
        match &*state {
            QueueState::Active(buffer) => {
                warn!(
                    pending = buffer.len(),
                    "Transaction already active on cache action queue; keeping buffer"
                );
            }
            QueueState::Idle => *state = QueueState::Active(Vec::new()),
        }
    }

    /// Apply buffered actions in FIFO order.
    ///
    /// A failing action stops the drain; actions after it are discarded.
    fn commit(&self) -> Result<(), CacheError> {
        let started_at = Instant::now();
        let actions = self.take_buffer("commit");
        let total = actions.len();

        for (applied, action) in actions.iter().enumerate() {
            if let Err(error) = self.executor.apply(action) {
                let discarded = total - applied - 1;
                warn!(
                    error = %error,
                    applied,
                    discarded,
                    "Cache action failed during commit; remaining actions discarded"
                );
                counter!(METRIC_DEFERRED_ACTION_TOTAL, "mode" => "discarded")
                    .increment(discarded as u64);
                return Err(error);
            }
        }

        if total > 0 {
            info!(applied = total, "Buffered cache actions applied");
        }
        histogram!(METRIC_COMMIT_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    fn rollback(&self) {
        let discarded = self.take_buffer("rollback").len();
        if discarded > 0 {
            info!(discarded, "Buffered cache actions discarded on rollback");
            counter!(METRIC_DEFERRED_ACTION_TOTAL, "mode" => "discarded")
                .increment(discarded as u64);
        }
    }
}
