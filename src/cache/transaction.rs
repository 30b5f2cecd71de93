//! Unit-of-work plumbing.
//!
//! Resources register with a `TransactionManager` and receive begin, commit
//! and rollback callbacks. `LocalTransactionManager` is an in-process manager
//! that drives every registered resource.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::transaction";

/// Participant in a unit of work.
pub trait TransactionalResource: Send + Sync {
    fn begin_transaction(&self);
    fn commit(&self) -> Result<(), CacheError>;
    fn rollback(&self);
}

/// Handle returned when a resource registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

pub trait TransactionManager: Send + Sync {
    fn register_resource(&self, resource: Arc<dyn TransactionalResource>) -> ResourceId;
    fn unregister_resource(&self, id: ResourceId);
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("no transaction is active")]
    NoActiveTransaction,
    #[error("transaction {0} is already active")]
    AlreadyActive(Uuid),
    #[error("transactional resource failed: {0}")]
    Resource(#[from] CacheError),
}

#[derive(Default)]
struct ManagerState {
    active: Option<Uuid>,
    resources: Vec<(ResourceId, Arc<dyn TransactionalResource>)>,
}

/// Single-threaded unit of work over the registered resources.
///
/// Callbacks run in registration order, outside the manager's lock.
#[derive(Default)]
pub struct LocalTransactionManager {
    state: Mutex<ManagerState>,
}

impl LocalTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        mutex_lock(&self.state, SOURCE, "is_active").active.is_some()
    }

    pub fn resource_count(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "resource_count")
            .resources
            .len()
    }

    /// Open a transaction and notify every resource.
    pub fn begin(&self) -> Result<Uuid, TransactionError> {
        let (transaction_id, resources) = {
            let mut state = mutex_lock(&self.state, SOURCE, "begin");
            if let Some(active) = state.active {
                return Err(TransactionError::AlreadyActive(active));
            }
            let transaction_id = Uuid::new_v4();
            state.active = Some(transaction_id);
            (transaction_id, Self::snapshot(&state))
        };

        info!(%transaction_id, resources = resources.len(), "Transaction started");
        for resource in resources {
            resource.begin_transaction();
        }
        Ok(transaction_id)
    }

    /// Commit every resource. The first failure rolls back the resources that
    /// have not committed yet and is returned.
    pub fn commit(&self) -> Result<(), TransactionError> {
        let (transaction_id, resources) = self.finish("commit")?;

        let mut pending = resources.into_iter();
        while let Some(resource) = pending.next() {
            if let Err(error) = resource.commit() {
                warn!(%transaction_id, error = %error, "Transaction commit failed");
                for remaining in pending {
                    remaining.rollback();
                }
                return Err(error.into());
            }
        }

        info!(%transaction_id, "Transaction committed");
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), TransactionError> {
        let (transaction_id, resources) = self.finish("rollback")?;
        for resource in resources {
            resource.rollback();
        }
        info!(%transaction_id, "Transaction rolled back");
        Ok(())
    }

    fn finish(
        &self,
        op: &'static str,
    ) -> Result<(Uuid, Vec<Arc<dyn TransactionalResource>>), TransactionError> {
        let mut state = mutex_lock(&self.state, SOURCE, op);
        let transaction_id = state
            .active
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;
        Ok((transaction_id, Self::snapshot(&state)))
    }

    fn snapshot(state: &ManagerState) -> Vec<Arc<dyn TransactionalResource>> {
        state
            .resources
            .iter()
            .map(|(_, resource)| resource.clone())
            .collect()
    }
}

impl TransactionManager for LocalTransactionManager {
    /// A resource registered while a transaction is open joins it at once.
    fn register_resource(&self, resource: Arc<dyn TransactionalResource>) -> ResourceId {
        let id = ResourceId::new();
        let joins_active = {
            let mut state = mutex_lock(&self.state, SOURCE, "register_resource");
            state.resources.push((id, resource.clone()));
            state.active.is_some()
        };
        if joins_active {
            resource.begin_transaction();
        }
        id
    }

    fn unregister_resource(&self, id: ResourceId) {
        mutex_lock(&self.state, SOURCE, "unregister_resource")
            .resources
            .retain(|(registered, _)| *registered != id);
    }
}
