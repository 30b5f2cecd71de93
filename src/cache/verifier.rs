//! Application-defined validity checks.
//!
//! A record may name a verifier. The reference is checked when the record is
//! stored and consulted again on every read, on top of plain expiry.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::error::CacheError;
use super::identity::ResponseIdentity;
use super::record::CacheRecord;

/// Judges whether a stored record may still be served.
pub trait CacheVerifier: Send + Sync {
    fn is_valid(&self, id: &ResponseIdentity, record: &CacheRecord, now: OffsetDateTime) -> bool;
}

impl<F> CacheVerifier for F
where
    F: Fn(&ResponseIdentity, &CacheRecord, OffsetDateTime) -> bool + Send + Sync,
{
    fn is_valid(&self, id: &ResponseIdentity, record: &CacheRecord, now: OffsetDateTime) -> bool {
        self(id, record, now)
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no collaborator registered under `{reference}`")]
    Missing { reference: String },
    #[error("collaborator `{reference}` is not a cache verifier")]
    Incompatible { reference: String },
}

impl LookupError {
    pub fn missing(reference: impl Into<String>) -> Self {
        Self::Missing {
            reference: reference.into(),
        }
    }

    pub fn incompatible(reference: impl Into<String>) -> Self {
        Self::Incompatible {
            reference: reference.into(),
        }
    }
}

/// Resolves a verifier reference to a verifier.
pub trait VerifierLookup: Send + Sync {
    fn lookup(&self, reference: &str) -> Result<Arc<dyn CacheVerifier>, LookupError>;
}

/// Verifiers registered by name when the application starts.
#[derive(Default, Clone)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn CacheVerifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, verifier: Arc<dyn CacheVerifier>) -> Self {
        self.verifiers.insert(reference.into(), verifier);
        self
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

impl VerifierLookup for VerifierRegistry {
    fn lookup(&self, reference: &str) -> Result<Arc<dyn CacheVerifier>, LookupError> {
        self.verifiers
            .get(reference)
            .cloned()
            .ok_or_else(|| LookupError::missing(reference))
    }
}

/// Verifier checks used by the engine.
#[derive(Clone)]
pub struct CacheVerifying {
    lookup: Arc<dyn VerifierLookup>,
}

impl CacheVerifying {
    pub fn new(lookup: Arc<dyn VerifierLookup>) -> Self {
        Self { lookup }
    }

    /// Fail with `InvalidVerifier` unless `reference` resolves to a verifier.
    pub fn assert_verifier(&self, reference: &str) -> Result<(), CacheError> {
        self.lookup
            .lookup(reference)
            .map(|_| ())
            .map_err(|source| CacheError::InvalidVerifier {
                reference: reference.to_string(),
                source,
            })
    }

    /// Whether `record` may still be served.
    ///
    /// Records without a verifier are valid. A reference that no longer
    /// resolves makes the record invalid; the lookup error is not propagated.
    pub fn verify_validity(
        &self,
        id: &ResponseIdentity,
        record: &CacheRecord,
        now: OffsetDateTime,
    ) -> bool {
        let Some(reference) = record.verifier_ref.as_deref() else {
            return true;
        };

        match self.lookup.lookup(reference) {
            Ok(verifier) => {
                let valid = verifier.is_valid(id, record, now);
                debug!(verifier = reference, identity = %id, valid, "Verifier consulted");
                valid
            }
            Err(error) => {
                warn!(
                    verifier = reference,
                    identity = %id,
                    error = %error,
                    "Verifier lookup failed on read; treating record as invalid"
                );
                false
            }
        }
    }
}

impl Default for CacheVerifying {
    fn default() -> Self {
        Self::new(Arc::new(VerifierRegistry::new()))
    }
}
