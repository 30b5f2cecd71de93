use thiserror::Error;

use super::kv::StoreError;
use super::verifier::LookupError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache verifier `{reference}`: {source}")]
    InvalidVerifier {
        reference: String,
        #[source]
        source: LookupError,
    },
    #[error("response cache engine is closed")]
    Closed,
    #[error("cache store failure: {0}")]
    Store(#[from] StoreError),
}
