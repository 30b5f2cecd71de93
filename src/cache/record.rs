//! Cache records: a payload plus the tags and verifier attached to it.

use serde::{Deserialize, Serialize};

use super::characteristics::Characteristics;
use super::payload::CachedPayload;

/// A cached response together with its invalidation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub payload: CachedPayload,
    /// Application-assigned tags used by `remove_by_characteristics`.
    #[serde(default)]
    pub tag_characteristics: Characteristics,
    /// Reference to a registered verifier consulted on every read.
    #[serde(default)]
    pub verifier_ref: Option<String>,
}

impl CacheRecord {
    pub fn new(payload: CachedPayload) -> Self {
        Self {
            payload,
            tag_characteristics: Characteristics::new(),
            verifier_ref: None,
        }
    }

    pub fn with_tags(mut self, tags: Characteristics) -> Self {
        self.tag_characteristics = tags;
        self
    }

    pub fn with_verifier(mut self, reference: impl Into<String>) -> Self {
        self.verifier_ref = Some(reference.into());
        self
    }
}
