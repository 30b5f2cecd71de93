//! Cache configuration.
//!
//! Controls the response cache layer via `respcache.toml`.

use serde::Deserialize;

use super::kv::Partition;

// Default values for cache configuration
const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Cache configuration from `respcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the HTTP response cache layer.
    pub enabled: bool,
    /// Lifetime of responses cached by the layer.
    pub default_ttl_seconds: u64,
    /// Store responses in the shared partition instead of the local one.
    pub shared_partition: bool,
    /// Largest body the layer buffers for caching.
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            shared_partition: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_seconds: settings.default_ttl.get(),
            shared_partition: settings.shared_partition,
            max_body_bytes: settings.max_body_bytes.get(),
        }
    }
}

impl CacheConfig {
    /// Partition the layer reads from and writes to.
    pub fn partition(&self) -> Partition {
        Partition::from_shared(self.shared_partition)
    }

    /// Lifetime as a `time::Duration`, clamped to at least one second.
    pub fn default_ttl(&self) -> time::Duration {
        let seconds = i64::try_from(self.default_ttl_seconds.max(1)).unwrap_or(i64::MAX);
        time::Duration::seconds(seconds)
    }
}
