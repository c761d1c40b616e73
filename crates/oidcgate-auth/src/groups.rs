//! Identity to groups cache.
//!
//! After each successful authentication the gate records the user's groups
//! and roles under the user id, so downstream authorization code can look
//! them up by the principal name alone. The cache is injected into the gate
//! rather than held globally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

/// Default maximum number of identities kept.
pub const DEFAULT_MAX_ENTRIES: u64 = 1000;

/// Default time an entry lives after it was written.
pub const DEFAULT_TTL: Duration = Duration::from_secs(59 * 60);

/// Storage for identity to groups mappings.
#[async_trait]
pub trait GroupCache: Send + Sync {
    /// Records the groups of an identity, replacing any previous entry.
    async fn record(&self, identity: &str, groups: Vec<String>);

    /// Returns the recorded groups, or an empty list if unknown or evicted.
    async fn lookup(&self, identity: &str) -> Vec<String>;
}

/// Bounded in-memory cache with time-to-live eviction.
#[derive(Clone)]
pub struct InMemoryGroupCache {
    cache: Cache<String, Arc<Vec<String>>>,
}

impl InMemoryGroupCache {
    /// Creates a cache with explicit bounds.
    #[must_use]
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Number of live entries. Approximate until pending maintenance runs.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for InMemoryGroupCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[async_trait]
impl GroupCache for InMemoryGroupCache {
    async fn record(&self, identity: &str, groups: Vec<String>) {
        tracing::debug!(identity, groups = ?groups, "Recording groups");
        self.cache.insert(identity.to_string(), Arc::new(groups)).await;
    }

    async fn lookup(&self, identity: &str) -> Vec<String> {
        self.cache
            .get(identity)
            .await
            .map(|groups| groups.as_ref().clone())
            .unwrap_or_default()
    }
}
