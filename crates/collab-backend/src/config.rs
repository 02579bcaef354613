//! Constructor-injected configuration (spec §9's anti-singleton redesign
//! flag: explicit values created at composition time, not ambient
//! singletons). `Default` gives the reference values named throughout
//! spec.md §4.5/§4.3/§6; builder methods override individual fields.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size caps enforced at the [`crate::backend::ContentBackend`] boundary
/// (spec §4.3, §6). Exceeding one of these yields `EntityTooLarge`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_schema_size: usize,
    pub max_operation_size: usize,
    pub max_snapshot_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_schema_size: 256 * 1024,
            max_operation_size: 1024 * 1024,
            max_snapshot_size: 8 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn with_max_schema_size(mut self, bytes: usize) -> Self {
        self.max_schema_size = bytes;
        self
    }

    pub fn with_max_operation_size(mut self, bytes: usize) -> Self {
        self.max_operation_size = bytes;
        self
    }

    pub fn with_max_snapshot_size(mut self, bytes: usize) -> Self {
        self.max_snapshot_size = bytes;
        self
    }
}

/// Document Cache tuning (spec §4.5): TTL eviction, tail bounds, and the
/// snapshot retention predicate.
#[derive(Clone)]
pub struct CacheConfig {
    /// How long an unreferenced entry survives past last access.
    pub ttl: Duration,
    /// Coarse eviction sweep interval.
    pub eviction_tick: Duration,
    /// Maximum operations held in a cache entry's tail.
    pub tail_limit: usize,
    /// Decides whether a freshly folded snapshot is persisted to the
    /// store. Default: persist every 10th version (spec §4.5 reference
    /// K = 10).
    pub should_store_snapshot: std::sync::Arc<dyn Fn(u64) -> bool + Send + Sync>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(10_000),
            eviction_tick: Duration::from_secs(1),
            tail_limit: 50,
            should_store_snapshot: std::sync::Arc::new(|version| version % 10 == 0),
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_eviction_tick(mut self, tick: Duration) -> Self {
        self.eviction_tick = tick;
        self
    }

    pub fn with_tail_limit(mut self, limit: usize) -> Self {
        self.tail_limit = limit;
        self
    }

    pub fn with_retention_predicate(mut self, predicate: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        self.should_store_snapshot = std::sync::Arc::new(predicate);
        self
    }
}

/// Top-level backend configuration, grouping [`StoreConfig`] and
/// [`CacheConfig`].
#[derive(Clone)]
pub struct BackendConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
