//! Two-Tier Response Cache
//!
//! Completed task responses are cached under a content-derived key in two
//! tiers: a fast in-process tier and an optional sqlite-backed tier shared
//! across processes. Reads check local first and promote shared hits into
//! the local tier. TTLs vary by task class; search results go stale faster
//! than analysis results.
//!
//! ## Modules
//!
//! - `key`: canonical-JSON SHA-256 key derivation
//! - `local`: in-process DashMap tier with batch LRU eviction
//! - `shared`: cross-process sqlite tier via r2d2

pub mod key;
mod local;
mod shared;

pub use local::{CacheStats, LocalCache};
pub use shared::SharedCache;

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::constants::cache as cache_constants;
use crate::types::{Result, TaskRequest, TaskType};

/// Per-task-class TTL policy
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub default: Duration,
    pub search: Duration,
    pub analysis: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(cache_constants::DEFAULT_TTL_SECS),
            search: Duration::from_secs(cache_constants::SEARCH_TTL_SECS),
            analysis: Duration::from_secs(cache_constants::ANALYSIS_TTL_SECS),
        }
    }
}

impl TtlPolicy {
    /// TTL for a task type
    pub fn ttl_for(&self, task_type: TaskType) -> Duration {
        match task_type {
            TaskType::SimilaritySearch => self.search,
            TaskType::Analysis => self.analysis,
            TaskType::Suggestion | TaskType::Completion => self.default,
        }
    }
}

/// Combined stats for both tiers
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TieredCacheStats {
    pub local: CacheStats,
    pub shared_entries: Option<usize>,
    pub shared_hits: u64,
}

/// Two-tier response cache façade
pub struct ResponseCache {
    local: LocalCache,
    shared: Option<SharedCache>,
    ttls: TtlPolicy,
    shared_hits: std::sync::atomic::AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::local_only(cache_constants::LOCAL_CAPACITY, TtlPolicy::default())
    }
}

impl ResponseCache {
    /// Cache with only the in-process tier
    pub fn local_only(capacity: usize, ttls: TtlPolicy) -> Self {
        Self {
            local: LocalCache::new(capacity),
            shared: None,
            ttls,
            shared_hits: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Cache with both tiers, shared tier backed by sqlite at `path`
    pub fn with_shared<P: AsRef<Path>>(
        capacity: usize,
        ttls: TtlPolicy,
        path: P,
    ) -> Result<Self> {
        Ok(Self {
            local: LocalCache::new(capacity),
            shared: Some(SharedCache::open(path)?),
            ttls,
            shared_hits: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Both tiers with an in-memory shared tier (tests)
    #[cfg(test)]
    pub fn with_shared_in_memory(capacity: usize, ttls: TtlPolicy) -> Result<Self> {
        Ok(Self {
            local: LocalCache::new(capacity),
            shared: Some(SharedCache::open_in_memory()?),
            ttls,
            shared_hits: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Look up a cached response for this request
    pub fn get(&self, request: &TaskRequest) -> Option<Value> {
        let cache_key = key::request_key(request);

        if let Some(value) = self.local.get(&cache_key) {
            debug!(key = %&cache_key[..12], "Local cache hit");
            return Some(value);
        }

        // Shared tier failures degrade to a miss, never an error
        if let Some(shared) = &self.shared {
            match shared.get(&cache_key) {
                Ok(Some(value)) => {
                    debug!(key = %&cache_key[..12], "Shared cache hit, promoting");
                    self.shared_hits
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    self.local.set(
                        cache_key,
                        value.clone(),
                        self.ttls.ttl_for(request.task_type),
                    );
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Shared cache read failed"),
            }
        }

        None
    }

    /// Store a response in both tiers
    pub fn set(&self, request: &TaskRequest, value: &Value) {
        let cache_key = key::request_key(request);
        let ttl = self.ttls.ttl_for(request.task_type);

        self.local.set(cache_key.clone(), value.clone(), ttl);

        if let Some(shared) = &self.shared
            && let Err(e) = shared.set(&cache_key, value, ttl)
        {
            warn!(error = %e, "Shared cache write failed");
        }
    }

    /// Remove the cached response for a request
    pub fn delete(&self, request: &TaskRequest) {
        let cache_key = key::request_key(request);
        self.local.delete(&cache_key);

        if let Some(shared) = &self.shared
            && let Err(e) = shared.delete(&cache_key)
        {
            warn!(error = %e, "Shared cache delete failed");
        }
    }

    /// Drop everything from both tiers
    pub fn clear(&self) {
        self.local.clear();
        if let Some(shared) = &self.shared
            && let Err(e) = shared.clear()
        {
            warn!(error = %e, "Shared cache clear failed");
        }
    }

    /// Remove expired entries from both tiers
    pub fn sweep(&self) {
        let local_removed = self.local.sweep();
        let shared_removed = match &self.shared {
            Some(shared) => shared.sweep().unwrap_or_else(|e| {
                warn!(error = %e, "Shared cache sweep failed");
                0
            }),
            None => 0,
        };

        if local_removed > 0 || shared_removed > 0 {
            debug!(local_removed, shared_removed, "Cache sweep complete");
        }
    }

    pub fn stats(&self) -> TieredCacheStats {
        TieredCacheStats {
            local: self.local.stats(),
            shared_entries: self.shared.as_ref().and_then(|s| s.len().ok()),
            shared_hits: self.shared_hits.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> TaskRequest {
        TaskRequest::new(TaskType::Analysis).with_context("q", json!("widgets"))
    }

    #[test]
    fn test_local_roundtrip() {
        let cache = ResponseCache::default();
        let req = request();

        assert!(cache.get(&req).is_none());
        cache.set(&req, &json!({"analysis": {}}));
        assert!(cache.get(&req).is_some());
    }

    #[test]
    fn test_shared_hit_promotes_to_local() {
        let cache =
            ResponseCache::with_shared_in_memory(100, TtlPolicy::default()).unwrap();
        let req = request();

        cache.set(&req, &json!({"analysis": {}}));

        // Simulate a fresh process: local tier empty, shared retains the entry
        cache.local.clear();
        assert!(cache.get(&req).is_some());
        assert_eq!(cache.stats().shared_hits, 1);

        // Promoted: second read is a local hit
        assert!(cache.get(&req).is_some());
        assert_eq!(cache.stats().shared_hits, 1);
    }

    #[test]
    fn test_ttl_policy_per_task_class() {
        let ttls = TtlPolicy::default();
        assert!(ttls.ttl_for(TaskType::SimilaritySearch) < ttls.ttl_for(TaskType::Analysis));
        assert_eq!(ttls.ttl_for(TaskType::Completion), ttls.default);
    }

    #[test]
    fn test_delete_removes_from_both_tiers() {
        let cache =
            ResponseCache::with_shared_in_memory(100, TtlPolicy::default()).unwrap();
        let req = request();

        cache.set(&req, &json!(1));
        cache.delete(&req);
        assert!(cache.get(&req).is_none());
    }

    #[test]
    fn test_different_contexts_do_not_collide() {
        let cache = ResponseCache::default();
        let a = TaskRequest::new(TaskType::Analysis).with_context("q", json!("a"));
        let b = TaskRequest::new(TaskType::Analysis).with_context("q", json!("b"));

        cache.set(&a, &json!("for-a"));
        assert!(cache.get(&b).is_none());
    }
}
