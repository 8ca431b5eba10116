//! In-Process Cache Tier
//!
//! Lock-free concurrent cache keyed by request digest. Entries expire lazily
//! on read; when capacity is exceeded, the oldest 20% of entries by last
//! access are evicted in one batch so eviction cost amortizes across many
//! inserts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::constants::cache as cache_constants;

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct LocalEntry {
    value: Value,
    inserted_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
}

impl LocalEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Concurrent in-process cache with TTL and batch LRU eviction
pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(cache_constants::LOCAL_CAPACITY)
    }
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Look up a value, expiring it lazily if its TTL has passed
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired() {
                    true
                } else {
                    entry.last_accessed = Instant::now();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            self.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Insert a value with the given TTL, evicting in batch when over capacity
    pub fn set(&self, key: String, value: Value, ttl: Duration) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_batch();
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            LocalEntry {
                value,
                inserted_at: now,
                last_accessed: now,
                ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries eagerly (periodic sweep)
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Evict the oldest fraction of entries by last access time
    fn evict_batch(&self) {
        let batch = (self.capacity * cache_constants::EVICT_FRACTION_PCT / 100).max(1);

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed))
            .collect();
        by_age.sort_by_key(|(_, accessed)| *accessed);

        for (key, _) in by_age.into_iter().take(batch) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = LocalCache::new(10);
        cache.set("a".to_string(), json!(1), Duration::from_secs(60));

        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("b"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = LocalCache::new(10);
        cache.set("a".to_string(), json!(1), Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_batch_eviction_removes_oldest() {
        let cache = LocalCache::new(10);
        for i in 0..10 {
            cache.set(format!("k{}", i), json!(i), Duration::from_secs(60));
            std::thread::sleep(Duration::from_millis(2));
        }

        // Touch the newest half so the oldest half is the eviction pool
        for i in 5..10 {
            let _ = cache.get(&format!("k{}", i));
        }

        cache.set("overflow".to_string(), json!(99), Duration::from_secs(60));

        // 20% of capacity 10 = 2 evicted, plus the new entry
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.get("overflow").is_some());
        assert!(cache.get("k9").is_some());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let cache = LocalCache::new(10);
        cache.set("stale".to_string(), json!(1), Duration::from_millis(1));
        cache.set("fresh".to_string(), json!(2), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(10));
        let removed = cache.sweep();

        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = LocalCache::new(10);
        cache.set("a".to_string(), json!(1), Duration::from_secs(60));
        cache.set("b".to_string(), json!(2), Duration::from_secs(60));

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
