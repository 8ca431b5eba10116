//! Generic Resource Pool
//!
//! Bounded pool of reusable resources (HTTP clients, session handles) with
//! min/max sizing, acquire timeouts, and maintenance that reaps idle or
//! unhealthy entries. Resources are created lazily up to `max_size`; the
//! pool pre-warms `min_size` on construction.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::constants::pool as pool_constants;
use crate::types::{GatewayError, Result};

/// Builds and validates pooled resources
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Resource: Send;

    async fn create(&self) -> Result<Self::Resource>;

    /// Whether a pooled resource is still usable
    async fn is_healthy(&self, resource: &Self::Resource) -> bool;
}

/// Pool sizing and maintenance configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout: Duration,
    /// Idle entries older than this are reaped during maintenance
    pub idle_reap_after: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: pool_constants::MIN_SIZE,
            max_size: pool_constants::MAX_SIZE,
            acquire_timeout: Duration::from_secs(pool_constants::ACQUIRE_TIMEOUT_SECS),
            idle_reap_after: Duration::from_secs(pool_constants::IDLE_REAP_SECS),
        }
    }
}

struct IdleEntry<R> {
    resource: R,
    parked_at: Instant,
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleEntry<F::Resource>>>,
    /// Live resources, checked-out plus idle
    total: AtomicUsize,
    slots: Semaphore,
}

/// Bounded resource pool
pub struct ResourcePool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let max = config.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(VecDeque::new()),
                total: AtomicUsize::new(0),
                slots: Semaphore::new(max),
                config: PoolConfig {
                    max_size: max,
                    ..config
                },
            }),
        }
    }

    /// Create the pool and eagerly build `min_size` resources
    pub async fn with_warmup(factory: F, config: PoolConfig) -> Result<Self> {
        let pool = Self::new(factory, config);
        for _ in 0..pool.inner.config.min_size {
            let resource = pool.inner.factory.create().await?;
            pool.inner.total.fetch_add(1, Ordering::SeqCst);
            pool.park(resource);
        }
        Ok(pool)
    }

    /// Acquire a resource, creating one if under capacity.
    ///
    /// Waits up to the configured acquire timeout when the pool is saturated.
    pub async fn acquire(&self) -> Result<PoolGuard<F>> {
        let permit = tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.slots.acquire(),
        )
        .await
        .map_err(|_| GatewayError::timeout("pool acquire", self.inner.config.acquire_timeout))?
        .map_err(|_| GatewayError::Pool("pool closed".to_string()))?;

        // Capacity is reserved; the permit can be forgotten because release
        // and reaping both add permits back explicitly.
        permit.forget();

        if let Some(entry) = self.pop_idle() {
            return Ok(PoolGuard {
                resource: Some(entry.resource),
                pool: self.clone(),
            });
        }

        match self.inner.factory.create().await {
            Ok(resource) => {
                self.inner.total.fetch_add(1, Ordering::SeqCst);
                Ok(PoolGuard {
                    resource: Some(resource),
                    pool: self.clone(),
                })
            }
            Err(e) => {
                self.inner.slots.add_permits(1);
                Err(e)
            }
        }
    }

    /// Reap stale idle entries and drop unhealthy ones.
    ///
    /// Keeps at least `min_size` live resources.
    pub async fn maintain(&self) {
        let candidates: Vec<IdleEntry<F::Resource>> = {
            let mut idle = self
                .inner
                .idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *idle).into()
        };

        let mut kept: VecDeque<IdleEntry<F::Resource>> = VecDeque::new();
        let mut reaped = 0usize;

        for entry in candidates {
            let total = self.inner.total.load(Ordering::SeqCst);
            let stale = entry.parked_at.elapsed() >= self.inner.config.idle_reap_after;
            let above_min = total > self.inner.config.min_size;

            if stale && above_min {
                self.drop_resource();
                reaped += 1;
                continue;
            }

            if self.inner.factory.is_healthy(&entry.resource).await {
                kept.push_back(entry);
            } else {
                warn!("Reaping unhealthy pooled resource");
                self.drop_resource();
                reaped += 1;
            }
        }

        {
            let mut idle = self
                .inner
                .idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            idle.extend(kept);
        }

        if reaped > 0 {
            debug!(reaped, "Pool maintenance complete");
        }
    }

    /// Live resources (checked-out plus idle)
    pub fn size(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }

    /// Resources parked and ready for reuse
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn pop_idle(&self) -> Option<IdleEntry<F::Resource>> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn park(&self, resource: F::Resource) {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(IdleEntry {
                resource,
                parked_at: Instant::now(),
            });
    }

    fn drop_resource(&self) {
        self.inner.total.fetch_sub(1, Ordering::SeqCst);
        self.inner.slots.add_permits(1);
    }

    fn release(&self, resource: F::Resource, unhealthy: bool) {
        if unhealthy {
            self.drop_resource();
        } else {
            self.park(resource);
            self.inner.slots.add_permits(1);
        }
    }
}

/// Checked-out resource; parks itself back on drop
pub struct PoolGuard<F: ResourceFactory> {
    resource: Option<F::Resource>,
    pool: ResourcePool<F>,
}

impl<F: ResourceFactory> PoolGuard<F> {
    /// Mark the resource broken; it is dropped instead of returned
    pub fn discard(mut self) {
        if let Some(resource) = self.resource.take() {
            drop(resource);
            self.pool.drop_resource();
        }
    }
}

impl<F: ResourceFactory> std::ops::Deref for PoolGuard<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        self.resource
            .as_ref()
            .expect("resource present until drop")
    }
}

impl<F: ResourceFactory> std::ops::DerefMut for PoolGuard<F> {
    fn deref_mut(&mut self) -> &mut F::Resource {
        self.resource
            .as_mut()
            .expect("resource present until drop")
    }
}

impl<F: ResourceFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct CountingFactory {
        created: AtomicUsize,
        healthy: AtomicBool,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                healthy: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl ResourceFactory for CountingFactory {
        type Resource = usize;

        async fn create(&self) -> Result<usize> {
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn is_healthy(&self, _resource: &usize) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn small_config(max: usize) -> PoolConfig {
        PoolConfig {
            min_size: 0,
            max_size: max,
            acquire_timeout: Duration::from_millis(50),
            idle_reap_after: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_parked_resource() {
        let pool = ResourcePool::new(CountingFactory::new(), small_config(2));

        let first = pool.acquire().await.unwrap();
        let id = *first;
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(*second, id);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let pool = ResourcePool::new(CountingFactory::new(), small_config(1));

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_discard_frees_capacity() {
        let pool = ResourcePool::new(CountingFactory::new(), small_config(1));

        let guard = pool.acquire().await.unwrap();
        guard.discard();
        assert_eq!(pool.size(), 0);

        // Capacity came back
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_warmup_builds_min_size() {
        let pool = ResourcePool::with_warmup(
            CountingFactory::new(),
            PoolConfig {
                min_size: 2,
                ..small_config(4)
            },
        )
        .await
        .unwrap();

        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_maintain_reaps_idle_above_min() {
        let pool = ResourcePool::new(CountingFactory::new(), small_config(4));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.maintain().await;

        // min_size is 0, everything stale goes
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_maintain_drops_unhealthy() {
        let factory = CountingFactory::new();
        factory.healthy.store(false, Ordering::SeqCst);
        let pool = ResourcePool::new(
            factory,
            PoolConfig {
                idle_reap_after: Duration::from_secs(3600),
                ..small_config(4)
            },
        );

        let guard = pool.acquire().await.unwrap();
        drop(guard);

        pool.maintain().await;
        assert_eq!(pool.size(), 0);
    }
}
