//! Unified Timeout Handling
//!
//! Centralized deadlines for all suspension points with a helper for
//! wrapping async operations. Expiry surfaces as a typed
//! [`GatewayError::Timeout`]; nothing blocks indefinitely.

use std::future::Future;
use std::time::Duration;

use crate::constants::{limits as limit_constants, network as net_constants, pool as pool_constants};
use crate::types::{GatewayError, Result};

/// Unified timeout configuration for all gateway operations
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Deadline for a single provider call
    pub provider_call: Duration,
    /// Timeout for establishing connections
    pub connection: Duration,
    /// Timeout when waiting for a concurrency slot
    pub slot_acquire: Duration,
    /// Timeout when waiting for a pooled resource
    pub pool_acquire: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_call: Duration::from_secs(net_constants::DEFAULT_TIMEOUT_SECS),
            connection: Duration::from_secs(net_constants::CONNECTION_TIMEOUT_SECS),
            slot_acquire: Duration::from_secs(limit_constants::ACQUIRE_TIMEOUT_SECS),
            pool_acquire: Duration::from_secs(pool_constants::ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl TimeoutConfig {
    /// Shorter deadlines for latency-sensitive callers
    pub fn fast() -> Self {
        Self {
            provider_call: Duration::from_secs(30),
            connection: Duration::from_secs(10),
            slot_acquire: Duration::from_secs(2),
            pool_acquire: Duration::from_secs(2),
        }
    }
}

/// Execute an async operation with a deadline.
///
/// Returns [`GatewayError::Timeout`] if the operation does not complete in
/// time; the in-flight future is dropped (abandoned), never silently lost.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout(operation_name, timeout)),
    }
}

/// Variant for futures that return non-Result types
pub async fn with_timeout_map<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(GatewayError::timeout(operation_name, timeout)),
    }
}
