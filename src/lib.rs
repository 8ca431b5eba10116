//! PromptGate - Resilient Dispatch Gateway for AI Completion Providers
//!
//! A single façade for dispatching completion tasks across multiple AI
//! providers with layered resilience: admission control, adaptive routing,
//! circuit breaking, tiered response caching, and an ordered fallback
//! pipeline that always yields a structurally valid response.
//!
//! ## Core Features
//!
//! - **Provider Chain**: cost- and performance-ordered dispatch with
//!   per-provider retries and error classification
//! - **Circuit Breakers**: one authoritative breaker per provider with
//!   cooldown and half-open trials
//! - **Fallback Tiers**: immediate, delayed, cached, simplified, and
//!   provider-free graceful degradation
//! - **Two-Tier Cache**: in-process tier plus an optional sqlite tier
//!   shared across processes
//! - **Admission Control**: concurrency, request, token, and cost ceilings
//!   enforced before any provider is contacted
//!
//! ## Quick Start
//!
//! ```ignore
//! use promptgate::config::ConfigLoader;
//! use promptgate::gateway::Gateway;
//!
//! let config = ConfigLoader::load()?;
//! let gateway = Gateway::new(&config)?;
//! let response = gateway
//!     .similarity_search("brake pads", candidates, 5)
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: façade, dispatch chain, routing policy, fallback tiers
//! - [`provider`]: completion backends and circuit breakers
//! - [`cache`]: two-tier response cache
//! - [`limits`]: admission control and resource pooling
//! - [`telemetry`]: request tracing and per-provider metrics
//! - [`config`]: hierarchical configuration

pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod gateway;
pub mod limits;
pub mod provider;
pub mod telemetry;
pub mod timeout;
pub mod tokenizer;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{ConfigLoader, GatewayConfig};

// Error Types
pub use types::{ErrorCategory, GatewayError, ProviderError, Result};

// Task Model
pub use types::{CorrelationId, TaskRequest, TaskResponse, TaskType};

// Gateway
pub use gateway::{FallbackStrategy, Gateway, GatewayStatus, ProviderStatus};

// Providers
pub use provider::{
    HttpPool, Provider, ProviderResponse, ProviderSettings, SharedProvider, default_http_pool,
};

// Timeout
pub use timeout::with_timeout;
