//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/promptgate/config.toml)
//! 3. Local config (./promptgate.toml)
//! 4. Environment variables (PROMPTGATE_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use super::types::GatewayConfig;
use crate::types::{GatewayError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → local → env vars
    pub fn load() -> Result<GatewayConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(GatewayConfig::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let local_path = Self::local_config_path();
        if local_path.exists() {
            debug!("Loading local config from: {}", local_path.display());
            figment = figment.merge(Toml::file(&local_path));
        }

        // e.g. PROMPTGATE_LIMITS_MAX_CONCURRENT -> limits.max_concurrent
        figment = figment.merge(Env::prefixed("PROMPTGATE_").split('_').lowercase(true));

        let config: GatewayConfig = figment
            .extract()
            .map_err(|e| GatewayError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<GatewayConfig> {
        let config: GatewayConfig = Figment::new()
            .merge(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| GatewayError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/promptgate/)
    pub fn global_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "promptgate").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to the default shared cache database
    pub fn global_cache_db() -> Option<PathBuf> {
        ProjectDirs::from("", "", "promptgate")
            .map(|dirs| dirs.cache_dir().join("responses.sqlite"))
    }

    /// Get path to local config file (current directory)
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("promptgate.toml")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global: {} {}", exists, global.display());
        } else {
            println!("  Global: (not available)");
        }

        let local = Self::local_config_path();
        let exists = if local.exists() { "✓" } else { "✗" };
        println!("  Local:  {} {}", exists, local.display());

        if let Some(cache) = Self::global_cache_db() {
            let exists = if cache.exists() { "✓" } else { "✗" };
            println!("  Cache:  {} {}", exists, cache.display());
        }
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config)
                    .map_err(|e| GatewayError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write a starter config file; `force` overwrites an existing one
    pub fn init(global: bool, force: bool) -> Result<PathBuf> {
        let config_path = if global {
            let dir = Self::global_dir().ok_or_else(|| {
                GatewayError::Config("Cannot determine global config directory".to_string())
            })?;
            fs::create_dir_all(&dir)?;
            dir.join("config.toml")
        } else {
            Self::local_config_path()
        };

        if config_path.exists() && !force {
            info!("Config exists: {}", config_path.display());
            return Ok(config_path);
        }

        fs::write(&config_path, Self::default_config_template())?;
        info!("Created config: {}", config_path.display());

        Ok(config_path)
    }

    /// Generate default config content (TOML)
    fn default_config_template() -> String {
        r#"# PromptGate Configuration
# Environment variables (PROMPTGATE_*) override values in this file.

version = "1.0"
enabled = true

# Provider backends, in declaration order.
# Supported kinds: openai, ollama
[[providers]]
kind = "ollama"
model = "llama3.2"
api_base = "http://localhost:11434"

# [[providers]]
# kind = "openai"
# model = "gpt-4o-mini"
# # api_key falls back to the OPENAI_API_KEY environment variable
# [providers.cost_per_1k]
# "gpt-4o-mini" = 0.00015

# Admission control ceilings
[limits]
max_concurrent = 10
max_requests_per_minute = 60
max_tokens_per_minute = 90000
max_cost_per_hour = 10.0

# Response cache; set shared_path to enable the cross-process tier
[cache]
local_capacity = 1000
# shared_path = "/var/lib/promptgate/responses.sqlite"

# Chain execution and circuit breaker tuning
[dispatch]
max_total_attempts = 10
breaker_failure_threshold = 5
breaker_cooldown_secs = 30

# Recovery tiers, tried in order
[fallback]
strategies = [
    "immediate",
    "delayed",
    "cached",
    "simplified",
    "graceful_degradation",
]
"#
        .to_string()
    }
}
