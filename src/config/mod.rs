//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/promptgate/config.toml)
//! 3. Local config (./promptgate.toml)
//! 4. Environment variables (PROMPTGATE_*)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
