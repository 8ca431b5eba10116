//! Config Command
//!
//! Inspect and initialize gateway configuration.

use crate::cli::output::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the merged effective configuration
pub fn show(format: &str) -> Result<()> {
    ConfigLoader::show_config(format == "json")
}

/// Show configuration file paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Write a starter config file
pub fn init(global: bool, force: bool) -> Result<()> {
    let output = Output::new();
    let path = ConfigLoader::init(global, force)?;
    output.success(&format!("Config ready: {}", path.display()));
    output.info("Edit the provider list, then run 'promptgate check'");
    Ok(())
}

/// Load, validate, and summarize the effective configuration
pub fn check(config_file: Option<&std::path::Path>) -> Result<()> {
    let output = Output::new();

    let config = match config_file {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    output.success("Configuration is valid");
    output.field("enabled", config.enabled);
    output.field("providers", config.providers.len());
    for settings in &config.providers {
        output.field(
            "",
            format!(
                "{} ({}{})",
                settings.provider_id(),
                settings.kind,
                settings
                    .model
                    .as_deref()
                    .map(|m| format!(", model {m}"))
                    .unwrap_or_default()
            ),
        );
    }
    output.field("max_concurrent", config.limits.max_concurrent);
    output.field("cost ceiling (USD/h)", config.limits.max_cost_per_hour);
    output.field(
        "shared cache",
        config
            .cache
            .shared_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string()),
    );
    output.field("fallback tiers", config.fallback.strategies.join(" → "));

    Ok(())
}
