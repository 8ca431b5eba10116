//! Health Command
//!
//! Probe every configured provider backend and report reachability.

use crate::cli::output::Output;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::types::{GatewayError, Result};

pub async fn run(config: &GatewayConfig, format: &str) -> Result<()> {
    let gateway = Gateway::new(config)?;
    let reports = gateway.health_check().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let output = Output::new();
        output.section("Provider Health");
        for report in &reports {
            if report.healthy {
                output.success(&report.id);
            } else {
                output.error(&format!(
                    "{}: {}",
                    report.id,
                    report.detail.as_deref().unwrap_or("unreachable")
                ));
            }
        }
    }

    if reports.iter().all(|r| !r.healthy) {
        return Err(GatewayError::unavailable(
            "all",
            "no provider backend is reachable",
        ));
    }

    Ok(())
}
