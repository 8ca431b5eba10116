//! Status Command
//!
//! Display the gateway's provider, usage, and cache state.

use crate::cli::output::Output;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::types::Result;

pub fn run(config: &GatewayConfig, format: &str) -> Result<()> {
    let gateway = Gateway::new(config)?;
    let status = gateway.status();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let output = Output::new();

    output.section("Providers");
    for provider in &status.providers {
        output.field(
            &provider.id,
            format!(
                "health={} breaker={} weight={:.2}",
                provider.health, provider.breaker_state, provider.weight
            ),
        );
    }

    output.section("Usage");
    output.field("in flight", status.usage.in_flight);
    output.field("requests (1m)", status.usage.requests_last_minute);
    output.field("tokens (1m)", status.usage.tokens_last_minute);
    output.field(
        "spend (1h)",
        format!("${:.4}", status.usage.cost_last_hour_usd),
    );
    output.field(
        "rejected",
        format!(
            "rate={} slot={}",
            status.usage.rejected_rate, status.usage.rejected_slot
        ),
    );

    output.section("Cache");
    output.field("local entries", status.cache.local.entries);
    output.field(
        "local hit rate",
        format!("{:.1}%", status.cache.local.hit_rate() * 100.0),
    );
    match status.cache.shared_entries {
        Some(entries) => output.field("shared entries", entries),
        None => output.field("shared tier", "disabled"),
    }

    output.section("Connections");
    output.field("pooled clients", status.http_pool.live);
    output.field("idle", status.http_pool.idle);

    Ok(())
}
