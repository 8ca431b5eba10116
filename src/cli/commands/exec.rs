//! Exec Command
//!
//! Run a single task through the gateway from the command line. Context is
//! supplied as a JSON object; the response prints as JSON or as a short
//! human-readable summary.

use serde_json::Value;

use crate::cli::output::Output;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::types::{GatewayError, Result, TaskRequest, TaskType};

pub struct ExecOptions {
    /// Task type name (similarity_search, analysis, suggestion, completion)
    pub task: String,
    /// Context payload as a JSON object string
    pub context: Option<String>,
    /// Shortcut: sets context.query without full JSON
    pub query: Option<String>,
    /// Result size cap
    pub limit: Option<usize>,
    /// Preferred provider id
    pub provider: Option<String>,
    /// Caller id recorded on the trace
    pub caller: Option<String>,
    /// Output format: text or json
    pub format: String,
}

pub async fn run(config: &GatewayConfig, opts: ExecOptions) -> Result<()> {
    let task_type: TaskType = opts
        .task
        .parse()
        .map_err(GatewayError::Config)?;

    let mut request = TaskRequest::new(task_type);

    if let Some(raw) = &opts.context {
        let parsed: Value = serde_json::from_str(raw)?;
        match parsed {
            Value::Object(map) => {
                for (key, value) in map {
                    request.context.insert(key, value);
                }
            }
            _ => {
                return Err(GatewayError::Config(
                    "--context must be a JSON object".to_string(),
                ));
            }
        }
    }

    if let Some(query) = opts.query {
        request
            .context
            .insert("query".to_string(), Value::String(query));
    }
    if let Some(limit) = opts.limit {
        request = request.with_limit(limit);
    }
    if let Some(provider) = opts.provider {
        request = request.with_preference(provider);
    }

    if request.context.is_empty() {
        return Err(GatewayError::Config(
            "Provide --context or --query".to_string(),
        ));
    }

    let gateway = Gateway::new(config)?;
    let response = gateway
        .execute_task_for(&request, opts.caller.as_deref())
        .await?;

    if opts.format == "json" {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let output = Output::new();
    if response.success {
        output.success(&format!("Served by {}", response.provider));
    } else {
        output.warning(&format!(
            "Degraded response ({})",
            response
                .metadata
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no live provider")
        ));
    }
    if response.fallback_used {
        output.info("A fallback tier produced this result");
    }
    if let (Some(tokens), Some(cost)) = (response.tokens, response.cost_usd) {
        output.field("tokens", tokens);
        output.field("cost", format!("${cost:.6}"));
    }
    println!("{}", serde_json::to_string_pretty(&response.content)?);

    Ok(())
}
