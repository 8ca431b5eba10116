use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptgate::cli::commands;
use promptgate::config::{ConfigLoader, GatewayConfig};

#[derive(Parser)]
#[command(name = "promptgate")]
#[command(
    version,
    about = "Resilient dispatch gateway for AI completion providers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Load configuration from a specific file")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task through the gateway
    Exec {
        #[arg(help = "Task type: similarity_search, analysis, suggestion, completion")]
        task: String,
        #[arg(long, help = "Context payload as a JSON object")]
        context: Option<String>,
        #[arg(long, short, help = "Shortcut for a query-only context")]
        query: Option<String>,
        #[arg(long, short, help = "Cap on result size")]
        limit: Option<usize>,
        #[arg(long, short, help = "Preferred provider id")]
        provider: Option<String>,
        #[arg(long, help = "Caller id recorded on the trace")]
        caller: Option<String>,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Probe every configured provider backend
    Health {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Show gateway provider, usage, and cache state
    Status {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Validate the effective configuration
    Check,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a starter configuration file
    Init {
        #[arg(long, short, help = "Initialize the global config")]
        global: bool,
        #[arg(long, help = "Overwrite an existing config")]
        force: bool,
    },
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GatewayConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    Ok(config)
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Exec {
            task,
            context,
            query,
            limit,
            provider,
            caller,
            format,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let rt = Runtime::new()?;
            rt.block_on(commands::exec::run(
                &config,
                commands::exec::ExecOptions {
                    task,
                    context,
                    query,
                    limit,
                    provider,
                    caller,
                    format,
                },
            ))?;
        }
        Commands::Health { format } => {
            let config = load_config(cli.config.as_ref())?;
            let rt = Runtime::new()?;
            rt.block_on(commands::health::run(&config, &format))?;
        }
        Commands::Status { format } => {
            let config = load_config(cli.config.as_ref())?;
            commands::status::run(&config, &format)?;
        }
        Commands::Check => {
            commands::config::check(cli.config.as_deref())?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                commands::config::show(&format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
