//! Tally CLI - fleet telemetry from the shell
//!
//! Usage:
//!   tally identity                        Resolve and print the instance id
//!   tally emit --type T --application A   Send one synthetic event
//!   tally init [FILE]                     Write a default config file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tally_core::{Event, Metadata, TelemetryConfig};
use tally_identity::{BackendSelector, InstanceIdSupplier};
use tally_listener::{ProcessOutcome, TelemetryRuntime};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about = "Fleet telemetry reporting")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = "tally.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the instance id, consulting the coordination store if configured
    Identity,

    /// Send one event through the telemetry listener
    Emit {
        /// Event type, e.g. orca:pipeline:complete
        #[arg(long = "type", value_name = "TYPE")]
        event_type: String,

        /// Application the event belongs to
        #[arg(long)]
        application: String,

        /// Event content as a JSON object
        #[arg(long, default_value = "{}")]
        content: String,
    },

    /// Write a default configuration file
    Init {
        /// Destination (defaults to the --config path)
        file: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Identity => cmd_identity(&cli.config).await,
        Commands::Emit {
            event_type,
            application,
            content,
        } => cmd_emit(&cli.config, event_type, application, &content).await,
        Commands::Init { file, force } => cmd_init(file.unwrap_or(cli.config), force),
    }
}

fn load_config(path: &Path) -> Result<TelemetryConfig> {
    TelemetryConfig::load_or_default(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn cmd_identity(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let selector = BackendSelector::from_config(&config.coordination).await;

    let supplier = InstanceIdSupplier::resolve(&config, Some(&selector)).await;
    println!("{}", supplier.unique_id());
    Ok(())
}

async fn cmd_emit(
    config_path: &Path,
    event_type: String,
    application: String,
    content: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let content: Map<String, Value> =
        serde_json::from_str(content).context("--content must be a JSON object")?;

    let runtime = TelemetryRuntime::bootstrap(&config)
        .await
        .context("Failed to start telemetry")?;

    let Some(listener) = runtime.listener() else {
        println!("Telemetry is disabled in {}", config_path.display());
        return Ok(());
    };

    let event = Event::new(Metadata::new(event_type, application), content);
    match listener.handle(&event).await {
        ProcessOutcome::Ignored => println!("Not reportable, nothing sent"),
        ProcessOutcome::Dispatched(outcome) => println!("Dispatch outcome: {:?}", outcome),
        ProcessOutcome::Faulted => println!("Telemetry faulted, see log"),
    }
    Ok(())
}

fn cmd_init(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    TelemetryConfig::write_default(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
