//! Mediascribe CLI - Command-line interface for the transcription job server.
//!
//! Provides commands for dispatching jobs, bulk operations, maintenance,
//! health, and local configuration.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{bulk, config, health, job, maintenance};
use output::OutputFormat;

/// Mediascribe - Transcription Job Orchestration CLI
#[derive(Parser)]
#[command(
    name = "mediascribe",
    version,
    about = "Mediascribe - Transcription Job Orchestration",
    long_about = "CLI tool for dispatching transcription jobs, tracking bulk operations, and maintaining the job store.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format [default: the `output` setting, else table]
    #[arg(short, long, global = true)]
    output: Option<OutputFormat>,

    /// API server URL
    #[arg(long, global = true, env = "MEDIASCRIBE_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Bulk operations
    #[command(subcommand)]
    Bulk(bulk::BulkCommands),

    /// Store maintenance
    #[command(subcommand)]
    Maintenance(maintenance::MaintenanceCommands),

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = config::CliConfig::load().unwrap_or_else(|e| {
        output::print_warning(&format!("Ignoring CLI settings: {:#}", e));
        config::CliConfig::default()
    });

    let api_url = cli
        .api_url
        .clone()
        .or(settings.api_url)
        .unwrap_or_else(|| config::DEFAULT_API_URL.to_string());
    let format = cli.output.or(settings.output).unwrap_or_default();

    let client = client::ApiClient::new(&api_url)?;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Bulk(cmd) => bulk::execute(cmd, &client, format).await,
        Commands::Maintenance(cmd) => maintenance::execute(cmd, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
