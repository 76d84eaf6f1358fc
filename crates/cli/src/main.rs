//! Zone Sync CLI
//!
//! A command-line tool for pushing locally staged zones and contacts to the
//! remote store and inspecting what is already there.

mod commands;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{settings, sync, whoami, zones};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Zone Sync CLI
#[derive(Parser)]
#[command(name = "zsync")]
#[command(author, version, about = "CLI for zone and contact synchronization", long_about = None)]
pub struct Cli {
    /// Backend project URL (overrides the config file)
    #[arg(long, env = "ZSYNC_API_URL")]
    pub api_url: Option<String>,

    /// Public API key (overrides the config file)
    #[arg(long, env = "ZSYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Session access token (overrides the config file)
    #[arg(long, env = "ZSYNC_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync a batch of staged zones and contacts
    Sync {
        /// Batch file (JSON with zones, contacts, contacts_by_zone)
        #[arg(long, short)]
        batch: PathBuf,

        /// Failure policy (fail-fast, best-effort)
        #[arg(long)]
        policy: Option<String>,

        /// Contact groups uploaded at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Run against an in-memory store instead of the backend
        #[arg(long)]
        dry_run: bool,

        /// Owner id to sync as, instead of resolving the session
        #[arg(long)]
        owner: Option<String>,

        /// Write the batch back with returned remote ids filled in
        #[arg(long)]
        write_back: Option<PathBuf>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// List the owner's remote zones
    Zones {
        /// Owner id, instead of resolving the session
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show the owner id of the current session
    Whoami,

    /// Show or change stored settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show stored settings
    Show,

    /// Store settings in the config file
    Set {
        /// Backend project URL
        #[arg(long)]
        api_url: Option<String>,

        /// Public API key
        #[arg(long)]
        api_key: Option<String>,

        /// Session access token
        #[arg(long)]
        access_token: Option<String>,
    },
}

fn init_tracing(log_json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.verbose);

    // Flags and env override the stored settings
    let mut settings = config::Config::load()?;
    settings.merge(&config::Config {
        api_url: cli.api_url.clone(),
        api_key: cli.api_key.clone(),
        access_token: cli.access_token.clone(),
    });
    let remote = settings.remote();

    match cli.command {
        Commands::Sync {
            batch,
            policy,
            concurrency,
            dry_run,
            owner,
            write_back,
            metrics,
        } => {
            let args = sync::SyncArgs {
                batch,
                policy,
                concurrency,
                dry_run,
                owner,
                write_back,
                metrics,
            };
            sync::run_sync(args, &remote, cli.format).await?;
        }
        Commands::Zones { owner } => {
            zones::list_zones(&remote, owner, cli.format).await?;
        }
        Commands::Whoami => {
            whoami::show_owner(&remote, cli.format).await?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                settings::show_config(cli.format)?;
            }
            ConfigCommands::Set {
                api_url,
                api_key,
                access_token,
            } => {
                settings::set_config(config::Config {
                    api_url,
                    api_key,
                    access_token,
                })?;
            }
        },
    }

    Ok(())
}
