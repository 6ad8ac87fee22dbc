mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use jn_core::{Config, Paths};
use jn_telemetry::LogFormat;

use commands::daemon::StartOverrides;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// jernel -- write journal entries on a jittered schedule.
#[derive(Parser)]
#[command(name = "jernel", version, about)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemon.
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Run the daemon in the foreground until SIGINT/SIGTERM.
    ///
    /// Flags override config.toml for this run only.
    Start {
        /// Work units per period.
        #[arg(long, allow_negative_numbers = true)]
        rate: Option<i64>,
        /// Period for the rate: hour, day, or week.
        #[arg(long, value_name = "PERIOD")]
        rate_period: Option<String>,
        /// Comma-separated variants to choose from (empty clears the list).
        #[arg(long)]
        variants: Option<String>,
    },

    /// Stop the running daemon.
    Stop,

    /// Show daemon status.
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    jn_telemetry::init(format, "jernel", "info");

    let paths = Paths::from_env();

    match cli.command {
        Commands::Daemon(DaemonCommand::Start {
            rate,
            rate_period,
            variants,
        }) => {
            let overrides = StartOverrides {
                rate,
                rate_period,
                variants,
            };
            let config = load_config(cli.config.as_deref())?;
            commands::daemon::start(&config, overrides, &paths).await?;
        }
        Commands::Daemon(DaemonCommand::Stop) => {
            commands::daemon::stop(&paths).await?;
        }
        Commands::Daemon(DaemonCommand::Status) => {
            let config = load_config(cli.config.as_deref())?;
            commands::daemon::status(&config, &paths)?;
        }
        Commands::Config(ConfigCommand::Show) => {
            let config = load_config(cli.config.as_deref())?;
            commands::config::show(&config, cli.config.as_deref(), &paths)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}
