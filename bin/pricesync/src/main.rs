mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pricesync")]
#[command(about = "Keeps retail prices in sync across ERP, store admin and partner portal", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.pricesync/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the product feed and sync every SKU
    Run {
        /// Override batch.size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override feed.url
        #[arg(long)]
        feed_url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Only process the first N products of the feed
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run environment diagnostics
    Doctor,

    /// Inspect run audit logs
    Logs {
        #[command(subcommand)]
        command: LogsCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum LogsCommands {
    /// List run logs, oldest first
    List,
    /// Print a run log (latest when no file is given)
    Show {
        /// Log file name or path
        file: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration with secrets masked
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            batch_size,
            feed_url,
            headed,
            limit,
        } => {
            commands::run_cmd::run(
                config_path,
                commands::run_cmd::RunOverrides {
                    batch_size,
                    feed_url,
                    headed,
                    limit,
                },
            )
            .await?;
        }

        Commands::Doctor => {
            commands::doctor::run(config_path).await?;
        }

        Commands::Logs { command } => match command {
            LogsCommands::List => {
                commands::logs_cmd::list(config_path).await?;
            }
            LogsCommands::Show { file } => {
                commands::logs_cmd::show(config_path, file).await?;
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(config_path).await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(config_path, force).await?;
            }
        },
    }

    Ok(())
}
