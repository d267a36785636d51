mod commands;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use daybreak::observability::{init_logging, LogFormat};

#[derive(Parser)]
#[command(
    name = "daybreak",
    about = "Collect the daily digest from unreliable sources",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (defaults to ./daybreak.toml when present)
    #[arg(long, global = true, env = "DAYBREAK_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run today's collection and hand the digest off
    Run {
        /// Clear the whole cache and refetch every task
        #[arg(long)]
        force: bool,
    },

    /// Re-run today's collection if the digest has not gone out
    RetryCheck {
        /// Only report the decision
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the run record for a day and the current lock holder
    Status {
        /// Day to show (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// List every retained record instead of a single day
        #[arg(long, conflicts_with = "date")]
        history: bool,
    },

    /// Manage the last-known-good cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Remove every cached entry
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = init_logging(format, "info") {
        eprintln!("error: {e}");
    }

    let result = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Run { force } => commands::run(&config, force, cli.json).await,
            Commands::RetryCheck { dry_run } => {
                commands::retry_check(&config, dry_run, cli.json).await
            }
            Commands::Status { date, history } => {
                commands::status(&config, date, history, cli.json)
            }
            Commands::Cache {
                command: CacheCommand::Clear,
            } => commands::cache_clear(&config, cli.json).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
