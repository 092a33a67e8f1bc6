//! anirank - cross-site anime rating reconciliation
//!
//! Thin command-line driver over the `anirank` library. Configuration is
//! resolved once (`--config` → `ANIRANK_CONFIG` → platform config dir →
//! compiled defaults) and handed to each command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use anirank_common::config::{LoggingConfig, TomlConfig};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Command-line arguments for anirank
#[derive(Parser, Debug)]
#[command(name = "anirank")]
#[command(about = "Reconcile anime ratings across rating sites into one ranking")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect, score, complete and rank one season
    Analyze {
        /// Season, e.g. "2024-1" or "Winter 2024"
        #[arg(short, long)]
        period: String,

        /// JSON list of titles to analyze instead of the seasonal listing
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,

        /// Skip the automatic retry pass
        #[arg(long)]
        skip_retry: bool,
    },

    /// Rescore and rerank one season's observations, write a report
    Rank {
        /// Season to rank; current season when omitted
        #[arg(short, long, conflicts_with = "from_report")]
        period: Option<String>,

        /// Rescore the newest report in the results directory instead of the database
        #[arg(long)]
        from_report: bool,
    },

    /// Print the missing (title, source) work list of one season
    Missing {
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Enter missing ratings interactively
    Complete {
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Remove titles by ranking position, e.g. "3", "3,7,12", "1-5,10"
    Remove {
        selectors: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        #[arg(short, long)]
        period: Option<String>,
    },
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "anirank={0},anirank_common={0}",
            logging.level
        ))
    });

    let file_layer = match &logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "Starting anirank"
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let app = commands::App::open(config, args.json).await?;
    match args.command {
        Command::Analyze {
            period,
            seed,
            skip_retry,
        } => commands::analyze(&app, &period, seed.as_deref(), skip_retry).await,
        Command::Rank { period, from_report } => commands::rank(&app, period.as_deref(), from_report).await,
        Command::Missing { period } => commands::missing(&app, period.as_deref()).await,
        Command::Complete { period } => commands::complete(&app, period.as_deref()).await,
        Command::Remove {
            selectors,
            yes,
            period,
        } => commands::remove(&app, &selectors, yes, period.as_deref()).await,
    }
}
