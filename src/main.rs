//! a3s-pair - anonymous stranger chat over stdio
//!
//! Reads `<participant-id> <payload>` lines from stdin and writes
//! `[<participant-id>] <text>` lines to stdout.

use a3s_pair::{
    Dispatcher, MatchEngine, Outbox, PairConfig, SessionController, StdioTransport,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_FILE: &str = "a3s-pair.json";

#[derive(Parser)]
#[command(name = "a3s-pair")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Anonymous stranger pairing and message relay")]
struct Cli {
    /// Configuration file path (.json)
    #[arg(short, long, env = "A3S_PAIR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve participants over stdin/stdout
    Run {
        /// Directory for participant records (overrides config)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Print participant counts per state
    Stats {
        /// Directory for participant records (overrides config)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the conversation
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("a3s_pair={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { state_dir } => {
            if state_dir.is_some() {
                config.state_dir = state_dir;
            }
            run(config).await?;
        }
        Commands::Stats { state_dir } => {
            if state_dir.is_some() {
                config.state_dir = state_dir;
            }
            if config.state_dir.is_none() {
                anyhow::bail!("stats needs --state-dir or stateDir in the config");
            }
            let store = config
                .open_store()
                .await
                .context("Failed to open participant store")?;
            let counts = store.counts().await;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::Config { default } => {
            let shown = if default {
                PairConfig::default()
            } else {
                config
            };
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

/// Explicit path, then `./a3s-pair.json`, then defaults
fn load_config(explicit_path: Option<&Path>) -> Result<PairConfig> {
    if let Some(path) = explicit_path {
        tracing::info!("Loading config from {}", path.display());
        return PairConfig::load(path).map_err(|e| anyhow::anyhow!("Config error: {e}"));
    }

    let local = Path::new(DEFAULT_CONFIG_FILE);
    if local.exists() {
        tracing::info!("Loading config from ./{}", DEFAULT_CONFIG_FILE);
        return PairConfig::load(local).map_err(|e| anyhow::anyhow!("Config error: {e}"));
    }

    tracing::info!("No config found, using defaults");
    Ok(PairConfig::default())
}

async fn run(config: PairConfig) -> Result<()> {
    let store = config
        .open_store()
        .await
        .context("Failed to open participant store")?;
    let counts = store.counts().await;
    tracing::info!(
        participants = counts.total,
        paired = counts.paired,
        seeking = counts.seeking,
        state_dir = ?config.state_dir,
        "a3s-pair started"
    );

    let engine = Arc::new(MatchEngine::with_max_attempts(
        Arc::new(store),
        config.max_match_attempts,
    ));
    let (outbox, rx) = Outbox::channel();
    let dispatcher = Dispatcher::spawn(rx, Arc::new(StdioTransport::new()));
    let controller = SessionController::new(engine, outbox, &config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (id, payload) = line.split_once(' ').unwrap_or((line, ""));
        controller.handle_payload(&id.into(), payload).await;
    }

    // Closing the last outbox lets the dispatcher drain and stop
    drop(controller);
    let delivered = dispatcher.await.context("Dispatcher task failed")?;
    tracing::info!(delivered, "a3s-pair stopped");
    Ok(())
}
