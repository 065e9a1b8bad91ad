//! Command line entry point for the rank matchmaker
//!
//! Loads a JSON storage snapshot into the in-memory store, runs one
//! matchmaking request through the full pipeline and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use rank_matchmaker::config::AppConfig;
use rank_matchmaker::metrics::MetricsCollector;
use rank_matchmaker::storage::{InMemoryMatchStore, Snapshot};
use rank_matchmaker::{MatchmakingError, MatchmakingPipeline, MatchmakingRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Rank Matchmaker - role-slot matchmaking over a storage snapshot
#[derive(Parser)]
#[command(
    name = "rank-matchmaker",
    version,
    about = "Run one rank matchmaking request against a JSON storage snapshot",
    long_about = "Rank Matchmaker merges the realtime queue with the participant pool, \
                 fills role slots inside score windows, tries realtime drop-in for running \
                 rooms, sanitizes the result and commits it to the in-memory store loaded \
                 from the snapshot."
)]
struct Args {
    /// Snapshot file with games, queue, participants, rooms and heroes
    #[arg(short, long, value_name = "FILE")]
    snapshot: PathBuf,

    /// Game to match
    #[arg(short, long, value_name = "ID")]
    game: String,

    /// Game mode to match
    #[arg(short, long, value_name = "MODE", default_value = "rank")]
    mode: String,

    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Force realtime matching on, whatever the game rules say
    #[arg(long, conflicts_with = "no_realtime")]
    realtime: bool,

    /// Force realtime matching off, whatever the game rules say
    #[arg(long)]
    no_realtime: bool,

    /// Anchor score windows on this score instead of the first candidate
    #[arg(long, value_name = "SCORE")]
    baseline_score: Option<f64>,

    /// Stop before the commit and print the proposal
    #[arg(long)]
    dry_run: bool,

    /// Print Prometheus metrics to stderr after the run
    #[arg(long)]
    print_metrics: bool,
}

impl Args {
    fn realtime_override(&self) -> Option<bool> {
        match (self.realtime, self.no_realtime) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load configuration from file or environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    Ok(config)
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        "{} {} matching {}/{}",
        config.service.name,
        rank_matchmaker::VERSION,
        args.game,
        args.mode
    );
    debug!("Matchmaking settings: {:?}", config.matchmaking);

    let snapshot = load_snapshot(&args.snapshot)?;
    let store = Arc::new(InMemoryMatchStore::from_snapshot(snapshot)?);
    let game = store
        .game(&args.game)?
        .ok_or_else(|| MatchmakingError::GameNotFound {
            game_id: args.game.clone(),
        })?;

    let mut rules = game.rules;
    if let Some(realtime) = args.realtime_override() {
        rules.realtime_match = realtime;
    }

    let request = MatchmakingRequest {
        game_id: game.id,
        mode: args.mode.clone(),
        roles: game.roles,
        rules,
        baseline_score: args.baseline_score,
        dry_run: args.dry_run,
    };

    let metrics = Arc::new(MetricsCollector::new()?);
    let pipeline =
        MatchmakingPipeline::with_in_memory_store(store, config.matchmaking.clone(), metrics.clone());
    let outcome = pipeline.run(&request).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if args.print_metrics {
        eprintln!("{}", metrics.gather_text()?);
    }

    Ok(())
}
