//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest image harvester.

use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::crawler::{Coordinator, StaticSource};
use sumi_harvest::output::{load_checkpoint_summary, print_checkpoint_summary, print_statistics};
use sumi_harvest::storage::{CheckpointStore, JsonCheckpointStore};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a resumable, deduplicating image harvester
///
/// Sumi-Harvest downloads the image candidates listed in a JSON-lines file,
/// keeps only images that are neither byte-identical nor visually
/// near-identical to ones already kept, and checkpoints progress so an
/// interrupted harvest picks up where it left off.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable, deduplicating image harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// JSON-lines file of candidates, one object per line
    #[arg(short, long, value_name = "FILE", required_unless_present = "stats")]
    candidates: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Restart enumeration at index 0, keeping saved images and hashes
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without downloading
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the checkpoint and image directory state and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.stats {
        handle_stats(&config)?;
    } else if let Some(candidates) = cli.candidates.as_deref() {
        if cli.dry_run {
            handle_dry_run(&config, candidates, cli.fresh)?;
        } else {
            handle_harvest(config, candidates, cli.fresh).await?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(
    config: &Config,
    candidates: &Path,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Harvester Configuration:");
    println!(
        "  Max concurrent downloads: {}",
        config.harvester.max_concurrent_downloads
    );
    println!(
        "  Min declared dimension: {}px",
        config.harvester.min_declared_dimension
    );
    println!(
        "  Enumeration retries: {} (backoff {}ms)",
        config.harvester.enumeration_retries, config.harvester.enumeration_backoff_ms
    );

    println!("\nFetch:");
    println!("  Timeout: {}s", config.fetch.timeout_secs);
    println!(
        "  Image size: {}..={} bytes",
        config.fetch.min_image_bytes, config.fetch.max_image_bytes
    );
    println!("  User agent: {}", config.fetch.user_agent);

    println!("\nDedup:");
    println!(
        "  Near-duplicate threshold: {} bits",
        config.dedup.near_duplicate_threshold
    );

    println!("\nOutput:");
    println!("  Images: {}", config.output.image_dir);
    println!("  Checkpoint: {}", config.output.checkpoint_path);

    let checkpoint = JsonCheckpointStore::new(&config.output.checkpoint_path).load()?;
    let start = if fresh { 0 } else { checkpoint.resume_index() };

    let source = StaticSource::from_json_lines(candidates)?;
    let remaining: Vec<_> = source
        .candidates()
        .iter()
        .filter(|c| c.sequence_index >= start)
        .collect();
    let eligible = remaining
        .iter()
        .filter(|c| c.meets_dimension_floor(config.harvester.min_declared_dimension))
        .count();

    println!("\nCandidates ({}):", candidates.display());
    println!("  Listed: {}", source.len());
    println!("  From resume index {}: {}", start, remaining.len());
    println!("  Passing dimension floor: {}", eligible);
    println!(
        "  Already accepted hashes: {}",
        checkpoint.accepted_count()
    );

    println!("\n✓ Configuration is valid");
    println!("✓ Would dispatch {} candidates", eligible);

    Ok(())
}

/// Handles the --stats mode: shows the checkpoint and stored images
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checkpoint: {}", config.output.checkpoint_path);
    println!("Images: {}\n", config.output.image_dir);

    let summary = load_checkpoint_summary(config)?;
    print_checkpoint_summary(&summary);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: Config,
    candidates: &Path,
    fresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if fresh {
        tracing::info!("Starting fresh harvest (enumeration restarts at index 0)");
    } else {
        tracing::info!("Starting harvest (will resume from checkpoint if present)");
    }

    let source = StaticSource::from_json_lines(candidates)?;
    tracing::info!(
        "Loaded {} candidates from {}",
        source.len(),
        candidates.display()
    );

    let coordinator = Coordinator::new(config, source, fresh)?;

    // Ctrl+C finishes in-flight work and flushes the checkpoint
    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight candidates");
            stop.stop();
        }
    });

    match coordinator.run().await {
        Ok(report) => {
            tracing::info!("Harvest completed successfully");
            println!();
            print_statistics(&report.stats);
            if report.stopped {
                println!(
                    "\nStopped early; rerun to continue from index {}",
                    report.resume_index
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
