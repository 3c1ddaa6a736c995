//! Organiser-Worker main entry point
//!
//! This is the command-line interface for the background scraping worker.

use clap::Parser;
use organiser_worker::config::load_config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Organiser-Worker: a background scraping job worker
///
/// Polls the shared job table for `fwc_lookup` and `incolink_sync` jobs,
/// claims them with optimistic locks, runs the matching scraping pipeline
/// and writes results back into the domain tables.
#[derive(Parser, Debug)]
#[command(name = "organiser-worker")]
#[command(version = "1.0.0")]
#[command(about = "A background scraping job worker", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Drain the queue and exit instead of polling forever
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    once: bool,

    /// Validate config and show effective settings without running
    #[arg(long, conflicts_with_all = ["once", "stats"])]
    dry_run: bool,

    /// Show queue statistics from the database and exit
    #[arg(long, conflicts_with_all = ["once", "dry_run"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config(&cli.config) {
        Ok(cfg) => {
            tracing::info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_run(config, cli.once).await?;
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
            0 => EnvFilter::new("organiser_worker=info,warn"),
            1 => EnvFilter::new("organiser_worker=debug,info"),
            2 => EnvFilter::new("organiser_worker=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows effective settings
fn handle_dry_run(
    config: &organiser_worker::config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Organiser-Worker Dry Run ===\n");

    println!("Worker:");
    println!("  Poll interval: {}ms", config.worker.poll_interval_ms);
    println!("  Reserve batch size: {}", config.worker.reserve_batch_size);
    println!("  Lock timeout: {}ms", config.worker.lock_timeout_ms);
    println!("  Cleanup interval: {}ms", config.worker.cleanup_interval_ms);
    println!(
        "  Graceful shutdown timeout: {}ms",
        config.worker.graceful_shutdown_timeout_ms
    );
    println!("  Employer delay: {}ms", config.worker.employer_delay_ms);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!("  Initial delay: {}ms", config.retry.initial_delay_ms);
    println!("  Max delay: {}ms", config.retry.max_delay_ms);
    println!("  Multiplier: {}", config.retry.multiplier);
    println!("  Jitter: {}", config.retry.jitter);

    println!("\nFWC document search:");
    println!("  Base URL: {}", config.fwc.search_base_url);
    println!("  Query prefix: {}", config.fwc.query_prefix);
    println!("  Page size: {}", config.fwc.page_size);
    println!("  Result limit: {}", config.fwc.result_limit);

    println!("\nIncolink portal:");
    println!("  URL: {}", config.incolink.portal_url);
    println!("  Account: {}", config.incolink.email);

    println!("\nBrowser:");
    println!("  Headless: {}", config.browser.headless);
    println!(
        "  Navigation timeout: {}ms",
        config.browser.navigation_timeout_ms
    );
    println!(
        "  DOM wait timeout: {}ms",
        config.browser.dom_wait_timeout_ms
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows job counts from the database
fn handle_stats(
    config: &organiser_worker::config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    use organiser_worker::storage::{open_storage, JobQueue};
    use std::path::Path;

    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = storage.queue_stats()?;

    println!("Job queue:");
    println!("  Queued:    {}", stats.queued);
    println!("  Running:   {}", stats.running);
    println!("  Succeeded: {}", stats.succeeded);
    println!("  Failed:    {}", stats.failed);
    println!("  Cancelled: {}", stats.cancelled);

    Ok(())
}

/// Handles the main worker operation
async fn handle_run(
    config: organiser_worker::config::Config,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use organiser_worker::browser::{Browser, ChromiumBrowser};
    use organiser_worker::fwc::FwcLookupPipeline;
    use organiser_worker::incolink::IncolinkSyncPipeline;
    use organiser_worker::storage::open_storage;
    use organiser_worker::worker::{ShutdownFlag, WorkerLoop};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let storage = Arc::new(Mutex::new(storage));
    tracing::info!("Opened job database at {}", config.storage.database_path);

    let fwc = FwcLookupPipeline::new(storage.clone(), config.fwc.clone(), &config.worker)?;

    tracing::info!("Launching browser (headless: {})", config.browser.headless);
    let browser: Arc<dyn Browser> = Arc::new(ChromiumBrowser::launch(&config.browser).await?);

    let incolink = IncolinkSyncPipeline::new(
        storage.clone(),
        browser.clone(),
        config.incolink.clone(),
        config.browser.clone(),
        &config.worker,
    );

    let shutdown = ShutdownFlag::new();
    shutdown.listen_for_ctrl_c();

    let worker = WorkerLoop::new(storage, fwc, incolink, &config, shutdown, once);

    let result = worker.run().await;

    if let Err(e) = browser.close().await {
        tracing::warn!("Browser shutdown failed: {}", e);
    }

    match result {
        Ok(()) => {
            tracing::info!("Worker stopped cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Worker stopped with error: {}", e);
            Err(e.into())
        }
    }
}
