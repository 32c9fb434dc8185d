//! PageProbe main entry point
//!
//! Runs the HTTP server that holds live-update connections, the worker that
//! executes crawls, or a configuration check.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pageprobe::config::{load_config_with_hash, Config};
use pageprobe::crawler::{CrawlService, CrawlTask, WorkflowEngine};
use pageprobe::notify::{Broadcaster, HttpRelay, Notifier};
use pageprobe::orchestrator::{Orchestrator, QueueHandoff};
use pageprobe::server::{serve, AppState};
use pageprobe::storage::open_storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// PageProbe: on-demand single page analysis with live updates
///
/// The server accepts crawl requests and streams updates to browsers. The
/// worker claims queued crawls from the shared database, runs them with
/// retries and timeouts, and relays updates back to the server.
#[derive(Parser, Debug)]
#[command(name = "pageprobe")]
#[command(version = "1.0.0")]
#[command(about = "On-demand single page analysis with live updates", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", env = "PAGEPROBE_CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve,

    /// Run a worker that executes queued crawls
    Worker,

    /// Validate the configuration and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Serve => handle_serve(config).await,
        Command::Worker => handle_worker(config).await,
        Command::CheckConfig => {
            handle_check_config(&config, &config_hash);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pageprobe=info,warn")),
            1 => EnvFilter::new("pageprobe=debug,info"),
            2 => EnvFilter::new("pageprobe=trace,debug"),
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

/// Runs the HTTP server, optionally with an embedded worker
async fn handle_serve(config: Config) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let broadcaster = Arc::new(Broadcaster::new(&config.notifier));

    let orchestrator = if config.server.embedded_worker {
        let notifier: Arc<dyn Notifier> = broadcaster.clone();
        let task = CrawlTask::new(&config, Arc::clone(&storage), notifier)?;
        let orchestrator = Orchestrator::new(&config, Arc::clone(&storage), task);
        let recovered = orchestrator.recover()?;
        if recovered > 0 {
            tracing::warn!(recovered, "Marked abandoned crawls as failed");
        }

        let poller = orchestrator.clone();
        let poll_interval = config.worker.poll_interval();
        tokio::spawn(async move {
            if let Err(e) = poller.run_worker(poll_interval).await {
                tracing::error!(error = %e, "Embedded worker stopped");
            }
        });
        Some(orchestrator)
    } else {
        tracing::info!("No embedded worker; crawls are left for worker processes");
        None
    };

    let engine: Arc<dyn WorkflowEngine> = match &orchestrator {
        Some(orchestrator) => Arc::new(orchestrator.clone()),
        None => Arc::new(QueueHandoff),
    };
    let service = CrawlService::new(Arc::clone(&storage), engine, broadcaster.clone());
    let state = AppState::new(service, Arc::clone(&broadcaster));

    // Live-update streams only end when the broadcaster closes them, so it
    // must shut down before the server can drain connections
    let shutdown_broadcaster = Arc::clone(&broadcaster);
    let shutdown_orchestrator = orchestrator.clone();
    let shutdown = async move {
        wait_for_ctrl_c().await;
        shutdown_broadcaster.shutdown();
        if let Some(orchestrator) = shutdown_orchestrator {
            orchestrator.shutdown();
        }
    };

    serve(&config.server.bind, state, shutdown).await?;

    if let Some(orchestrator) = orchestrator {
        orchestrator.wait().await;
    }
    Ok(())
}

/// Runs a worker that polls the shared database until Ctrl-C
async fn handle_worker(config: Config) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let relay = HttpRelay::new(&config.notifier)?;
    tracing::info!(endpoint = relay.endpoint(), "Relaying crawl updates to server");

    let task = CrawlTask::new(&config, Arc::clone(&storage), Arc::new(relay))?;
    let orchestrator = Orchestrator::new(&config, storage, task);

    let recovered = orchestrator.recover()?;
    if recovered > 0 {
        tracing::warn!(recovered, "Marked abandoned crawls as failed");
    }

    let poller = orchestrator.clone();
    let poll_interval = config.worker.poll_interval();
    let polling = tokio::spawn(async move { poller.run_worker(poll_interval).await });

    wait_for_ctrl_c().await;
    orchestrator.shutdown();
    polling.await??;
    orchestrator.wait().await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Prints the effective configuration
fn handle_check_config(config: &Config, config_hash: &str) {
    println!("=== PageProbe Configuration ===\n");
    println!("Hash: {}", config_hash);

    println!("\nServer:");
    println!("  Bind: {}", config.server.bind);
    println!("  Embedded worker: {}", config.server.embedded_worker);

    println!("\nWorker:");
    println!("  Concurrency: {}", config.worker.concurrency);
    println!("  Poll interval: {}ms", config.worker.poll_interval_ms);

    let policy = &config.orchestrator;
    println!("\nOrchestrator:");
    println!("  Start delay: {}ms", policy.start_delay_ms);
    println!("  Max attempts: {}", policy.max_attempts);
    println!("  Attempt timeout: {}s", policy.attempt_timeout_secs);
    println!("  Overall timeout: {}s", policy.overall_timeout_secs);
    println!(
        "  Heartbeat: every {}s, timeout {}s",
        policy.heartbeat_interval_secs, policy.heartbeat_timeout_secs
    );
    println!(
        "  Backoff: {}ms x{} (max {}s)",
        policy.initial_backoff_ms, policy.backoff_coefficient, policy.max_backoff_secs
    );

    println!("\nFetcher:");
    println!("  Page timeout: {}s", config.fetcher.page_timeout_secs);
    println!("  Probe timeout: {}s", config.fetcher.probe_timeout_secs);
    println!("  Max redirects: {}", config.fetcher.max_redirects);
    println!("  Probe concurrency: {}", config.fetcher.probe_concurrency);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nNotifier:");
    println!("  Relay URL: {}", config.notifier.relay_url);
    println!("  Keepalive: {}s", config.notifier.keepalive_secs);
    println!("  Channel capacity: {}", config.notifier.channel_capacity);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\n✓ Configuration is valid");
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
