//! Sluice main entry point
//!
//! This is the command-line interface for the Sluice paced crawler.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use sluice_crawler::config::{load_config_with_hash, validate_target_id, Config};
use sluice_crawler::crawler::{Controller, HttpFetcher};
use sluice_crawler::egress::EgressPool;
use sluice_crawler::output::{build_sinks, print_statistics};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sluice: a paced crawler for rate-limited hosts
///
/// Sluice walks each user's post list and the comment thread of every post,
/// pacing requests, rotating identity and egress points, and backing off
/// when the host pushes back.
#[derive(Parser, Debug)]
#[command(name = "sluice-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A paced crawler for rate-limited hosts", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// User ids to crawl, comma separated (overrides [[target]] entries)
    #[arg(short = 'u', long = "user", value_delimiter = ',')]
    users: Vec<String>,

    /// Root directory for CSV output (overrides output.directory)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "probe")]
    dry_run: bool,

    /// Probe the egress candidates, print the pool and exit
    #[arg(long, conflicts_with = "dry_run")]
    probe: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(dir) = &cli.output_dir {
        config.output.directory = dir.to_string_lossy().into_owned();
    }

    if cli.probe {
        handle_probe(&config).await;
        return Ok(());
    }

    let targets = resolve_targets(&cli, &config)?;

    if cli.dry_run {
        handle_dry_run(&config, &targets);
    } else {
        handle_crawl(config, &config_hash, &targets).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sluice_crawler=info,warn"),
            1 => EnvFilter::new("sluice_crawler=debug,info"),
            2 => EnvFilter::new("sluice_crawler=trace,debug"),
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

/// Command-line ids win over the configured targets
fn resolve_targets(cli: &Cli, config: &Config) -> anyhow::Result<Vec<String>> {
    let targets: Vec<String> = if cli.users.is_empty() {
        config.targets.iter().map(|t| t.id.clone()).collect()
    } else {
        cli.users.iter().map(|id| id.trim().to_string()).collect()
    };

    for id in &targets {
        validate_target_id(id).with_context(|| format!("invalid user id '{}'", id))?;
    }

    if targets.is_empty() {
        bail!("no user ids given; pass -u or add [[target]] entries to the config");
    }

    Ok(targets)
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config, targets: &[String]) {
    println!("=== Sluice Dry Run ===\n");

    println!("Session:");
    println!("  Base URL: {}", config.session.base_url);
    println!(
        "  Cookie: {}",
        if config.session.cookie.is_empty() {
            "(none)"
        } else {
            "(set)"
        }
    );

    println!("\nCrawl:");
    println!("  Max list pages: {}", config.crawl.max_list_pages);
    println!("  Max comment pages: {}", config.crawl.max_comment_pages);
    println!("  Comments: {}", config.crawl.crawl_comments);
    println!("  Request timeout: {}s", config.crawl.request_timeout);

    println!("\nPacing:");
    println!(
        "  Short wait: {}-{}s",
        config.pacing.min_wait, config.pacing.max_wait
    );
    println!(
        "  Page gap: {}-{} pages",
        config.pacing.min_page_gap, config.pacing.max_page_gap
    );
    for entry in &config.pacing.global_wait {
        println!("  Global wait: {}s per {} pages", entry.wait, entry.pages);
    }

    println!("\nEgress:");
    println!("  Candidates: {}", config.egress.candidates.len());
    println!("  Include direct: {}", config.egress.include_direct);

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Database: {}", config.output.database_path);

    println!("\nTargets ({}):", targets.len());
    for id in targets {
        println!("  - {}", id);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --probe mode: probes every candidate and prints the pool
async fn handle_probe(config: &Config) {
    let pool = EgressPool::from_config(config.egress.clone());
    pool.initialize().await;
    println!("{}", pool.status().await);
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, targets: &[String]) -> anyhow::Result<()> {
    let pool = EgressPool::from_config(config.egress.clone());
    let valid = pool.initialize().await;
    tracing::info!("Egress pool ready with {} point(s)", valid);

    let refresher = pool.spawn_refresher(CancellationToken::new());

    let sinks = build_sinks(&config.output, config_hash).context("failed to open output")?;
    let mut controller = Controller::new(&config, HttpFetcher::new(), sinks, pool);

    tracing::info!("Crawling {} user(s)", targets.len());

    let outcome = tokio::select! {
        result = controller.run(targets) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    refresher.shutdown().await;

    match outcome {
        Some(Ok(report)) => {
            print_statistics(&report.stats);
            Ok(())
        }
        Some(Err(e)) => {
            // run() has already closed the sink as failed
            tracing::error!("Crawl failed: {}", e);
            print_statistics(controller.stats());
            Err(e.into())
        }
        None => {
            tracing::warn!("Interrupted, stopping crawl");
            controller
                .interrupt()
                .context("failed to close output after interrupt")?;
            print_statistics(controller.stats());
            Ok(())
        }
    }
}
