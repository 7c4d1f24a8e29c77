//! Serial-Harvest main entry point
//!
//! This is the command-line interface for the Serial-Harvest story crawler.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serial_harvest::config::{load_config_with_hash, validate_schedule_categories, Config};
use serial_harvest::crawler::{build_context, run_schedule, BrowserDriver, ChromiumDriver, Dispatcher};
use serial_harvest::output::{
    load_statistics, print_bulk, print_chapters, print_statistics, print_stories, print_task,
    task_line,
};
use serial_harvest::storage::{open_storage, SqliteStorage, Storage, StoreHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Serial-Harvest: a resumable serial-fiction crawler
///
/// Serial-Harvest renders story pages in a headless browser, stores stories
/// and chapters in SQLite, and resumes where earlier crawls stopped.
#[derive(Parser, Debug)]
#[command(name = "serial-harvest")]
#[command(version)]
#[command(about = "A resumable serial-fiction crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short = 'C', long, global = true, default_value = "harvest.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl one story and wait for it to finish
    Crawl {
        /// Story landing page URL
        url: String,

        /// Refetch chapters that are already stored
        #[arg(long)]
        force: bool,
    },

    /// Crawl every story listed in one or more categories
    Bulk {
        /// Category names from the [source] table
        #[arg(short, long = "category", required = true)]
        categories: Vec<String>,

        /// Listing pages read per category
        #[arg(long, default_value_t = 1)]
        max_pages: u32,
    },

    /// Run the periodic auto-crawl until interrupted
    Schedule,

    /// Show daily crawl statistics
    Stats {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// List stored stories
    Stories {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// List the stored chapters of a story
    Chapters {
        /// Story slug
        slug: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Validate the configuration and print the effective settings
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Crawl { url, force } => handle_crawl(&config, &url, force).await,
        Command::Bulk {
            categories,
            max_pages,
        } => handle_bulk(&config, &categories, max_pages).await,
        Command::Schedule => handle_schedule(&config).await,
        Command::Stats { days } => handle_stats(&config, days),
        Command::Stories { limit, offset } => handle_stories(&config, limit, offset),
        Command::Chapters {
            slug,
            limit,
            offset,
        } => handle_chapters(&config, &slug, limit, offset),
        Command::Check => {
            handle_check(&config, &config_hash);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("serial_harvest=info,warn"),
            1 => EnvFilter::new("serial_harvest=debug,info"),
            2 => EnvFilter::new("serial_harvest=trace,debug"),
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

fn open_store(config: &Config) -> anyhow::Result<SqliteStorage> {
    open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("opening database {}", config.output.database_path))
}

/// A running browser and the dispatcher built on it
struct Harvester {
    driver: Arc<ChromiumDriver>,
    dispatcher: Dispatcher,
}

impl Harvester {
    async fn start(config: &Config) -> anyhow::Result<Self> {
        let store = StoreHandle::new(open_store(config)?);
        let driver = Arc::new(
            ChromiumDriver::launch(&config.browser)
                .await
                .context("launching browser")?,
        );
        let ctx = build_context(
            config,
            Arc::clone(&driver) as Arc<dyn BrowserDriver>,
            store,
        );
        Ok(Self {
            driver,
            dispatcher: Dispatcher::from_config(ctx, config),
        })
    }

    async fn stop(self) {
        drop(self.dispatcher);
        match Arc::try_unwrap(self.driver) {
            Ok(driver) => driver.shutdown().await,
            Err(_) => tracing::debug!("Browser still referenced by a worker; dropping it"),
        }
    }
}

/// Handles `crawl`: submits one story and follows it to the end
async fn handle_crawl(config: &Config, url: &str, force: bool) -> anyhow::Result<()> {
    let harvester = Harvester::start(config).await?;
    let dispatcher = &harvester.dispatcher;

    let task_id = dispatcher.submit_crawl_with(url, force || config.crawler.force_refresh);
    tracing::info!("Submitted task {} for {}", task_id, url);

    let mut last_line = String::new();
    let task = loop {
        let task = dispatcher.get_task_status(&task_id)?;
        let line = task_line(&task);
        if line != last_line {
            tracing::info!("{}", line);
            last_line = line;
        }
        if task.is_terminal() {
            break task;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; cancelling task {}", task_id);
                dispatcher.cancel(&task_id)?;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    };

    print_task(&task);
    harvester.stop().await;
    Ok(())
}

/// Handles `bulk`: fans out over categories and waits for every child
async fn handle_bulk(config: &Config, categories: &[String], max_pages: u32) -> anyhow::Result<()> {
    let harvester = Harvester::start(config).await?;

    let bulk_id = harvester
        .dispatcher
        .submit_bulk_crawl(categories, max_pages)?;
    tracing::info!("Submitted bulk crawl {}", bulk_id);

    let bulk = {
        let dispatcher = &harvester.dispatcher;
        let wait = dispatcher.wait_for_bulk(&bulk_id, POLL_INTERVAL);
        tokio::pin!(wait);

        let mut interrupted = false;
        loop {
            tokio::select! {
                result = &mut wait => break result?,
                signal = tokio::signal::ctrl_c(), if !interrupted => {
                    if let Err(e) = signal {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    interrupted = true;
                    let stopped = dispatcher.cancel_bulk(&bulk_id)?;
                    tracing::warn!(
                        "Interrupted; cancelled bulk crawl {} ({} running crawls stopping)",
                        bulk_id,
                        stopped
                    );
                }
            }
        }
    };

    print_bulk(&bulk);
    harvester.stop().await;
    Ok(())
}

/// Handles `schedule`: runs the auto-crawl until Ctrl-C
async fn handle_schedule(config: &Config) -> anyhow::Result<()> {
    validate_schedule_categories(config)?;
    let harvester = Harvester::start(config).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let ticks = run_schedule(&harvester.dispatcher, &config.schedule, shutdown).await;

    println!("Auto-crawl ran {} bulk crawls", ticks);
    harvester.stop().await;
    Ok(())
}

/// Handles `stats`: shows statistics from the database
fn handle_stats(config: &Config, days: u32) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_store(config)?;
    let stats = load_statistics(&storage, days)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles `stories`: lists stored stories
fn handle_stories(config: &Config, limit: u32, offset: u32) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let stories = storage.list_stories(limit, offset)?;
    let total = storage.count_stories()?;
    print_stories(&stories, total);
    Ok(())
}

/// Handles `chapters`: lists a story's stored chapters
fn handle_chapters(config: &Config, slug: &str, limit: u32, offset: u32) -> anyhow::Result<()> {
    let storage = open_store(config)?;
    let story = storage
        .get_story_by_slug(slug)?
        .with_context(|| format!("no story with slug '{}'", slug))?;
    let chapters = storage.list_chapters(&story.id, limit, offset)?;
    let stored = storage.count_chapters(&story.id)?;
    print_chapters(&story, &chapters, stored);
    Ok(())
}

/// Handles `check`: validates config and prints the effective settings
fn handle_check(config: &Config, config_hash: &str) {
    println!("=== Serial-Harvest Configuration ===\n");

    println!("Crawler:");
    println!(
        "  Max concurrent crawls: {}",
        config.crawler.max_concurrent_crawls
    );
    println!("  Force refresh: {}", config.crawler.force_refresh);

    println!("\nBrowser:");
    println!("  Context pool: {}", config.browser.max_contexts);
    println!("  Page timeout: {}s", config.browser.page_timeout_secs);
    println!("  Headless: {}", config.browser.headless);
    if let Some(path) = &config.browser.chrome_executable {
        println!("  Executable: {}", path);
    }
    println!(
        "  Delay window: {}-{}ms",
        config.browser.delay_min_ms, config.browser.delay_max_ms
    );
    println!("  User agents: {}", config.browser.user_agents.len());
    println!("  Viewports: {}", config.browser.viewports.len());
    println!("  Blocked resources: {:?}", config.browser.blocked_resources);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms base, {}ms cap, jitter {:.2}",
        config.retry.base_backoff_ms, config.retry.max_backoff_ms, config.retry.jitter
    );
    println!(
        "  Cooldowns: {} x {}s",
        config.retry.max_cooldowns, config.retry.cooldown_secs
    );

    println!("\nCategories ({}):", config.source.categories.len());
    for (name, url) in &config.source.categories {
        println!("  - {}: {}", name, url);
    }

    println!("\nSchedule:");
    if let Err(e) = validate_schedule_categories(config) {
        println!("  ⚠ {} (the schedule command will refuse to start)", e);
    }
    println!("  Every {} minutes", config.schedule.interval_minutes);
    println!("  Categories: {}", config.schedule.categories.join(", "));
    println!("  Pages per category: {}", config.schedule.max_pages);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid (hash: {})", config_hash);
}
