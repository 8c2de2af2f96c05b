//! vidfeed CLI
//!
//! Local execution entry point: run the background poller, trigger a
//! one-off fetch, or inspect the local store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use vidfeed::{
    cache::{MemoryCache, VideoCache},
    clock::{Clock, SystemClock},
    config::Config,
    error::Result,
    scheduler::PollScheduler,
    services::{IngestClient, KeyPool, YouTubeApi},
    storage::{Database, KeyUsageStore, QueryStateStore, VideoStore},
};

/// vidfeed - quota-aware video metadata ingestion
#[derive(Parser, Debug)]
#[command(name = "vidfeed", version, about = "Video metadata ingestion engine")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "vidfeed.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background poller until interrupted
    Run,

    /// Fetch one page of results for a single query
    Fetch {
        /// Search query
        query: String,

        /// Page size override (remote API caps at 50)
        #[arg(long)]
        max_results: Option<u32>,

        /// Continuation token from a previous page
        #[arg(long)]
        page_token: Option<String>,
    },

    /// Search stored videos by title and description words
    Search {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// List the most recently published stored videos
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Show store totals and the active key's quota usage
    Stats,

    /// Validate the configuration file
    Validate,
}

/// Shared wiring for every command that touches the engine.
struct Engine {
    client: Arc<IngestClient>,
    videos: Arc<VideoStore>,
    keys: Arc<KeyPool>,
    queries: Vec<String>,
    config: Config,
}

fn build_engine(config: Config) -> Result<Engine> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db = Arc::new(Database::open(&config.db_path)?);
    let cache = Arc::new(VideoCache::new(
        Arc::new(MemoryCache::new(clock.clone())),
        clock.clone(),
    ));
    let keys = Arc::new(KeyPool::new(
        Config::api_keys_from_env(),
        KeyUsageStore::new(db.clone()),
        clock.clone(),
    ));
    let videos = Arc::new(VideoStore::new(db.clone()));
    let api = Arc::new(YouTubeApi::new(Duration::from_secs(
        config.fetch.timeout_secs,
    ))?);

    let client = Arc::new(IngestClient::new(
        api,
        keys.clone(),
        cache,
        videos.clone(),
        QueryStateStore::new(db),
        clock,
        config.fetch.window_days,
    ));

    Ok(Engine {
        client,
        videos,
        keys,
        queries: config.queries.clone(),
        config,
    })
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);

    match cli.command {
        Command::Run => {
            config.validate()?;
            let engine = build_engine(config)?;

            let mut scheduler = PollScheduler::new(
                engine.client.clone(),
                engine.queries.clone(),
                &engine.config.poll,
            );
            scheduler.start();

            log::info!("Polling {} queries; press Ctrl-C to stop", engine.queries.len());
            tokio::signal::ctrl_c().await?;

            log::info!("Shutting down...");
            scheduler.stop().await;
        }

        Command::Fetch {
            query,
            max_results,
            page_token,
        } => {
            let engine = build_engine(config)?;
            let max_results = max_results.unwrap_or(engine.config.fetch.max_results);

            let outcome = engine
                .client
                .fetch(&query, max_results, page_token.as_deref())
                .await?;

            if outcome.skipped {
                log::info!("Query '{}' was recently unproductive; skipped", query);
            } else {
                log::info!(
                    "Fetched {} videos ({} new, cached: {}) for '{}'",
                    outcome.items.len(),
                    outcome.stored_count,
                    outcome.cached,
                    query
                );
            }
            for video in &outcome.items {
                println!(
                    "{}  {}  [{}] {}",
                    video.published_at.format("%Y-%m-%d %H:%M"),
                    video.video_id,
                    video.channel_title,
                    video.title
                );
            }
            if let Some(token) = outcome.next_page_token {
                println!("next page token: {}", token);
            }
        }

        Command::Search {
            query,
            limit,
            offset,
        } => {
            let engine = build_engine(config)?;
            let results = engine.videos.search(&query, offset, limit)?;
            for stored in &results {
                println!(
                    "{}  {}  {}",
                    stored.video.published_at.format("%Y-%m-%d"),
                    stored.video.video_id,
                    stored.video.title
                );
            }
            log::info!("{} matches for '{}'", results.len(), query);
        }

        Command::Recent { limit, offset } => {
            let engine = build_engine(config)?;
            for stored in engine.videos.list_recent(offset, limit)? {
                println!(
                    "{}  {}  {}",
                    stored.video.published_at.format("%Y-%m-%d"),
                    stored.video.video_id,
                    stored.video.title
                );
            }
        }

        Command::Stats => {
            let engine = build_engine(config)?;
            let stats = engine.videos.stats()?;
            println!("videos stored:    {}", stats.total_videos);
            if let Some(latest) = stats.latest_published {
                println!("latest published: {}", latest.format("%Y-%m-%d %H:%M"));
            }
            if let Some(oldest) = stats.oldest_published {
                println!("oldest published: {}", oldest.format("%Y-%m-%d %H:%M"));
            }

            println!("api keys:         {}", engine.keys.len());
            if let Some(usage) = engine.keys.current_usage()? {
                println!(
                    "active key quota: {} used (exhausted: {})",
                    usage.quota_used, usage.exhausted
                );
            }
        }

        Command::Validate => {
            config.validate()?;
            log::info!("✓ Config OK ({} queries)", config.queries.len());

            let keys = Config::api_keys_from_env();
            if keys.is_empty() {
                log::warn!("No API keys in environment; fetches will fail fast");
            } else {
                log::info!("✓ {} API key(s) found in environment", keys.len());
            }
        }
    }

    Ok(())
}
