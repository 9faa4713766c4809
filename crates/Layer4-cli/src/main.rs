//! Cachet CLI - Main entry point

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cachet - two-tier cache for API responses and static resources
#[derive(Parser, Debug)]
#[command(name = "cachet")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// SQLite database backing the persistent tier
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a URL through the cache and print the payload
    Fetch {
        url: String,
        /// Cache as a static resource (data URL, persistent tier only)
        #[arg(long)]
        resource: bool,
        /// Override the workflow's TTL
        #[arg(long)]
        ttl_secs: Option<u64>,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request body
        #[arg(short, long)]
        body: Option<String>,
        /// Request header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Look a cache key up in both tiers
    Get { key: String },
    /// Remove a cache key from both tiers
    Remove { key: String },
    /// Drop every cached entry
    Clear,
    /// Print tier occupancy and hit statistics
    Stats,
    /// Print the cache key a request or resource maps to
    Key {
        url: String,
        /// Key the URL as a static resource
        #[arg(long)]
        resource: bool,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        #[arg(short, long)]
        body: Option<String>,
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

fn default_db_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cachet")
        .join("cache.db")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // `key` needs no cache at all
    if let Command::Key {
        url,
        resource,
        method,
        body,
        headers,
    } = &args.command
    {
        let headers = commands::parse_headers(headers)?;
        println!(
            "{}",
            commands::derive_key(url, *resource, method, body.as_deref(), &headers)
        );
        return Ok(());
    }

    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    let cache = commands::open_cache(&db_path)?;
    cache.start()?;

    let result = commands::run(&cache, args.command).await;

    cache.shutdown().await;
    result
}
