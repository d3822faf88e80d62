mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use reelforge_api::AppState;
use reelforge_core::{
    bootstrap::load_config,
    logging,
    media::Compositor,
    service::{JobTracker, LifecycleManager, RateLimiter, RedisCounterStore},
    Config,
};

use server::ReelforgeServer;

#[derive(Parser, Debug)]
#[command(name = "reelforge")]
#[command(about = "Reelforge portrait video generation server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Reelforge server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Prepare working directories
    for dir in [
        config.media.uploads_dir.clone(),
        config.media.temp_dir(),
        config.media.output_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", dir.display()))?;
    }
    if !config.media.avatars_dir.is_dir() {
        warn!(
            "Avatar directory {} does not exist, overlay requests will be rejected",
            config.media.avatars_dir.display()
        );
    }

    // 4. Initialize the quota counter store
    let rate_limiter = init_rate_limiter(&config).await;
    info!("Rate limit backend: {}", rate_limiter.backend());

    // 5. Initialize services
    let jobs = JobTracker::new(Duration::from_secs(config.jobs.terminal_grace_secs));
    let lifecycle = LifecycleManager::new(&config.lifecycle, &config.media);
    let compositor = Compositor::new(config.media.clone());

    let state = AppState {
        config: Arc::new(config),
        rate_limiter,
        jobs,
        lifecycle,
        compositor,
    };

    // 6. Serve until shutdown
    ReelforgeServer::new(state).start().await
}

/// Connect to the shared counter store, or fall back to per-process counters.
async fn init_rate_limiter(config: &Config) -> RateLimiter {
    let prefix = config.redis.key_prefix.clone();
    let limits = config.rate_limit;

    if config.redis.url.is_empty() {
        info!("Redis not configured, using per-process rate limit counters");
        return RateLimiter::in_memory_only(prefix, limits);
    }

    let client = match redis::Client::open(config.redis.url.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid Redis URL: {}", e);
            return RateLimiter::in_memory_only(prefix, limits);
        }
    };

    match client.get_connection_manager().await {
        Ok(conn) => {
            info!("Connected to Redis for rate limit counters");
            RateLimiter::new(Arc::new(RedisCounterStore::new(conn)), prefix, limits)
        }
        Err(e) => {
            error!(
                "Failed to connect to Redis, falling back to per-process counters: {}",
                e
            );
            RateLimiter::in_memory_only(prefix, limits)
        }
    }
}
