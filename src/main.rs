//! GeoTile Streamer - A map tile server for GeoTIFF rasters.
//!
//! This binary starts the HTTP server, or runs one pipeline stage against a
//! single file.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geotile_streamer::{
    config::{Cli, Command, OptimizeConfig, ServeConfig, WarmConfig},
    jobs::{
        CacheWarmer, JobStatusStore, MemoryJobStore, OptimizeOutcome, Optimizer,
        ProcessingPipeline, WarmOutcome,
    },
    raster::HandlePool,
    server::{create_router, AppState, RouterConfig},
    tile::{file_identifier, TileCache, TileService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Optimize(config) => run_optimize(config).await,
        Command::Warm(config) => run_warm(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("GeoTile Streamer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Data directory: {}", config.data_dir.display());
    info!("  Backup directory: {}", config.backup_dir.display());
    info!("  Tile cache: {}", config.tiles.cache_path.display());
    info!(
        "  Pool: {} handles, {:?} eviction",
        config.max_handles, config.eviction
    );
    info!(
        "  Tiles: {:?} q{}, cached for {} s",
        config.tiles.tile_format, config.tiles.tile_quality, config.tiles.cache_ttl
    );
    info!(
        "  Warming: zoom {}-{}",
        config.tiles.warm_min_zoom, config.tiles.warm_max_zoom
    );

    if !config.data_dir.is_dir() {
        warn!(
            "  Data directory {} does not exist yet",
            config.data_dir.display()
        );
    }

    let cache = match TileCache::open(&config.tiles.cache_path).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match cache.purge_expired().await {
        Ok(0) => {}
        Ok(n) => info!("  Purged {} expired tile(s)", n),
        Err(e) => warn!("  Could not purge expired tiles: {}", e),
    }

    let pool = Arc::new(HandlePool::with_policy(
        config.max_handles,
        config.eviction,
        config.tiles.encoder(),
    ));

    let tile_service = match TileService::new(Arc::clone(&pool), cache.clone()) {
        Ok(service) => service.with_ttl(config.tiles.ttl()),
        Err(e) => {
            error!("Failed to create tile service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let jobs = Arc::new(MemoryJobStore::new());
    let pipeline = ProcessingPipeline::new(
        Optimizer::new(Arc::clone(&pool), &config.backup_dir),
        CacheWarmer::with_options(Arc::clone(&pool), cache, config.tiles.warm_options()),
        Arc::clone(&jobs) as Arc<dyn JobStatusStore>,
    );

    let state = AppState::new(
        Arc::new(tile_service),
        Arc::new(pipeline),
        jobs,
        &config.data_dir,
    );
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/tiles/<file>/12/2048/1361.webp", addr);
    info!("    curl -X POST http://{}/jobs -H 'content-type: application/json' -d '{{\"file\":\"<file>\"}}'", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    pool.close_all().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "geotile_streamer=debug,tower_http=debug"
    } else {
        "geotile_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_placeholder_max_age(config.placeholder_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Optimize Command
// =============================================================================

async fn run_optimize(config: OptimizeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pool = Arc::new(HandlePool::new(1, Default::default()));
    let optimizer = Optimizer::new(pool, &config.backup_dir);
    let jobs = MemoryJobStore::new();
    let job = jobs.create(file_identifier(&config.file)).await;

    match optimizer.run(&config.file, job, &jobs).await {
        Ok(OptimizeOutcome::AlreadyOptimized) => {
            println!("{}: already optimized", config.file.display());
            ExitCode::SUCCESS
        }
        Ok(OptimizeOutcome::Optimized {
            blocks,
            empty_blocks,
            overviews,
        }) => {
            println!(
                "{}: optimized ({} blocks, {} overviews), original saved to {}",
                config.file.display(),
                blocks,
                overviews,
                config.backup_dir.display()
            );
            if empty_blocks > 0 {
                eprintln!(
                    "Warning: {} unreadable blocks were written empty",
                    empty_blocks
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Warm Command
// =============================================================================

async fn run_warm(config: WarmConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = match TileCache::open(&config.tiles.cache_path).await {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Error: failed to open tile cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let pool = Arc::new(HandlePool::new(1, config.tiles.encoder()));
    let warmer = CacheWarmer::with_options(Arc::clone(&pool), cache, config.tiles.warm_options());
    let jobs = MemoryJobStore::new();
    let job = jobs.create(file_identifier(&config.file)).await;

    let report = warmer.run(&config.file, job, &jobs).await;
    pool.close_all().await;

    println!(
        "{}: {} tiles planned, {} rendered, {} already cached",
        config.file.display(),
        report.planned,
        report.rendered,
        report.skipped
    );
    match report.outcome {
        WarmOutcome::Aborted(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}
