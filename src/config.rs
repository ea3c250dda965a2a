//! Configuration management for GeoTile Streamer.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `GEOTILE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Commands
//!
//! - `serve` (default): run the HTTP tile server
//! - `optimize <FILE>`: rewrite one raster as tiled, compressed, with overviews
//! - `warm <FILE>`: pre-render one raster's tiles into the tile cache
//!
//! # Environment Variables
//!
//! - `GEOTILE_HOST` - Server bind address (default: 0.0.0.0)
//! - `GEOTILE_PORT` - Server port (default: 3000)
//! - `GEOTILE_DATA_DIR` - Directory holding the rasters (default: uploads)
//! - `GEOTILE_BACKUP_DIR` - Where originals go before optimization (default: uploads_backup)
//! - `GEOTILE_CACHE_PATH` - SQLite tile cache (default: tile_cache.sqlite3)
//! - `GEOTILE_MAX_HANDLES` - Open rasters kept in the pool (default: 20)
//! - `GEOTILE_EVICTION` - Pool eviction policy, fifo or lru (default: fifo)
//! - `GEOTILE_TILE_FORMAT` - webp or png (default: webp)
//! - `GEOTILE_TILE_QUALITY` - Encoder quality 1-100 (default: 82)
//! - `GEOTILE_CACHE_TTL` - Cached tile lifetime in seconds (default: 30 days)
//! - `GEOTILE_WARM_MIN_ZOOM` / `GEOTILE_WARM_MAX_ZOOM` - Warming range (default: 12-20)
//! - `GEOTILE_CACHE_MAX_AGE` - HTTP max-age for tiles (default: 30 days)
//! - `GEOTILE_PLACEHOLDER_MAX_AGE` - HTTP max-age for the placeholder (default: 60)
//! - `GEOTILE_CORS_ORIGINS` - Comma-separated allowed origins (default: any)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::geo::mercator::MAX_ZOOM;
use crate::jobs::{WarmOptions, DEFAULT_WARM_MAX_ZOOM, DEFAULT_WARM_MIN_ZOOM};
use crate::raster::{EvictionPolicy, DEFAULT_MAX_HANDLES};
use crate::server::{DEFAULT_CACHE_MAX_AGE, DEFAULT_PLACEHOLDER_MAX_AGE};
use crate::tile::{TileEncoder, TileFormat, DEFAULT_TILE_QUALITY, DEFAULT_TILE_TTL};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default raster directory.
pub const DEFAULT_DATA_DIR: &str = "uploads";

/// Default directory for pre-optimization backups.
pub const DEFAULT_BACKUP_DIR: &str = "uploads_backup";

/// Default tile cache database.
pub const DEFAULT_CACHE_PATH: &str = "tile_cache.sqlite3";

// =============================================================================
// CLI Arguments
// =============================================================================

/// GeoTile Streamer - A map tile server for GeoTIFF rasters.
///
/// Serves Web Mercator tiles rendered on the fly from local GeoTIFFs, with a
/// durable tile cache and background optimization of uploaded files.
#[derive(Parser, Debug, Clone)]
#[command(name = "geotile-streamer")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options when no subcommand is given
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The command to run; `serve` when none was given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the tile server
    Serve(ServeConfig),

    /// Optimize one raster in place (tiling, compression, overviews)
    Optimize(OptimizeConfig),

    /// Pre-render one raster's tiles into the tile cache
    Warm(WarmConfig),
}

/// Tile rendering and caching options shared by `serve` and `warm`.
#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// SQLite database holding cached tiles.
    #[arg(long, default_value = DEFAULT_CACHE_PATH, env = "GEOTILE_CACHE_PATH")]
    pub cache_path: PathBuf,

    /// Tile image format.
    #[arg(long, value_enum, default_value_t = TileFormat::Webp, env = "GEOTILE_TILE_FORMAT")]
    pub tile_format: TileFormat,

    /// Encoder quality (1-100).
    #[arg(long, default_value_t = DEFAULT_TILE_QUALITY, env = "GEOTILE_TILE_QUALITY")]
    pub tile_quality: u8,

    /// Lifetime of cached tiles in seconds.
    #[arg(long, default_value_t = DEFAULT_TILE_TTL.as_secs(), env = "GEOTILE_CACHE_TTL")]
    pub cache_ttl: u64,

    /// Lowest zoom level pre-rendered after an upload.
    #[arg(long, default_value_t = DEFAULT_WARM_MIN_ZOOM, env = "GEOTILE_WARM_MIN_ZOOM")]
    pub warm_min_zoom: u8,

    /// Highest zoom level pre-rendered after an upload.
    #[arg(long, default_value_t = DEFAULT_WARM_MAX_ZOOM, env = "GEOTILE_WARM_MAX_ZOOM")]
    pub warm_max_zoom: u8,
}

impl Default for TileArgs {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            tile_format: TileFormat::Webp,
            tile_quality: DEFAULT_TILE_QUALITY,
            cache_ttl: DEFAULT_TILE_TTL.as_secs(),
            warm_min_zoom: DEFAULT_WARM_MIN_ZOOM,
            warm_max_zoom: DEFAULT_WARM_MAX_ZOOM,
        }
    }
}

impl TileArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_quality == 0 || self.tile_quality > 100 {
            return Err("tile_quality must be between 1 and 100".to_string());
        }
        if self.cache_ttl == 0 {
            return Err("cache_ttl must be greater than 0".to_string());
        }
        if self.warm_min_zoom > self.warm_max_zoom {
            return Err(format!(
                "warm_min_zoom ({}) must not exceed warm_max_zoom ({})",
                self.warm_min_zoom, self.warm_max_zoom
            ));
        }
        if self.warm_max_zoom > MAX_ZOOM {
            return Err(format!("warm_max_zoom must be at most {}", MAX_ZOOM));
        }
        Ok(())
    }

    pub fn encoder(&self) -> TileEncoder {
        TileEncoder::new(self.tile_format, self.tile_quality)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn warm_options(&self) -> WarmOptions {
        WarmOptions {
            min_zoom: self.warm_min_zoom,
            max_zoom: self.warm_max_zoom,
            ttl: self.ttl(),
            ..WarmOptions::default()
        }
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "GEOTILE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "GEOTILE_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory holding the raster files served by name.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "GEOTILE_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Directory receiving a copy of each raster before it is optimized.
    #[arg(long, default_value = DEFAULT_BACKUP_DIR, env = "GEOTILE_BACKUP_DIR")]
    pub backup_dir: PathBuf,

    // =========================================================================
    // Pool and Tile Configuration
    // =========================================================================
    /// Maximum number of rasters held open at once.
    #[arg(long, default_value_t = DEFAULT_MAX_HANDLES, env = "GEOTILE_MAX_HANDLES")]
    pub max_handles: usize,

    /// Which open raster to close when the pool is full.
    #[arg(long, value_enum, default_value_t = EvictionPolicy::Fifo, env = "GEOTILE_EVICTION")]
    pub eviction: EvictionPolicy,

    #[command(flatten)]
    pub tiles: TileArgs,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// HTTP Cache-Control max-age in seconds for rendered tiles.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "GEOTILE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// HTTP Cache-Control max-age in seconds for the transparent placeholder.
    #[arg(long, default_value_t = DEFAULT_PLACEHOLDER_MAX_AGE, env = "GEOTILE_PLACEHOLDER_MAX_AGE")]
    pub placeholder_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "GEOTILE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir is required. Set --data-dir or GEOTILE_DATA_DIR".to_string());
        }
        if self.max_handles == 0 {
            return Err("max_handles must be greater than 0".to_string());
        }
        self.tiles.validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Optimize
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct OptimizeConfig {
    /// Raster file to optimize in place.
    pub file: PathBuf,

    /// Directory receiving a copy of the original.
    #[arg(long, default_value = DEFAULT_BACKUP_DIR, env = "GEOTILE_BACKUP_DIR")]
    pub backup_dir: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl OptimizeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("a raster file is required".to_string());
        }
        if self.file.parent() == Some(self.backup_dir.as_path()) {
            return Err("backup_dir must differ from the raster's directory".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Warm
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct WarmConfig {
    /// Raster file whose tiles are pre-rendered.
    pub file: PathBuf,

    #[command(flatten)]
    pub tiles: TileArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl WarmConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.file.as_os_str().is_empty() {
            return Err("a raster file is required".to_string());
        }
        self.tiles.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
