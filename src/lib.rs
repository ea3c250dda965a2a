//! # GeoTile Streamer
//!
//! A map tile server for large GeoTIFF rasters.
//!
//! Rasters are reprojected to Web Mercator on the fly and rendered into
//! 256×256 tiles. Open rasters are kept in a bounded pool, rendered tiles in
//! a durable SQLite cache, and uploaded files are optimized and pre-rendered
//! by background jobs that can be paused and cancelled.
//!
//! ## Features
//!
//! - **Native GeoTIFF reader**: tiled or striped, overviews, deflate/LZW,
//!   8 to 64 bit samples, no-data and alpha masks
//! - **On-the-fly reprojection**: EPSG:4326, EPSG:3857 and UTM sources
//! - **Bounded handle pool**: FIFO or LRU eviction of open rasters
//! - **Durable tile cache**: 30 day expiry, survives restarts
//! - **Background jobs**: in-place optimization and z12-z20 cache warming
//!
//! ## Architecture
//!
//! - [`io`] - Byte-range file access and retry policies
//! - [`mod@format`] - TIFF parsing and writing, GeoTIFF georeferencing
//! - [`geo`] - Bounds, Web Mercator tile math, coordinate transforms
//! - [`raster`] - Datasets, warping, raster views and the handle pool
//! - [`tile`] - Tile encoding, durable cache and the tile service
//! - [`jobs`] - Optimization and cache-warming pipelines
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use geotile_streamer::{HandlePool, TileCache, TileEncoder, TileRequest, TileService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(HandlePool::new(20, TileEncoder::default()));
//!     let cache = TileCache::open("tile_cache.sqlite3").await?;
//!     let service = TileService::new(pool, cache)?;
//!
//!     let tile = service
//!         .get_tile(&TileRequest::new("uploads/dem.tif", 14, 8514, 5636))
//!         .await;
//!     println!("{} bytes, cache hit: {}", tile.data.len(), tile.cache_hit);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod geo;
pub mod io;
pub mod jobs;
pub mod raster;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, OptimizeConfig, ServeConfig, TileArgs, WarmConfig};
pub use error::{
    CacheError, IoError, JobError, PipelineError, RasterError, TiffError, TileError,
};
pub use format::{GeoInfo, GeoTransform};
pub use geo::{tile_bounds, tiles_covering, Bounds, CoordTransformer, TileRange, TILE_SIZE};
pub use io::{LocalFileReader, RangeReader, RetryPolicy};
pub use jobs::{
    CacheWarmer, JobId, JobSnapshot, JobStatus, JobStatusStore, MemoryJobStore, OptimizeOutcome,
    Optimizer, PipelineReport, ProcessingPipeline, WarmOptions, WarmOutcome, WarmReport,
};
pub use raster::{
    EvictionPolicy, HandlePool, RasterDataset, RasterView, TileSource, DEFAULT_MAX_HANDLES,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use tile::{
    TileCache, TileEncoder, TileFormat, TileKey, TileRequest, TileResponse, TileService,
    DEFAULT_TILE_QUALITY, DEFAULT_TILE_TTL,
};
