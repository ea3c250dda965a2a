//! Tile Service: the cached render path.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TileService                          │
//! │  get_tile()                                                  │
//! │   1. Validate coordinates ── invalid ──────────► placeholder │
//! │   2. TileCache.get ───────── hit ──────────────► cached      │
//! │   3. HandlePool.render_tile                                  │
//! │        ├─ Some(bytes) ── TileCache.set (30 d) ─► bytes       │
//! │        └─ None / error ────────────────────────► placeholder │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Absent tiles are never cached, so a tile that is empty today can still
//! render once the raster is replaced. Cache failures are logged and the
//! request is served as if the cache missed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::TileError;
use crate::geo::mercator::is_valid_tile;
use crate::geo::TILE_SIZE;
use crate::raster::HandlePool;

use super::cache::{file_identifier, TileCache, TileKey, DEFAULT_TILE_TTL};
use super::encoder::TileEncoder;

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one Web Mercator tile of one raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Raster file
    pub path: PathBuf,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileRequest {
    pub fn new(path: impl Into<PathBuf>, z: u8, x: u32, y: u32) -> Self {
        Self {
            path: path.into(),
            z,
            x,
            y,
        }
    }

    /// Cache key of the requested tile.
    pub fn key(&self) -> TileKey {
        TileKey::for_file(&self.path, self.z, self.x, self.y)
    }

    /// Reject coordinates outside the zoom level's grid.
    pub fn validate(&self) -> Result<(), TileError> {
        if is_valid_tile(self.z, self.x, self.y) {
            Ok(())
        } else {
            Err(TileError::InvalidCoordinates {
                z: self.z,
                x: self.x,
                y: self.y,
            })
        }
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded image
    pub data: Bytes,

    /// Whether this tile was served from cache
    pub cache_hit: bool,

    /// Whether `data` is the transparent placeholder
    pub placeholder: bool,

    /// MIME type of `data`
    pub content_type: &'static str,
}

/// What [`TileService::invalidate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Invalidation {
    /// An open view was closed
    pub view_closed: bool,
    /// Cached tiles deleted
    pub tiles_purged: usize,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Serves tiles from the durable cache, rendering and caching on a miss.
pub struct TileService {
    pool: Arc<HandlePool>,
    cache: TileCache,
    encoder: TileEncoder,
    placeholder: Bytes,
    ttl: Duration,
}

impl TileService {
    /// Create a service over a shared pool and cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder tile cannot be encoded.
    pub fn new(pool: Arc<HandlePool>, cache: TileCache) -> Result<Self, TileError> {
        let encoder = pool.encoder();
        let placeholder = encoder.placeholder(TILE_SIZE, TILE_SIZE)?;
        Ok(Self {
            pool,
            cache,
            encoder,
            placeholder,
            ttl: DEFAULT_TILE_TTL,
        })
    }

    /// Use a different lifetime for cached tiles.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn content_type(&self) -> &'static str {
        self.encoder.format().content_type()
    }

    /// The encoded transparent tile.
    pub fn placeholder(&self) -> Bytes {
        self.placeholder.clone()
    }

    /// Get a tile, using the cache when possible.
    ///
    /// Never fails: anything that prevents a real tile yields the
    /// placeholder.
    pub async fn get_tile(&self, request: &TileRequest) -> TileResponse {
        if let Err(err) = request.validate() {
            debug!("{}", err);
            return self.placeholder_response();
        }

        let key = request.key().to_string();
        match self.cache.get(&key).await {
            Ok(Some(data)) => {
                return TileResponse {
                    data,
                    cache_hit: true,
                    placeholder: false,
                    content_type: self.content_type(),
                }
            }
            Ok(None) => {}
            Err(err) => warn!(key = %key, "Tile cache read failed: {}", err),
        }

        match self.generate_tile(request).await {
            Ok(Some(data)) => {
                if let Err(err) = self.cache.set(&key, data.clone(), self.ttl).await {
                    warn!(key = %key, "Tile cache write failed: {}", err);
                }
                TileResponse {
                    data,
                    cache_hit: false,
                    placeholder: false,
                    content_type: self.content_type(),
                }
            }
            Ok(None) => self.placeholder_response(),
            Err(err) => {
                warn!(path = %request.path.display(), "Tile render failed: {}", err);
                self.placeholder_response()
            }
        }
    }

    /// Render a tile through the pool, bypassing the cache.
    pub async fn generate_tile(&self, request: &TileRequest) -> Result<Option<Bytes>, TileError> {
        request.validate()?;
        Ok(self
            .pool
            .render_tile(&request.path, request.z, request.x, request.y)
            .await?)
    }

    /// Close the pooled view of `path`; with `purge`, also delete its cached
    /// tiles.
    pub async fn invalidate(&self, path: &Path, purge: bool) -> Result<Invalidation, TileError> {
        let view_closed = self.pool.invalidate(path).await;
        let tiles_purged = if purge {
            self.purge_cached_tiles(path).await?
        } else {
            0
        };
        Ok(Invalidation {
            view_closed,
            tiles_purged,
        })
    }

    /// Delete every cached tile of `path`.
    pub async fn purge_cached_tiles(&self, path: &Path) -> Result<usize, TileError> {
        let prefix = TileKey::prefix(&file_identifier(path));
        Ok(self.cache.purge_prefix(&prefix).await?)
    }

    fn placeholder_response(&self) -> TileResponse {
        TileResponse {
            data: self.placeholder.clone(),
            cache_hit: false,
            placeholder: true,
            content_type: self.content_type(),
        }
    }
}
