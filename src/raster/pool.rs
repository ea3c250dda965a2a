//! Bounded pool of open raster views.
//!
//! The pool maps absolute file paths to [`RasterView`]s and bounds the
//! number of rasters held open at once. Lookups, evictions and inserts
//! happen under one pool-wide lock; rendering happens after that lock is
//! released, under the view's own lock, so renders against different files
//! run concurrently while renders against the same file serialize.
//!
//! # Eviction
//!
//! By default the pool evicts the view that was *inserted* earliest; a hit
//! does not refresh an entry. [`EvictionPolicy::Lru`] refreshes entries on
//! every hit instead.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{IoError, RasterError};
use crate::geo::Bounds;
use crate::tile::TileEncoder;

use super::view::RasterView;

// =============================================================================
// Configuration
// =============================================================================

/// Default maximum number of open views.
pub const DEFAULT_MAX_HANDLES: usize = 20;

/// Which view to close when the pool is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EvictionPolicy {
    /// Oldest inserted view first.
    #[default]
    Fifo,
    /// Least recently used view first.
    Lru,
}

// =============================================================================
// TileSource Trait
// =============================================================================

/// Something that renders tiles for raster files.
///
/// The cache-warming sweep is written against this trait so it can be
/// driven by a mock in tests.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Render tile (z, x, y) of `path`; `None` if the tile has no data.
    async fn render_tile(
        &self,
        path: &Path,
        z: u8,
        x: u32,
        y: u32,
    ) -> Result<Option<Bytes>, RasterError>;

    /// Extent of `path` in longitude/latitude degrees.
    async fn geographic_bounds(&self, path: &Path) -> Result<Bounds, RasterError>;
}

// =============================================================================
// HandlePool
// =============================================================================

/// Owned registry of open raster views keyed by absolute path.
pub struct HandlePool {
    views: Mutex<LruCache<PathBuf, Arc<RasterView>>>,
    capacity: usize,
    policy: EvictionPolicy,
    encoder: TileEncoder,
}

impl HandlePool {
    /// Create a FIFO pool holding at most `max_handles` views.
    pub fn new(max_handles: usize, encoder: TileEncoder) -> Self {
        Self::with_policy(max_handles, EvictionPolicy::Fifo, encoder)
    }

    pub fn with_policy(max_handles: usize, policy: EvictionPolicy, encoder: TileEncoder) -> Self {
        let capacity = NonZeroUsize::new(max_handles).unwrap_or(NonZeroUsize::MIN);
        Self {
            views: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            policy,
            encoder,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn encoder(&self) -> TileEncoder {
        self.encoder
    }

    /// Get the view for `path`, opening it if needed.
    ///
    /// When the pool is full, one view is dropped from the pool before the
    /// new one is opened. Its handle is closed after the pool lock is
    /// released, and never waits on a render in progress.
    ///
    /// # Errors
    ///
    /// Returns the open error; a view that failed to open is not pooled.
    pub async fn view(&self, path: &Path) -> Result<Arc<RasterView>, RasterError> {
        let path = resolve(path)?;
        let mut views = self.views.lock().await;

        let hit = match self.policy {
            EvictionPolicy::Fifo => views.peek(&path).cloned(),
            EvictionPolicy::Lru => views.get(&path).cloned(),
        };
        if let Some(view) = hit {
            return Ok(view);
        }

        let evicted = if views.len() >= self.capacity {
            views.pop_lru()
        } else {
            None
        };

        let opened = RasterView::open(path.clone(), self.encoder)
            .await
            .map(Arc::new);
        if let Ok(view) = &opened {
            views.put(path.clone(), view.clone());
            debug!(path = %path.display(), open = views.len(), "Pooled raster view");
        }
        drop(views);

        if let Some((evicted, view)) = evicted {
            retire(&evicted, view);
        }
        opened
    }

    /// Render one tile of `path`.
    ///
    /// The pool lock is only held while the view is looked up or opened.
    pub async fn render_tile(
        &self,
        path: &Path,
        z: u8,
        x: u32,
        y: u32,
    ) -> Result<Option<Bytes>, RasterError> {
        let view = self.view(path).await?;
        Ok(view.render_tile(z, x, y).await)
    }

    /// Close and drop the view for `path`, if any.
    ///
    /// Must be called before the file is replaced on disk.
    pub async fn invalidate(&self, path: &Path) -> bool {
        let Ok(path) = resolve(path) else {
            return false;
        };
        let popped = self.views.lock().await.pop(&path);
        match popped {
            Some(view) => {
                view.close().await;
                info!(path = %path.display(), "Invalidated raster view");
                true
            }
            None => false,
        }
    }

    /// Close every pooled view.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut views = self.views.lock().await;
            let drained = std::iter::from_fn(|| views.pop_lru()).collect();
            drained
        };
        for (_, view) in drained {
            view.close().await;
        }
    }

    /// Number of pooled views.
    pub async fn len(&self) -> usize {
        self.views.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a view for `path` is pooled.
    pub async fn contains(&self, path: &Path) -> bool {
        match resolve(path) {
            Ok(path) => self.views.lock().await.contains(&path),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TileSource for HandlePool {
    async fn render_tile(
        &self,
        path: &Path,
        z: u8,
        x: u32,
        y: u32,
    ) -> Result<Option<Bytes>, RasterError> {
        HandlePool::render_tile(self, path, z, x, y).await
    }

    async fn geographic_bounds(&self, path: &Path) -> Result<Bounds, RasterError> {
        Ok(self.view(path).await?.lonlat_bounds())
    }
}

/// Close an evicted view, deferring to a task if a render still holds it.
fn retire(path: &Path, view: Arc<RasterView>) {
    if view.try_close() {
        debug!(path = %path.display(), "Evicted raster view");
        return;
    }
    debug!(path = %path.display(), "Evicted busy raster view, closing after render");
    tokio::spawn(async move {
        view.close().await;
    });
}

fn resolve(path: &Path) -> Result<PathBuf, IoError> {
    std::path::absolute(path).map_err(|e| IoError::from_std(path.display().to_string(), &e))
}
