//! A long-lived, reprojected view onto one raster file.
//!
//! The view keeps the dataset open between tile requests and serializes all
//! reads through its own lock. Normalization statistics for non-8-bit data
//! are computed once, from a coarse 256x256 read of the whole extent, when
//! the view is opened.
//!
//! # Handle state
//!
//! ```text
//!            open()                close()
//!   ──────────────────► Open ──────────────────► Closed
//!                         ▲                        │
//!                         └──── next read_tile ────┘
//! ```
//!
//! A closed view reopens its file on the next read, under the same lock.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{IoError, RasterError};
use crate::format::tiff::DataType;
use crate::geo::{tile_bounds, Bounds, TILE_SIZE};
use crate::io::RetryPolicy;
use crate::tile::TileEncoder;

use super::compose::{compose_rgba, normalization_range};
use super::dataset::RasterDataset;
use super::warp::{warp, Warped};

enum ViewState {
    Open(Box<RasterDataset>),
    Closed,
}

impl ViewState {
    fn dataset(&mut self) -> Option<&mut RasterDataset> {
        match self {
            ViewState::Open(dataset) => Some(dataset.as_mut()),
            ViewState::Closed => None,
        }
    }
}

/// One open raster, answering single-tile renders.
pub struct RasterView {
    path: PathBuf,
    mercator_bounds: Bounds,
    lonlat_bounds: Bounds,
    band_count: usize,
    data_type: DataType,
    normalization: Option<(f64, f64)>,
    encoder: TileEncoder,
    state: Mutex<ViewState>,
}

impl RasterView {
    /// Open `path`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last open error after [`RetryPolicy::OPEN`] is exhausted,
    /// or an error if the extent cannot be reprojected.
    pub async fn open(path: impl Into<PathBuf>, encoder: TileEncoder) -> Result<Self, RasterError> {
        let path = path.into();
        let file = path.as_path();
        let mut dataset = RetryPolicy::OPEN
            .run("open raster", move |_| RasterDataset::open(file))
            .await?;

        let mercator_bounds = dataset.mercator_bounds()?;
        let lonlat_bounds = dataset.lonlat_bounds()?;
        let data_type = dataset.data_type();

        let normalization = if data_type == DataType::UInt8 {
            None
        } else {
            let coarse = warp(&mut dataset, &mercator_bounds, TILE_SIZE, TILE_SIZE).await?;
            Some(normalization_range(&coarse))
        };

        debug!(
            path = %path.display(),
            bands = dataset.band_count(),
            data_type = ?data_type,
            normalization = ?normalization,
            "Opened raster view"
        );

        Ok(Self {
            band_count: dataset.band_count(),
            path,
            mercator_bounds,
            lonlat_bounds,
            data_type,
            normalization,
            encoder,
            state: Mutex::new(ViewState::Open(Box::new(dataset))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extent in Web Mercator metres.
    pub fn mercator_bounds(&self) -> Bounds {
        self.mercator_bounds
    }

    /// Extent in longitude/latitude degrees.
    pub fn lonlat_bounds(&self) -> Bounds {
        self.lonlat_bounds
    }

    pub fn band_count(&self) -> usize {
        self.band_count
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Min/max used to stretch non-8-bit data, if any.
    pub fn normalization(&self) -> Option<(f64, f64)> {
        self.normalization
    }

    /// Whether the underlying file handle is currently open.
    pub async fn is_open(&self) -> bool {
        matches!(*self.state.lock().await, ViewState::Open(_))
    }

    /// Release the file handle. The next render reopens it.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, ViewState::Open(_)) {
            debug!(path = %self.path.display(), "Closing raster view");
        }
        *state = ViewState::Closed;
    }

    /// Release the file handle if no read holds it. Returns whether the view
    /// is now closed.
    pub fn try_close(&self) -> bool {
        match self.state.try_lock() {
            Ok(mut state) => {
                *state = ViewState::Closed;
                true
            }
            Err(_) => false,
        }
    }

    /// Hold the read lock, as an in-flight render would.
    #[cfg(test)]
    pub(crate) async fn hold(&self) -> impl Sized + '_ {
        self.state.lock().await
    }

    /// Render tile (z, x, y) to encoded bytes.
    ///
    /// Returns `None` for tiles outside the raster, tiles without any valid
    /// pixel, and tiles whose read kept failing.
    pub async fn render_tile(&self, z: u8, x: u32, y: u32) -> Option<Bytes> {
        let bounds = tile_bounds(z, x, y);
        if !bounds.intersects(&self.mercator_bounds) {
            return None;
        }

        let warped = match RetryPolicy::READ
            .run("read tile", |_| self.read_tile(&bounds))
            .await
        {
            Ok(warped) => warped,
            Err(err) => {
                error!(path = %self.path.display(), z, x, y, "Tile read failed: {}", err);
                return None;
            }
        };
        if !warped.has_data() {
            return None;
        }

        let rgba = compose_rgba(&warped, self.normalization);
        match self.encoder.encode(&rgba, warped.width, warped.height) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!(path = %self.path.display(), z, x, y, "{}", err);
                None
            }
        }
    }

    /// Warp `bounds` to one tile, reopening the file if it was closed.
    async fn read_tile(&self, bounds: &Bounds) -> Result<Warped, RasterError> {
        let mut state = self.state.lock().await;
        if state.dataset().is_none() {
            debug!(path = %self.path.display(), "Reopening closed raster view");
            *state = ViewState::Open(Box::new(RasterDataset::open(&self.path).await?));
        }
        let dataset = state
            .dataset()
            .ok_or_else(|| IoError::Io {
                path: self.path.display().to_string(),
                message: "raster handle is closed".to_string(),
            })?;
        Ok(warp(dataset, bounds, TILE_SIZE, TILE_SIZE).await?)
    }
}
