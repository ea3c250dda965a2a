//! Raster access and tile rendering.
//!
//! ```text
//!   HandlePool ──► RasterView ──► warp ──► RasterDataset ──► TiffLayout + chunks
//!   (path -> view)  (one lock)    (3857 grid)  (chunk LRU)
//! ```
//!
//! - [`dataset`]: an open GeoTIFF with decoded-chunk caching
//! - [`warp`]: reprojected, resampled reads onto a Web Mercator grid
//! - [`compose`]: normalization and RGBA composition
//! - [`view`]: one long-lived view per file, rendering single tiles
//! - [`pool`]: the bounded registry of views

pub mod compose;
pub mod dataset;
pub mod pool;
pub mod view;
pub mod warp;

#[cfg(test)]
pub(crate) mod fixtures;

pub use dataset::RasterDataset;
pub use pool::{EvictionPolicy, HandlePool, TileSource, DEFAULT_MAX_HANDLES};
pub use view::RasterView;
pub use warp::{warp, Warped};
