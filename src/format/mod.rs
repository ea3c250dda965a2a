//! Raster file formats.
//!
//! - [`tiff`]: TIFF/BigTIFF structure, chunk codecs and the tiled writer
//! - [`geotiff`]: georeferencing tags on top of a parsed TIFF

pub mod geotiff;
pub mod tiff;

pub use geotiff::{GeoInfo, GeoTransform};
