//! An open GeoTIFF: structure, georeferencing and decoded-chunk access.
//!
//! A dataset owns its range reader, so dropping it closes the file. Decoded
//! chunks are kept in a small LRU because warping touches the same chunk
//! many times in a row and bilinear sampling regularly crosses into the
//! neighbouring chunk.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use tracing::debug;

use crate::error::{RasterError, TiffError};
use crate::format::tiff::{DataType, ImageLevel, TiffLayout};
use crate::format::GeoInfo;
use crate::geo::{Bounds, CoordTransformer};
use crate::io::{LocalFileReader, RangeReader};

/// Number of decoded chunks kept per dataset.
const DEFAULT_CHUNK_CACHE_CAPACITY: usize = 32;

/// An open raster.
pub struct RasterDataset<R: RangeReader = LocalFileReader> {
    reader: R,
    layout: TiffLayout,
    geo: GeoInfo,
    transformer: CoordTransformer,
    native_bounds: Bounds,
    chunks: LruCache<(usize, usize), Arc<Vec<u8>>>,
}

impl RasterDataset<LocalFileReader> {
    /// Open a GeoTIFF on local disk.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RasterError> {
        let reader = LocalFileReader::open(path).await?;
        Self::from_reader(reader).await
    }
}

impl<R: RangeReader> RasterDataset<R> {
    /// Parse structure and georeferencing from a reader.
    pub async fn from_reader(reader: R) -> Result<Self, RasterError> {
        let layout = TiffLayout::parse(&reader).await?;
        let geo = GeoInfo::read(&reader, &layout).await?;
        let transformer = CoordTransformer::new(geo.epsg)?;
        let base = layout.base();
        let native_bounds = geo.transform.bounds(base.width, base.height);

        debug!(
            file = reader.identifier(),
            width = base.width,
            height = base.height,
            samples = base.samples_per_pixel(),
            overviews = layout.overviews().len(),
            epsg = geo.epsg,
            "Opened raster"
        );

        Ok(Self {
            reader,
            layout,
            geo,
            transformer,
            native_bounds,
            chunks: LruCache::new(
                NonZeroUsize::new(DEFAULT_CHUNK_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        })
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    pub fn layout(&self) -> &TiffLayout {
        &self.layout
    }

    pub fn geo(&self) -> &GeoInfo {
        &self.geo
    }

    pub fn transformer(&self) -> &CoordTransformer {
        &self.transformer
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Full resolution size in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        let base = self.layout.base();
        (base.width, base.height)
    }

    pub fn data_type(&self) -> DataType {
        self.layout.base().data_type()
    }

    pub fn samples_per_pixel(&self) -> usize {
        self.layout.base().samples_per_pixel() as usize
    }

    /// Number of data bands (samples other than alpha).
    pub fn band_count(&self) -> usize {
        let samples = self.samples_per_pixel();
        if self.layout.alpha_sample.is_some() && samples > 1 {
            samples - 1
        } else {
            samples
        }
    }

    /// Sample indices of the data bands, in order.
    pub fn band_samples(&self) -> Vec<usize> {
        (0..self.samples_per_pixel())
            .filter(|&s| Some(s) != self.layout.alpha_sample)
            .take(self.band_count())
            .collect()
    }

    /// Extent in the native coordinate system.
    pub fn native_bounds(&self) -> Bounds {
        self.native_bounds
    }

    /// Extent reprojected to Web Mercator.
    pub fn mercator_bounds(&self) -> Result<Bounds, RasterError> {
        self.transformer
            .bounds_to_mercator(&self.native_bounds)
            .ok_or_else(|| RasterError::Projection("raster extent cannot be reprojected".to_string()))
    }

    /// Extent in longitude/latitude degrees.
    pub fn lonlat_bounds(&self) -> Result<Bounds, RasterError> {
        self.transformer
            .bounds_to_lonlat(&self.native_bounds)
            .ok_or_else(|| RasterError::Projection("raster extent cannot be reprojected".to_string()))
    }

    /// Whether a pixel's samples hold data.
    ///
    /// An alpha channel decides if present; otherwise band 1 is compared
    /// against the no-data value.
    #[inline]
    pub fn is_valid(&self, samples: &[u8], pixel: usize) -> bool {
        let data_type = self.data_type();
        let spp = self.samples_per_pixel();
        if let Some(alpha) = self.layout.alpha_sample {
            return data_type.read_f64(samples, pixel * spp + alpha) > 0.0;
        }
        match self.geo.nodata {
            Some(nodata) => {
                let value = data_type.read_f64(samples, pixel * spp);
                if nodata.is_nan() {
                    !value.is_nan()
                } else {
                    value != nodata
                }
            }
            None => true,
        }
    }

    /// Decoded chunk `index` of level `level`, through the chunk cache.
    pub async fn chunk(&mut self, level: usize, index: usize) -> Result<Arc<Vec<u8>>, TiffError> {
        if let Some(chunk) = self.chunks.get(&(level, index)) {
            return Ok(chunk.clone());
        }

        let image = self
            .layout
            .levels
            .get(level)
            .ok_or_else(|| TiffError::Decode(format!("no level {}", level)))?;
        let decoded = Arc::new(read_chunk(&self.reader, image, index).await?);
        self.chunks.put((level, index), decoded.clone());
        Ok(decoded)
    }

    /// Read a window of level `level` as little-endian interleaved samples.
    ///
    /// Parts of the window outside the image are zero filled.
    pub async fn read_window_raw(
        &mut self,
        level: usize,
        x0: u32,
        y0: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, TiffError> {
        let image = self
            .layout
            .levels
            .get(level)
            .map(LevelGeometry::of)
            .ok_or_else(|| TiffError::Decode(format!("no level {}", level)))?;
        let pixel_size = image.pixel_size;
        let mut out = vec![0u8; width as usize * height as usize * pixel_size];

        let x_end = (x0 + width).min(image.width);
        let y_end = (y0 + height).min(image.height);
        if x0 >= x_end || y0 >= y_end {
            return Ok(out);
        }

        let cx_start = x0 / image.chunk_width;
        let cx_end = (x_end - 1) / image.chunk_width;
        let cy_start = y0 / image.chunk_height;
        let cy_end = (y_end - 1) / image.chunk_height;

        for cy in cy_start..=cy_end {
            for cx in cx_start..=cx_end {
                let index = cy as usize * image.chunks_across as usize + cx as usize;
                let chunk = self.chunk(level, index).await?;

                let chunk_x0 = cx * image.chunk_width;
                let chunk_y0 = cy * image.chunk_height;
                let copy_x0 = x0.max(chunk_x0);
                let copy_x1 = x_end.min(chunk_x0 + image.chunk_width);
                let copy_y0 = y0.max(chunk_y0);
                let copy_y1 = y_end.min(chunk_y0 + image.chunk_height);
                let row_bytes = (copy_x1 - copy_x0) as usize * pixel_size;

                for y in copy_y0..copy_y1 {
                    let src = ((y - chunk_y0) as usize * image.chunk_width as usize
                        + (copy_x0 - chunk_x0) as usize)
                        * pixel_size;
                    let dst = ((y - y0) as usize * width as usize + (copy_x0 - x0) as usize)
                        * pixel_size;
                    if src + row_bytes <= chunk.len() {
                        out[dst..dst + row_bytes].copy_from_slice(&chunk[src..src + row_bytes]);
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Geometry of a level, detached from the dataset borrow.
struct LevelGeometry {
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    pixel_size: usize,
}

impl LevelGeometry {
    fn of(level: &ImageLevel) -> Self {
        Self {
            width: level.width,
            height: level.height,
            chunk_width: level.chunk_width,
            chunk_height: level.chunk_height,
            chunks_across: level.chunks_across,
            pixel_size: level.samples_per_pixel() as usize * level.data_type().size(),
        }
    }
}

/// Read and decode one chunk; sparse chunks (offset or size 0) are zeros.
async fn read_chunk<R: RangeReader>(
    reader: &R,
    level: &ImageLevel,
    index: usize,
) -> Result<Vec<u8>, TiffError> {
    let (offset, size) = level
        .chunk_location(index)
        .ok_or_else(|| TiffError::Decode(format!("chunk {} out of range", index)))?;

    let cy = (index / level.chunks_across as usize) as u32;
    let rows = level.chunk_rows(cy);

    if offset == 0 || size == 0 {
        return Ok(vec![0; level.codec.decoded_len(level.chunk_width, rows)]);
    }

    let len = usize::try_from(size).map_err(|_| TiffError::Decode(format!("chunk of {} bytes", size)))?;
    let raw = reader.read_exact_at(offset, len).await?;
    level.codec.decode(&raw, level.chunk_width, rows)
}
