//! GeoTIFF georeferencing.
//!
//! Reads the affine pixel-to-world transform, the EPSG code of the
//! coordinate system and GDAL's no-data value from the full resolution
//! directory.

use crate::error::{RasterError, TiffError};
use crate::geo::Bounds;
use crate::io::RangeReader;

use super::tiff::{TiffLayout, TiffTag, ValueReader};

// GeoKey IDs
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// North-up affine transform from pixel (col, row) to world (x, y).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub origin_y: f64,
    /// Negative for north-up images
    pub pixel_height: f64,
}

impl GeoTransform {
    #[inline]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    #[inline]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// World bounds of a `width` x `height` image.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(width as f64, height as f64);
        Bounds::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Georeferencing of a GeoTIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub transform: GeoTransform,
    pub epsg: u32,
    pub nodata: Option<f64>,
}

impl GeoInfo {
    /// Read georeferencing from the full resolution directory of `layout`.
    pub async fn read<R: RangeReader>(reader: &R, layout: &TiffLayout) -> Result<Self, RasterError> {
        let values = ValueReader::new(reader, &layout.header);
        let ifd = &layout.base_ifd;

        let keys = match ifd.get_entry_by_tag(TiffTag::GeoKeyDirectory) {
            Some(entry) => parse_geokeys(&values.read_u16_array(entry).await?),
            None => Vec::new(),
        };
        let key = |id: u16| keys.iter().find(|(k, _)| *k == id).map(|(_, v)| *v);

        let mut transform = if let Some(entry) = ifd.get_entry_by_tag(TiffTag::ModelTransformation)
        {
            let m = values.read_f64_array(entry).await?;
            if m.len() < 16 {
                return Err(TiffError::InvalidTagValue {
                    tag: "ModelTransformation",
                    message: format!("expected 16 values, got {}", m.len()),
                }
                .into());
            }
            if m[1] != 0.0 || m[4] != 0.0 {
                return Err(RasterError::Projection(
                    "rotated rasters are not supported".to_string(),
                ));
            }
            GeoTransform {
                origin_x: m[3],
                pixel_width: m[0],
                origin_y: m[7],
                pixel_height: m[5],
            }
        } else {
            let scale = match ifd.get_entry_by_tag(TiffTag::ModelPixelScale) {
                Some(entry) => values.read_f64_array(entry).await?,
                None => return Err(RasterError::MissingGeoreference),
            };
            let tiepoint = match ifd.get_entry_by_tag(TiffTag::ModelTiepoint) {
                Some(entry) => values.read_f64_array(entry).await?,
                None => return Err(RasterError::MissingGeoreference),
            };
            if scale.len() < 2 || tiepoint.len() < 6 {
                return Err(RasterError::MissingGeoreference);
            }
            let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
            GeoTransform {
                origin_x: x - i * scale[0],
                pixel_width: scale[0],
                origin_y: y + j * scale[1],
                pixel_height: -scale[1],
            }
        };

        if transform.pixel_width == 0.0
            || transform.pixel_height == 0.0
            || !transform.origin_x.is_finite()
            || !transform.origin_y.is_finite()
        {
            return Err(RasterError::MissingGeoreference);
        }

        // Tiepoints of PixelIsPoint rasters refer to pixel centres.
        if key(GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
            transform.origin_x -= transform.pixel_width / 2.0;
            transform.origin_y -= transform.pixel_height / 2.0;
        }

        let epsg = match (key(PROJECTED_CS_TYPE), key(GEOGRAPHIC_TYPE), key(GT_MODEL_TYPE)) {
            (Some(code), _, _) if code != USER_DEFINED => code as u32,
            (Some(_), _, _) => {
                return Err(RasterError::UnsupportedCrs(
                    "user-defined projection".to_string(),
                ))
            }
            (None, Some(code), _) if code != USER_DEFINED => code as u32,
            (None, Some(_), _) => {
                return Err(RasterError::UnsupportedCrs(
                    "user-defined geographic system".to_string(),
                ))
            }
            (None, None, Some(MODEL_TYPE_GEOGRAPHIC)) => 4326,
            (None, None, _) => {
                return Err(RasterError::UnsupportedCrs(
                    "no coordinate system".to_string(),
                ))
            }
        };

        let nodata = match ifd.get_entry_by_tag(TiffTag::GdalNodata) {
            Some(entry) => parse_nodata(&values.read_string(entry).await?),
            None => None,
        };

        Ok(GeoInfo {
            transform,
            epsg,
            nodata,
        })
    }
}

/// Short-valued keys of a GeoKeyDirectory as (key, value) pairs.
fn parse_geokeys(directory: &[u16]) -> Vec<(u16, u16)> {
    if directory.len() < 4 {
        return Vec::new();
    }
    let count = directory[3] as usize;
    directory[4..]
        .chunks_exact(4)
        .take(count)
        // location 0 means the value is stored in the entry itself
        .filter(|k| k[1] == 0)
        .map(|k| (k[0], k[3]))
        .collect()
}

/// Parse GDAL's ASCII no-data value.
pub fn parse_nodata(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    text.parse::<f64>().ok()
}
