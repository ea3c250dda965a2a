//! Coordinate transforms between a raster's native CRS and Web Mercator.
//!
//! Every transform pivots through WGS84 longitude/latitude in degrees. Web
//! Mercator and geographic rasters use closed-form math; projected rasters
//! go through `proj4rs` with a built-in table of proj strings.

use proj4rs::proj::Proj;

use crate::error::RasterError;

use super::mercator::{lonlat_to_mercator, mercator_to_lonlat};
use super::Bounds;

pub const EPSG_WGS84: u32 = 4326;
pub const EPSG_WEB_MERCATOR: u32 = 3857;

const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Geographic CRS treated as WGS84 (sub-metre datum differences).
const GEOGRAPHIC_CODES: &[u32] = &[4326, 4258, 4269, 4283, 4617, 4674];

/// Proj string for an EPSG code, for the projected systems we support.
fn proj_string(epsg: u32) -> Option<String> {
    match epsg {
        // WGS84 / UTM north and south
        32601..=32660 => Some(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            epsg - 32600
        )),
        32701..=32760 => Some(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            epsg - 32700
        )),
        // NAD83 / UTM
        26901..=26923 => Some(format!(
            "+proj=utm +zone={} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            epsg - 26900
        )),
        // ETRS89 / UTM
        25828..=25838 => Some(format!(
            "+proj=utm +zone={} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            epsg - 25800
        )),
        // ETRS89 / LAEA Europe
        3035 => Some(
            "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +units=m +no_defs"
                .to_string(),
        ),
        // WGS84 / World Mercator
        3395 => Some("+proj=merc +lon_0=0 +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs".to_string()),
        _ => None,
    }
}

enum Native {
    WebMercator,
    Geographic,
    Projected { native: Proj, wgs84: Proj },
}

/// Transforms between one native CRS and Web Mercator / lon-lat.
pub struct CoordTransformer {
    epsg: u32,
    native: Native,
}

impl std::fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("epsg", &self.epsg)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    /// Create a transformer for rasters stored in EPSG:`epsg`.
    ///
    /// # Errors
    /// Returns `UnsupportedCrs` for codes outside the built-in table and
    /// `Projection` if proj4rs rejects the definition.
    pub fn new(epsg: u32) -> Result<Self, RasterError> {
        let native = if epsg == EPSG_WEB_MERCATOR {
            Native::WebMercator
        } else if GEOGRAPHIC_CODES.contains(&epsg) {
            Native::Geographic
        } else {
            let definition =
                proj_string(epsg).ok_or_else(|| RasterError::UnsupportedCrs(format!("EPSG:{}", epsg)))?;
            let native = Proj::from_proj_string(&definition)
                .map_err(|e| RasterError::Projection(format!("EPSG:{}: {:?}", epsg, e)))?;
            let wgs84 = Proj::from_proj_string(WGS84_PROJ)
                .map_err(|e| RasterError::Projection(format!("WGS84: {:?}", e)))?;
            Native::Projected { native, wgs84 }
        };
        Ok(Self { epsg, native })
    }

    /// Whether an EPSG code can be handled.
    pub fn is_supported(epsg: u32) -> bool {
        epsg == EPSG_WEB_MERCATOR || GEOGRAPHIC_CODES.contains(&epsg) || proj_string(epsg).is_some()
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Native coordinates to longitude/latitude in degrees.
    pub fn to_lonlat(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let result = match &self.native {
            Native::WebMercator => mercator_to_lonlat(x, y),
            Native::Geographic => (x, y),
            Native::Projected { native, wgs84 } => {
                let mut point = (x, y, 0.0);
                proj4rs::transform::transform(native, wgs84, &mut point).ok()?;
                (point.0.to_degrees(), point.1.to_degrees())
            }
        };
        finite(result)
    }

    /// Longitude/latitude in degrees to native coordinates.
    pub fn from_lonlat(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let result = match &self.native {
            Native::WebMercator => lonlat_to_mercator(lon, lat),
            Native::Geographic => (lon, lat),
            Native::Projected { native, wgs84 } => {
                let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
                proj4rs::transform::transform(wgs84, native, &mut point).ok()?;
                (point.0, point.1)
            }
        };
        finite(result)
    }

    /// Native coordinates to Web Mercator metres.
    pub fn to_mercator(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self.native {
            Native::WebMercator => finite((x, y)),
            _ => {
                let (lon, lat) = self.to_lonlat(x, y)?;
                finite(lonlat_to_mercator(lon, lat))
            }
        }
    }

    /// Web Mercator metres to native coordinates.
    pub fn from_mercator(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self.native {
            Native::WebMercator => finite((x, y)),
            _ => {
                let (lon, lat) = mercator_to_lonlat(x, y);
                self.from_lonlat(lon, lat)
            }
        }
    }

    /// Native bounds reprojected to Web Mercator, densified along the edges.
    pub fn bounds_to_mercator(&self, bounds: &Bounds) -> Option<Bounds> {
        Bounds::from_points(
            bounds
                .edge_points(20)
                .into_iter()
                .filter_map(|(x, y)| self.to_mercator(x, y)),
        )
        .filter(Bounds::is_valid)
    }

    /// Native bounds reprojected to longitude/latitude, densified along the edges.
    pub fn bounds_to_lonlat(&self, bounds: &Bounds) -> Option<Bounds> {
        Bounds::from_points(
            bounds
                .edge_points(20)
                .into_iter()
                .filter_map(|(x, y)| self.to_lonlat(x, y)),
        )
        .filter(Bounds::is_valid)
    }
}

fn finite((x, y): (f64, f64)) -> Option<(f64, f64)> {
    (x.is_finite() && y.is_finite()).then_some((x, y))
}
