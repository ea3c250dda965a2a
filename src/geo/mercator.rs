//! Web Mercator tile grid.
//!
//! Tiles follow the XYZ convention: tile (0, 0) at zoom z is the north-west
//! corner, x grows eastwards and y southwards, and each zoom level splits
//! every tile into four.
//!
//! Tile enumeration for a geographic box follows the `mercantile`
//! conventions, so the set of tiles a sweep visits matches what common
//! tooling reports for the same box.

use super::Bounds;

/// Half the circumference of the Web Mercator world, in metres.
pub const HALF_CIRCUMFERENCE: f64 = 20_037_508.342_789_244;

/// Earth radius used by EPSG:3857.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator square.
pub const MAX_LATITUDE: f64 = 85.051_129;

/// Output tile edge in pixels.
pub const TILE_SIZE: u32 = 256;

/// Deepest zoom level accepted.
pub const MAX_ZOOM: u8 = 30;

/// Inward nudge of the south-east corner so boxes ending exactly on a tile
/// edge do not pull in the next row or column.
const LL_EPSILON: f64 = 1e-11;

/// Guard against floating point error when flooring fractional tile indices.
const EPSILON: f64 = 1e-14;

/// Bounds of tile (`z`, `x`, `y`) in EPSG:3857 metres.
pub fn tile_bounds(z: u8, x: u32, y: u32) -> Bounds {
    let span = 2.0 * HALF_CIRCUMFERENCE / 2f64.powi(z as i32);
    let left = -HALF_CIRCUMFERENCE + x as f64 * span;
    let top = HALF_CIRCUMFERENCE - y as f64 * span;
    Bounds::new(left, top - span, left + span, top)
}

/// Whether (`x`, `y`) lies on the grid of zoom `z`.
pub fn is_valid_tile(z: u8, x: u32, y: u32) -> bool {
    if z > MAX_ZOOM {
        return false;
    }
    let n = 1u64 << z;
    (x as u64) < n && (y as u64) < n
}

/// Longitude/latitude in degrees to EPSG:3857 metres.
///
/// Latitudes beyond the Mercator limit are clamped.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// EPSG:3857 metres to longitude/latitude in degrees.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Tile containing a longitude/latitude at zoom `z`.
fn tile_at(lon: f64, lat: f64, z: u8) -> (u32, u32) {
    let x = lon / 360.0 + 0.5;
    let sin_lat = lat.to_radians().sin();
    let y = 0.5 - 0.25 * ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / std::f64::consts::PI;

    let n = 2f64.powi(z as i32);
    let index = |v: f64| -> u32 {
        if v <= 0.0 {
            0
        } else if v >= 1.0 {
            n as u32 - 1
        } else {
            ((v + EPSILON) * n).floor() as u32
        }
    };
    (index(x), index(y))
}

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: u8,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }

    /// Tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32, u32)> + '_ {
        (self.min_x..=self.max_x)
            .flat_map(move |x| (self.min_y..=self.max_y).map(move |y| (self.z, x, y)))
    }
}

/// Tile ranges covering a geographic box (degrees) at zoom `z`.
///
/// A box whose west edge is east of its east edge crosses the antimeridian
/// and is split in two.
pub fn tiles_covering(west: f64, south: f64, east: f64, north: f64, z: u8) -> Vec<TileRange> {
    let boxes = if west > east {
        vec![(-180.0, south, east, north), (west, south, 180.0, north)]
    } else {
        vec![(west, south, east, north)]
    };

    boxes
        .into_iter()
        .filter_map(|(w, s, e, n)| {
            let w = w.max(-180.0);
            let s = s.max(-MAX_LATITUDE);
            let e = e.min(180.0);
            let n = n.min(MAX_LATITUDE);
            if !(w.is_finite() && s.is_finite() && e.is_finite() && n.is_finite()) || s > n {
                return None;
            }

            let (min_x, min_y) = tile_at(w, n, z);
            let (max_x, max_y) = tile_at(e - LL_EPSILON, s + LL_EPSILON, z);
            if max_x < min_x || max_y < min_y {
                return None;
            }
            Some(TileRange {
                z,
                min_x,
                max_x,
                min_y,
                max_y,
            })
        })
        .collect()
}
