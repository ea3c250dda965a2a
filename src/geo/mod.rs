//! Coordinate and tile-grid math.
//!
//! - [`Bounds`]: axis-aligned rectangle in any coordinate system
//! - [`mercator`]: Web Mercator (EPSG:3857) tile bounds and tile enumeration
//! - [`crs`]: transforms between a raster's native CRS and the serving projection

pub mod crs;
pub mod mercator;

pub use crs::CoordTransformer;
pub use mercator::{tile_bounds, tiles_covering, TileRange, TILE_SIZE};

/// Axis-aligned rectangle `[min_x, max_x] x [min_y, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the two rectangles share interior area.
    ///
    /// Rectangles that only touch along an edge do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Finite and non-empty.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }

    /// Smallest rectangle containing all points.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut bounds: Option<Bounds> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bounds = Some(match bounds {
                None => Bounds::new(x, y, x, y),
                Some(b) => Bounds::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            });
        }
        bounds
    }

    /// Points along the edges, `steps` segments per edge.
    pub fn edge_points(&self, steps: usize) -> Vec<(f64, f64)> {
        let steps = steps.max(1);
        let mut points = Vec::with_capacity(steps * 4);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            points.push((x, self.min_y));
            points.push((x, self.max_y));
            points.push((self.min_x, y));
            points.push((self.max_x, y));
        }
        points
    }
}
