//! Reprojecting reads.
//!
//! Resamples an arbitrary Web Mercator rectangle of a dataset onto a fixed
//! output grid without materializing a reprojected copy of the raster.
//!
//! ```text
//!   output pixel (i, j)
//!        │  approximate transform (exact on a 16 px grid, interpolated between)
//!        ▼
//!   level-0 pixel (col, row)
//!        │  scale to the chosen overview
//!        ▼
//!   level pixel ──► nearest sample: validity mask
//!               └─► bilinear of valid neighbours: band values
//! ```
//!
//! Pixels that fall outside the source image are invalid. Bilinear weights
//! of invalid neighbours are dropped and the rest renormalised, so data
//! edges do not bleed no-data values into the image.

use crate::error::TiffError;
use crate::geo::Bounds;
use crate::io::RangeReader;

use super::dataset::RasterDataset;

/// Spacing of exactly transformed points on the output grid.
const GRID_STEP: u32 = 16;

/// Result of a warped read.
#[derive(Debug, Clone, PartialEq)]
pub struct Warped {
    pub width: u32,
    pub height: u32,
    /// Number of data bands
    pub bands: usize,
    /// Band values, pixel-interleaved: `data[pixel * bands + band]`
    pub data: Vec<f64>,
    /// Validity per pixel: 255 = data, 0 = no data
    pub mask: Vec<u8>,
}

impl Warped {
    /// Whether any output pixel holds data.
    pub fn has_data(&self) -> bool {
        self.mask.iter().any(|&m| m != 0)
    }
}

/// Maps output pixel centres to level-0 source pixel coordinates.
struct ApproxTransform {
    nodes_across: usize,
    nodes: Vec<Option<(f64, f64)>>,
}

impl ApproxTransform {
    fn build<R: RangeReader>(ds: &RasterDataset<R>, bounds: &Bounds, width: u32, height: u32) -> Self {
        let nodes_across = width.div_ceil(GRID_STEP) as usize + 1;
        let nodes_down = height.div_ceil(GRID_STEP) as usize + 1;
        let mut nodes = Vec::with_capacity(nodes_across * nodes_down);
        for gy in 0..nodes_down {
            for gx in 0..nodes_across {
                nodes.push(exact(
                    ds,
                    bounds,
                    width,
                    height,
                    (gx as u32 * GRID_STEP) as f64 + 0.5,
                    (gy as u32 * GRID_STEP) as f64 + 0.5,
                ));
            }
        }
        Self {
            nodes_across,
            nodes,
        }
    }

    fn node(&self, gx: usize, gy: usize) -> Option<(f64, f64)> {
        self.nodes.get(gy * self.nodes_across + gx).copied().flatten()
    }

    /// Interpolated source position of output pixel (i, j), if all four
    /// surrounding grid nodes transformed.
    fn interpolate(&self, i: u32, j: u32) -> Option<(f64, f64)> {
        let gx = (i / GRID_STEP) as usize;
        let gy = (j / GRID_STEP) as usize;
        let tx = (i % GRID_STEP) as f64 / GRID_STEP as f64;
        let ty = (j % GRID_STEP) as f64 / GRID_STEP as f64;

        let (x00, y00) = self.node(gx, gy)?;
        let (x10, y10) = self.node(gx + 1, gy)?;
        let (x01, y01) = self.node(gx, gy + 1)?;
        let (x11, y11) = self.node(gx + 1, gy + 1)?;

        let top = (x00 + (x10 - x00) * tx, y00 + (y10 - y00) * tx);
        let bottom = (x01 + (x11 - x01) * tx, y01 + (y11 - y01) * tx);
        Some((top.0 + (bottom.0 - top.0) * ty, top.1 + (bottom.1 - top.1) * ty))
    }

    /// Source pixels per output pixel, from the spacing of grid nodes.
    fn scale(&self) -> f64 {
        let nodes_down = self.nodes.len() / self.nodes_across;
        let mut across = (0.0, 0usize);
        let mut down = (0.0, 0usize);
        for gy in 0..nodes_down {
            for gx in 0..self.nodes_across {
                let Some(a) = self.node(gx, gy) else { continue };
                if let Some(b) = self.node(gx + 1, gy).filter(|_| gx + 1 < self.nodes_across) {
                    across.0 += (b.0 - a.0).hypot(b.1 - a.1);
                    across.1 += 1;
                }
                if let Some(b) = self.node(gx, gy + 1) {
                    down.0 += (b.0 - a.0).hypot(b.1 - a.1);
                    down.1 += 1;
                }
            }
        }
        if across.1 == 0 || down.1 == 0 {
            return 1.0;
        }
        let sx = across.0 / across.1 as f64 / GRID_STEP as f64;
        let sy = down.0 / down.1 as f64 / GRID_STEP as f64;
        let scale = sx.min(sy);
        if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        }
    }
}

/// Exact source position of an output point given in pixel units.
fn exact<R: RangeReader>(
    ds: &RasterDataset<R>,
    bounds: &Bounds,
    width: u32,
    height: u32,
    px: f64,
    py: f64,
) -> Option<(f64, f64)> {
    let mx = bounds.min_x + px * bounds.width() / width as f64;
    let my = bounds.max_y - py * bounds.height() / height as f64;
    let (x, y) = ds.transformer().from_mercator(mx, my)?;
    let (col, row) = ds.geo().transform.world_to_pixel(x, y);
    (col.is_finite() && row.is_finite()).then_some((col, row))
}

/// A pending output pixel, keyed by the chunk of its nearest source pixel.
struct Sample {
    chunk: usize,
    pixel: usize,
    col: f64,
    row: f64,
}

/// Read `bounds` (EPSG:3857) resampled to `width` x `height` pixels.
pub async fn warp<R: RangeReader>(
    ds: &mut RasterDataset<R>,
    bounds: &Bounds,
    width: u32,
    height: u32,
) -> Result<Warped, TiffError> {
    let bands = ds.band_count();
    let band_samples = ds.band_samples();
    let spp = ds.samples_per_pixel();
    let data_type = ds.data_type();
    let pixel_count = width as usize * height as usize;

    let mut out = Warped {
        width,
        height,
        bands,
        data: vec![0.0; pixel_count * bands],
        mask: vec![0; pixel_count],
    };
    if pixel_count == 0 || !bounds.is_valid() {
        return Ok(out);
    }

    let approx = ApproxTransform::build(ds, bounds, width, height);
    let level_index = ds.layout().level_for_downsample(approx.scale());
    let (base_w, base_h) = ds.dimensions();
    let level = &ds.layout().levels[level_index];
    let (lw, lh) = (level.width, level.height);
    let (cw, ch, across) = (level.chunk_width, level.chunk_height, level.chunks_across);
    let fx = lw as f64 / base_w as f64;
    let fy = lh as f64 / base_h as f64;

    let mut samples = Vec::with_capacity(pixel_count);
    for j in 0..height {
        for i in 0..width {
            let Some((col, row)) = approx.interpolate(i, j).or_else(|| {
                exact(ds, bounds, width, height, i as f64 + 0.5, j as f64 + 0.5)
            }) else {
                continue;
            };
            let (col, row) = (col * fx, row * fy);
            if col < 0.0 || row < 0.0 || col >= lw as f64 || row >= lh as f64 {
                continue;
            }
            let (nc, nr) = (col as u32, row as u32);
            samples.push(Sample {
                chunk: (nr / ch) as usize * across as usize + (nc / cw) as usize,
                pixel: j as usize * width as usize + i as usize,
                col,
                row,
            });
        }
    }
    // Visit pixels chunk by chunk so the chunk cache stays hot.
    samples.sort_by_key(|s| s.chunk);

    let mut values = vec![0.0; bands];
    for sample in &samples {
        let (nc, nr) = (sample.col as u32, sample.row as u32);
        let (chunk, offset) = source_pixel(ds, level_index, (cw, ch, across), nc, nr).await?;
        if !ds.is_valid(&chunk, offset) {
            continue;
        }
        out.mask[sample.pixel] = 255;

        // Bilinear over valid neighbours.
        let u = sample.col - 0.5;
        let v = sample.row - 0.5;
        let x0 = u.floor();
        let y0 = v.floor();
        let (tx, ty) = (u - x0, v - y0);

        values.iter_mut().for_each(|v| *v = 0.0);
        let mut weight_sum = 0.0;
        for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
            let (x, y) = (x0 + dx, y0 + dy);
            if x < 0.0 || y < 0.0 || x >= lw as f64 || y >= lh as f64 {
                continue;
            }
            let weight = (if dx > 0.0 { tx } else { 1.0 - tx }) * (if dy > 0.0 { ty } else { 1.0 - ty });
            if weight <= 0.0 {
                continue;
            }
            let (neighbour, at) = source_pixel(ds, level_index, (cw, ch, across), x as u32, y as u32).await?;
            if !ds.is_valid(&neighbour, at) {
                continue;
            }
            for (b, &s) in band_samples.iter().enumerate() {
                values[b] += weight * data_type.read_f64(&neighbour, at * spp + s);
            }
            weight_sum += weight;
        }

        let dst = &mut out.data[sample.pixel * bands..(sample.pixel + 1) * bands];
        if weight_sum > 0.0 {
            for (d, v) in dst.iter_mut().zip(&values) {
                *d = v / weight_sum;
            }
        } else {
            for (d, &s) in dst.iter_mut().zip(&band_samples) {
                *d = data_type.read_f64(&chunk, offset * spp + s);
            }
        }
    }

    Ok(out)
}

/// Decoded chunk holding level pixel (col, row) and the pixel's index in it.
async fn source_pixel<R: RangeReader>(
    ds: &mut RasterDataset<R>,
    level: usize,
    (cw, ch, across): (u32, u32, u32),
    col: u32,
    row: u32,
) -> Result<(std::sync::Arc<Vec<u8>>, usize), TiffError> {
    let (cx, cy) = (col / cw, row / ch);
    let chunk = ds.chunk(level, cy as usize * across as usize + cx as usize).await?;
    let offset = (row - cy * ch) as usize * cw as usize + (col - cx * cw) as usize;
    Ok((chunk, offset))
}
