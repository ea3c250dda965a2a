//! Turning warped band values into an 8-bit RGBA tile.

use super::warp::Warped;

/// Range used when a coarse read finds no informative pixel.
pub const DEFAULT_RANGE: (f64, f64) = (0.0, 255.0);

/// Min/max over all bands of valid, finite, non-zero values.
///
/// Returns [`DEFAULT_RANGE`] if no such value exists.
pub fn normalization_range(warped: &Warped) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for (pixel, &mask) in warped.mask.iter().enumerate() {
        if mask == 0 {
            continue;
        }
        for &value in &warped.data[pixel * warped.bands..(pixel + 1) * warped.bands] {
            if value.is_finite() && value != 0.0 {
                min = min.min(value);
                max = max.max(value);
            }
        }
    }
    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        DEFAULT_RANGE
    }
}

/// Compose an RGBA buffer.
///
/// Non-finite values become 0. With a `range` values are clipped to it and
/// rescaled to 0-255; without one they are rounded and clamped. Three or
/// more bands give RGB from the first three, fewer replicate band 1 as grey.
/// Alpha is the validity mask.
pub fn compose_rgba(warped: &Warped, range: Option<(f64, f64)>) -> Vec<u8> {
    let to_byte = |value: f64| -> u8 {
        let value = if value.is_finite() { value } else { 0.0 };
        let scaled = match range {
            Some((min, max)) => {
                let span = if max > min { max - min } else { 1.0 };
                (value.clamp(min, max.max(min)) - min) / span * 255.0
            }
            None => value,
        };
        scaled.round().clamp(0.0, 255.0) as u8
    };

    let pixels = warped.mask.len();
    let mut rgba = Vec::with_capacity(pixels * 4);
    for (pixel, &alpha) in warped.mask.iter().enumerate() {
        let values = &warped.data[pixel * warped.bands..(pixel + 1) * warped.bands];
        let (r, g, b) = match values {
            [r, g, b, ..] => (to_byte(*r), to_byte(*g), to_byte(*b)),
            [grey, ..] => {
                let v = to_byte(*grey);
                (v, v, v)
            }
            [] => (0, 0, 0),
        };
        rgba.extend_from_slice(&[r, g, b, alpha]);
    }
    rgba
}
