//! Tile image encoder.
//!
//! Rendered tiles are RGBA buffers. They are encoded as lossy WebP by
//! default, which keeps tiles small while preserving the alpha channel; PNG
//! is available for clients without WebP support.
//!
//! # Design Decisions
//!
//! - **One encoder per service**: format and quality are fixed at startup, so
//!   every cached tile for a key has the same encoding.
//!
//! - **Placeholder**: the fully transparent tile is encoded once and served
//!   for every tile that renders as absent.

use std::io::Cursor;

use bytes::Bytes;
use image::{ImageFormat, RgbaImage};

use crate::error::TileError;

/// Default WebP quality (1-100).
pub const DEFAULT_TILE_QUALITY: u8 = 82;

/// Minimum allowed quality.
pub const MIN_TILE_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_TILE_QUALITY: u8 = 100;

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TileFormat {
    #[default]
    Webp,
    Png,
}

impl TileFormat {
    /// MIME type for HTTP responses.
    pub const fn content_type(self) -> &'static str {
        match self {
            TileFormat::Webp => "image/webp",
            TileFormat::Png => "image/png",
        }
    }

    /// File extension, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            TileFormat::Webp => "webp",
            TileFormat::Png => "png",
        }
    }
}

/// Encodes RGBA tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEncoder {
    format: TileFormat,
    quality: u8,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(TileFormat::Webp, DEFAULT_TILE_QUALITY)
    }
}

impl TileEncoder {
    /// Create an encoder; quality is clamped to 1-100.
    pub fn new(format: TileFormat, quality: u8) -> Self {
        Self {
            format,
            quality: clamp_quality(quality),
        }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a `width` x `height` RGBA buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size does not match the dimensions or
    /// the codec fails.
    pub fn encode(&self, rgba: &[u8], width: u32, height: u32) -> Result<Bytes, TileError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(TileError::Encode {
                message: format!("expected {} RGBA bytes, got {}", expected, rgba.len()),
            });
        }

        match self.format {
            TileFormat::Webp => {
                let memory = webp::Encoder::from_rgba(rgba, width, height)
                    .encode_simple(false, self.quality as f32)
                    .map_err(|e| TileError::Encode {
                        message: format!("webp: {:?}", e),
                    })?;
                Ok(Bytes::copy_from_slice(&memory))
            }
            TileFormat::Png => {
                let img = RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(|| {
                    TileError::Encode {
                        message: "buffer does not match dimensions".to_string(),
                    }
                })?;
                let mut output = Vec::new();
                img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                    .map_err(|e| TileError::Encode {
                        message: e.to_string(),
                    })?;
                Ok(Bytes::from(output))
            }
        }
    }

    /// Encode the fully transparent tile of the given size.
    pub fn placeholder(&self, width: u32, height: u32) -> Result<Bytes, TileError> {
        self.encode(&vec![0u8; width as usize * height as usize * 4], width, height)
    }
}

/// Clamp quality to the valid range (1-100).
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_TILE_QUALITY, MAX_TILE_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        rgba
    }

    #[test]
    fn test_webp_output_decodes() {
        let encoder = TileEncoder::default();
        let data = encoder.encode(&gradient(64, 64), 64, 64).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WEBP");

        let img = image::load_from_memory_with_format(&data, ImageFormat::WebP).unwrap();
        assert_eq!(img.width(), 64);
        assert_eq!(img.height(), 64);
    }

    #[test]
    fn test_png_is_lossless() {
        let encoder = TileEncoder::new(TileFormat::Png, 82);
        let rgba = gradient(32, 16);
        let data = encoder.encode(&rgba, 32, 16).unwrap();
        let img = image::load_from_memory_with_format(&data, ImageFormat::Png)
            .unwrap()
            .to_rgba8();
        assert_eq!(img.into_raw(), rgba);
    }

    #[test]
    fn test_placeholder_is_transparent() {
        let encoder = TileEncoder::new(TileFormat::Png, 82);
        let data = encoder.placeholder(256, 256).unwrap();
        let img = image::load_from_memory(&data).unwrap().to_rgba8();
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_rejects_wrong_buffer_size() {
        let encoder = TileEncoder::default();
        assert!(matches!(
            encoder.encode(&[0u8; 10], 4, 4),
            Err(TileError::Encode { .. })
        ));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(TileEncoder::new(TileFormat::Webp, 0).quality(), 1);
        assert_eq!(TileEncoder::new(TileFormat::Webp, 200).quality(), 100);
        assert_eq!(TileFormat::Png.content_type(), "image/png");
    }
}
