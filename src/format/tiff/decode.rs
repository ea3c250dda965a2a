//! Chunk (tile or strip) codec.
//!
//! Decoded chunks are always little-endian, pixel-interleaved samples with
//! the full chunk geometry, regardless of the byte order of the file they
//! came from. Encoding is the reverse path used by the writer: horizontal
//! differencing followed by zlib.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use weezl::{decode::Decoder as LzwDecoder, BitOrder};

use crate::error::TiffError;

use super::parser::ByteOrder;
use super::tags::{sample_format, Compression, Predictor};

// =============================================================================
// Sample Types
// =============================================================================

/// Numeric type of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Derive the sample type from BitsPerSample and SampleFormat.
    pub fn from_tags(bits_per_sample: u16, format: u16) -> Result<Self, TiffError> {
        let data_type = match (format, bits_per_sample) {
            (sample_format::UNSIGNED, 8) => DataType::UInt8,
            (sample_format::SIGNED, 8) => DataType::Int8,
            (sample_format::UNSIGNED, 16) => DataType::UInt16,
            (sample_format::SIGNED, 16) => DataType::Int16,
            (sample_format::UNSIGNED, 32) => DataType::UInt32,
            (sample_format::SIGNED, 32) => DataType::Int32,
            (sample_format::FLOAT, 32) => DataType::Float32,
            (sample_format::FLOAT, 64) => DataType::Float64,
            _ => {
                return Err(TiffError::UnsupportedLayout(format!(
                    "{} bits per sample with sample format {}",
                    bits_per_sample, format
                )))
            }
        };
        Ok(data_type)
    }

    /// Size of one sample in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// BitsPerSample value.
    #[inline]
    pub const fn bits(self) -> u16 {
        (self.size() * 8) as u16
    }

    /// SampleFormat value.
    pub const fn sample_format(self) -> u16 {
        match self {
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => sample_format::UNSIGNED,
            DataType::Int8 | DataType::Int16 | DataType::Int32 => sample_format::SIGNED,
            DataType::Float32 | DataType::Float64 => sample_format::FLOAT,
        }
    }

    #[inline]
    pub const fn is_integer(self) -> bool {
        !matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Read sample `index` from little-endian bytes.
    #[inline]
    pub fn read_f64(self, bytes: &[u8], index: usize) -> f64 {
        let at = index * self.size();
        let b = &bytes[at..at + self.size()];
        match self {
            DataType::UInt8 => b[0] as f64,
            DataType::Int8 => b[0] as i8 as f64,
            DataType::UInt16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            DataType::Int16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            DataType::UInt32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::Int32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            DataType::Float64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                f64::from_le_bytes(buf)
            }
        }
    }

    /// Write `value` as sample `index` in little-endian bytes.
    ///
    /// Integer types round to nearest and saturate at the type's range.
    #[inline]
    pub fn write_f64(self, bytes: &mut [u8], index: usize, value: f64) {
        let at = index * self.size();
        let out = &mut bytes[at..at + self.size()];
        let v = if self.is_integer() { value.round() } else { value };
        match self {
            DataType::UInt8 => out[0] = v as u8,
            DataType::Int8 => out[0] = (v as i8) as u8,
            DataType::UInt16 => out.copy_from_slice(&(v as u16).to_le_bytes()),
            DataType::Int16 => out.copy_from_slice(&(v as i16).to_le_bytes()),
            DataType::UInt32 => out.copy_from_slice(&(v as u32).to_le_bytes()),
            DataType::Int32 => out.copy_from_slice(&(v as i32).to_le_bytes()),
            DataType::Float32 => out.copy_from_slice(&(v as f32).to_le_bytes()),
            DataType::Float64 => out.copy_from_slice(&v.to_le_bytes()),
        }
    }
}

// =============================================================================
// ChunkCodec
// =============================================================================

/// Everything needed to turn stored chunk bytes into samples and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    pub compression: Compression,
    pub predictor: Predictor,
    pub data_type: DataType,
    pub samples_per_pixel: u16,
    pub byte_order: ByteOrder,
}

impl ChunkCodec {
    /// Size in bytes of a decoded chunk of `width` x `rows` pixels.
    #[inline]
    pub fn decoded_len(&self, width: u32, rows: u32) -> usize {
        width as usize * rows as usize * self.samples_per_pixel as usize * self.data_type.size()
    }

    /// Decode one stored chunk of `width` x `rows` pixels.
    ///
    /// Short payloads are zero padded; trailing bytes are dropped.
    pub fn decode(&self, raw: &[u8], width: u32, rows: u32) -> Result<Vec<u8>, TiffError> {
        let expected = self.decoded_len(width, rows);
        let mut data = match self.compression {
            Compression::None => raw.to_vec(),
            Compression::Deflate | Compression::AdobeDeflate => {
                let mut out = Vec::with_capacity(expected);
                ZlibDecoder::new(raw)
                    .read_to_end(&mut out)
                    .map_err(|e| TiffError::Decode(format!("deflate: {}", e)))?;
                out
            }
            Compression::Lzw => {
                let mut out = Vec::with_capacity(expected);
                let mut decoder = LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8);
                let result = decoder.into_vec(&mut out).decode(raw);
                result
                    .status
                    .map_err(|e| TiffError::Decode(format!("lzw: {}", e)))?;
                out
            }
            other => return Err(TiffError::UnsupportedCompression(other.name().to_string())),
        };
        data.resize(expected, 0);

        let row_len = width as usize * self.samples_per_pixel as usize;
        match self.predictor {
            Predictor::FloatingPoint => {
                // Byte planes are stored most significant first, so this also
                // fixes the byte order.
                for row in data.chunks_exact_mut(row_len * self.data_type.size()) {
                    undo_float_predictor(row, self.samples_per_pixel as usize, self.data_type.size());
                }
            }
            predictor => {
                if self.byte_order.is_big_endian() {
                    swap_samples(&mut data, self.data_type.size());
                }
                if predictor == Predictor::Horizontal {
                    for row in data.chunks_exact_mut(row_len * self.data_type.size()) {
                        undo_horizontal(row, self.samples_per_pixel as usize, self.data_type.size());
                    }
                }
            }
        }

        Ok(data)
    }

    /// Encode little-endian samples of a `width`-pixel wide chunk.
    ///
    /// Only used by the writer, which always emits little-endian deflate.
    pub fn encode(&self, samples: &[u8], width: u32) -> Result<Vec<u8>, TiffError> {
        let mut data = samples.to_vec();
        let row_bytes = width as usize * self.samples_per_pixel as usize * self.data_type.size();

        if self.predictor == Predictor::Horizontal && row_bytes > 0 {
            for row in data.chunks_exact_mut(row_bytes) {
                apply_horizontal(row, self.samples_per_pixel as usize, self.data_type.size());
            }
        }

        match self.compression {
            Compression::None => Ok(data),
            Compression::Deflate | Compression::AdobeDeflate => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::default(),
                );
                encoder
                    .write_all(&data)
                    .map_err(|e| TiffError::Encode(format!("deflate: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| TiffError::Encode(format!("deflate: {}", e)))
            }
            other => Err(TiffError::UnsupportedCompression(other.name().to_string())),
        }
    }
}

// =============================================================================
// Predictors
// =============================================================================

fn swap_samples(data: &mut [u8], sample_size: usize) {
    if sample_size > 1 {
        for sample in data.chunks_exact_mut(sample_size) {
            sample.reverse();
        }
    }
}

/// Undo horizontal differencing on one row of little-endian samples.
fn undo_horizontal(row: &mut [u8], stride: usize, sample_size: usize) {
    match sample_size {
        1 => {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
        }
        2 => {
            let n = row.len() / 2;
            for i in stride..n {
                let prev = u16::from_le_bytes([row[(i - stride) * 2], row[(i - stride) * 2 + 1]]);
                let cur = u16::from_le_bytes([row[i * 2], row[i * 2 + 1]]);
                row[i * 2..i * 2 + 2].copy_from_slice(&cur.wrapping_add(prev).to_le_bytes());
            }
        }
        4 => {
            let n = row.len() / 4;
            for i in stride..n {
                let p = (i - stride) * 4;
                let prev = u32::from_le_bytes([row[p], row[p + 1], row[p + 2], row[p + 3]]);
                let c = i * 4;
                let cur = u32::from_le_bytes([row[c], row[c + 1], row[c + 2], row[c + 3]]);
                row[c..c + 4].copy_from_slice(&cur.wrapping_add(prev).to_le_bytes());
            }
        }
        _ => {
            let n = row.len() / 8;
            for i in stride..n {
                let mut prev = [0u8; 8];
                prev.copy_from_slice(&row[(i - stride) * 8..(i - stride) * 8 + 8]);
                let mut cur = [0u8; 8];
                cur.copy_from_slice(&row[i * 8..i * 8 + 8]);
                let sum = u64::from_le_bytes(cur).wrapping_add(u64::from_le_bytes(prev));
                row[i * 8..i * 8 + 8].copy_from_slice(&sum.to_le_bytes());
            }
        }
    }
}

/// Apply horizontal differencing to one row of little-endian samples.
fn apply_horizontal(row: &mut [u8], stride: usize, sample_size: usize) {
    let n = row.len() / sample_size;
    // Walk backwards so every difference uses the original left neighbour.
    for i in (stride..n).rev() {
        let c = i * sample_size;
        let p = (i - stride) * sample_size;
        match sample_size {
            1 => row[c] = row[c].wrapping_sub(row[p]),
            2 => {
                let cur = u16::from_le_bytes([row[c], row[c + 1]]);
                let prev = u16::from_le_bytes([row[p], row[p + 1]]);
                row[c..c + 2].copy_from_slice(&cur.wrapping_sub(prev).to_le_bytes());
            }
            4 => {
                let cur = u32::from_le_bytes([row[c], row[c + 1], row[c + 2], row[c + 3]]);
                let prev = u32::from_le_bytes([row[p], row[p + 1], row[p + 2], row[p + 3]]);
                row[c..c + 4].copy_from_slice(&cur.wrapping_sub(prev).to_le_bytes());
            }
            _ => {
                let mut cur = [0u8; 8];
                cur.copy_from_slice(&row[c..c + 8]);
                let mut prev = [0u8; 8];
                prev.copy_from_slice(&row[p..p + 8]);
                let diff = u64::from_le_bytes(cur).wrapping_sub(u64::from_le_bytes(prev));
                row[c..c + 8].copy_from_slice(&diff.to_le_bytes());
            }
        }
    }
}

/// Undo the floating point predictor on one row.
///
/// The row holds `sample_size` byte planes, most significant first, each
/// horizontally differenced byte-wise.
fn undo_float_predictor(row: &mut [u8], stride: usize, sample_size: usize) {
    for i in stride..row.len() {
        row[i] = row[i].wrapping_add(row[i - stride]);
    }

    let word_count = row.len() / sample_size;
    let planes = row.to_vec();
    for i in 0..word_count {
        for b in 0..sample_size {
            row[sample_size * i + b] = planes[(sample_size - b - 1) * word_count + i];
        }
    }
}
