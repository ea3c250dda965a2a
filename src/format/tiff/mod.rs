//! TIFF reading and writing.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. All multi-byte values must be read respecting this order.
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets (max 4GB files),
//!   while BigTIFF uses 64-bit offsets. The parser and writer handle both.
//!
//! - **IFD (Image File Directory)**: Contains metadata and pointers to image data.
//!   A GeoTIFF has one IFD for the full resolution image, optionally followed by
//!   overview and mask IFDs.
//!
//! - **Chunks**: Pixel data is stored in tiles or strips, each compressed
//!   independently. The reader decodes one chunk at a time.

mod decode;
mod layout;
mod parser;
mod tags;
mod values;
mod writer;

pub use decode::{ChunkCodec, DataType};
pub use layout::{ImageLevel, TiffLayout};
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{
    photometric, sample_format, Compression, FieldType, Predictor, TiffTag, STRUCTURAL_TAGS,
    SUBFILE_MASK, SUBFILE_REDUCED_IMAGE,
};
pub use values::{parse_u64_array, ValueReader};
pub use writer::{needs_bigtiff, RawTag, TiledTiffWriter, WriterOptions};
