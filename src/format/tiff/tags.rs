//! TIFF tag, field type and enumerated value definitions.
//!
//! Covers the baseline tags needed to decode tiled and striped rasters,
//! the GeoTIFF tags used for georeferencing, and the GDAL private tags
//! (nodata, metadata) that GeoTIFF producers commonly write.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,
    /// 8-bit ASCII character, NUL terminated
    Ascii = 2,
    /// Unsigned 16-bit integer
    Short = 3,
    /// Unsigned 32-bit integer
    Long = 4,
    /// Two Longs: numerator, denominator
    Rational = 5,
    /// Signed 8-bit integer
    SByte = 6,
    /// Opaque byte
    Undefined = 7,
    /// Signed 16-bit integer
    SShort = 8,
    /// Signed 32-bit integer
    SLong = 9,
    /// Two SLongs: numerator, denominator
    SRational = 10,
    /// IEEE single precision
    Float = 11,
    /// IEEE double precision (GeoTIFF model tags)
    Double = 12,
    /// 32-bit IFD offset
    Ifd = 13,
    /// Unsigned 64-bit integer (BigTIFF)
    Long8 = 16,
    /// Signed 64-bit integer (BigTIFF)
    SLong8 = 17,
    /// 64-bit IFD offset (BigTIFF)
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Width of the unit that must be byte-swapped when changing endianness.
    ///
    /// Rationals are two independent 32-bit words.
    #[inline]
    pub const fn swap_unit(self) -> usize {
        match self {
            FieldType::Rational | FieldType::SRational => 4,
            other => other.size_in_bytes(),
        }
    }

    /// Whether the type only exists in BigTIFF files.
    #[inline]
    pub const fn is_bigtiff_only(self) -> bool {
        matches!(self, FieldType::Long8 | FieldType::SLong8 | FieldType::Ifd8)
    }

    /// Create a FieldType from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            13 => Some(FieldType::Ifd),
            16 => Some(FieldType::Long8),
            17 => Some(FieldType::SLong8),
            18 => Some(FieldType::Ifd8),
            _ => None,
        }
    }

    /// Numeric value written to an IFD entry.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maximum bytes that can be stored inline in a classic TIFF IFD entry.
    pub const INLINE_THRESHOLD_TIFF: usize = 4;

    /// Maximum bytes that can be stored inline in a BigTIFF IFD entry.
    pub const INLINE_THRESHOLD_BIGTIFF: usize = 8;

    /// Check if a value with this type and count fits inline in an entry.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let total_size = (self.size_in_bytes() as u64).saturating_mul(count);
        let threshold = if is_bigtiff {
            Self::INLINE_THRESHOLD_BIGTIFF as u64
        } else {
            Self::INLINE_THRESHOLD_TIFF as u64
        };
        total_size <= threshold
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// TIFF tag IDs the reader and writer understand.
///
/// Unknown tags are kept as raw entries in the IFD; only these have names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Basic Image Structure
    // -------------------------------------------------------------------------
    /// Bit flags: 1 = reduced resolution, 4 = transparency mask
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    ImageDescription = 270,
    SamplesPerPixel = 277,
    PlanarConfiguration = 284,
    Predictor = 317,
    /// Meaning of samples beyond the photometric ones (2 = unassociated alpha)
    ExtraSamples = 338,
    /// 1 = unsigned, 2 = signed, 3 = IEEE float
    SampleFormat = 339,

    // -------------------------------------------------------------------------
    // Strip Organization
    // -------------------------------------------------------------------------
    StripOffsets = 273,
    RowsPerStrip = 278,
    StripByteCounts = 279,

    // -------------------------------------------------------------------------
    // Tile Organization
    // -------------------------------------------------------------------------
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,

    // -------------------------------------------------------------------------
    // GeoTIFF
    // -------------------------------------------------------------------------
    ModelPixelScale = 33550,
    ModelTiepoint = 33922,
    ModelTransformation = 34264,
    GeoKeyDirectory = 34735,
    GeoDoubleParams = 34736,
    GeoAsciiParams = 34737,

    // -------------------------------------------------------------------------
    // GDAL private tags
    // -------------------------------------------------------------------------
    /// XML metadata document
    GdalMetadata = 42112,
    /// No-data value as ASCII text
    GdalNodata = 42113,
}

impl TiffTag {
    /// Create a TiffTag from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            254 => Some(TiffTag::NewSubfileType),
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            270 => Some(TiffTag::ImageDescription),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            278 => Some(TiffTag::RowsPerStrip),
            279 => Some(TiffTag::StripByteCounts),
            284 => Some(TiffTag::PlanarConfiguration),
            317 => Some(TiffTag::Predictor),
            322 => Some(TiffTag::TileWidth),
            323 => Some(TiffTag::TileLength),
            324 => Some(TiffTag::TileOffsets),
            325 => Some(TiffTag::TileByteCounts),
            338 => Some(TiffTag::ExtraSamples),
            339 => Some(TiffTag::SampleFormat),
            33550 => Some(TiffTag::ModelPixelScale),
            33922 => Some(TiffTag::ModelTiepoint),
            34264 => Some(TiffTag::ModelTransformation),
            34735 => Some(TiffTag::GeoKeyDirectory),
            34736 => Some(TiffTag::GeoDoubleParams),
            34737 => Some(TiffTag::GeoAsciiParams),
            42112 => Some(TiffTag::GdalMetadata),
            42113 => Some(TiffTag::GdalNodata),
            _ => None,
        }
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Tags that describe pixel storage.
///
/// The writer emits its own values for these; every other tag of the
/// source's first image is carried over verbatim.
pub const STRUCTURAL_TAGS: &[u16] = &[
    254, // NewSubfileType
    256, // ImageWidth
    257, // ImageLength
    258, // BitsPerSample
    259, // Compression
    262, // PhotometricInterpretation
    273, // StripOffsets
    277, // SamplesPerPixel
    278, // RowsPerStrip
    279, // StripByteCounts
    284, // PlanarConfiguration
    317, // Predictor
    322, // TileWidth
    323, // TileLength
    324, // TileOffsets
    325, // TileByteCounts
    330, // SubIFDs
    338, // ExtraSamples
    339, // SampleFormat
    347, // JPEGTables
    530, // YCbCrSubSampling
];

/// NewSubfileType bit for reduced-resolution images (overviews).
pub const SUBFILE_REDUCED_IMAGE: u32 = 1;

/// NewSubfileType bit for transparency masks.
pub const SUBFILE_MASK: u32 = 4;

// =============================================================================
// Compression Values
// =============================================================================

/// TIFF compression scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    OldJpeg = 6,
    Jpeg = 7,
    /// zlib stream, registered value
    Deflate = 8,
    PackBits = 32773,
    /// zlib stream, Adobe's original value
    AdobeDeflate = 32946,
    Jpeg2000 = 34712,
    Lerc = 34887,
    Zstd = 50000,
    Webp = 50001,
}

impl Compression {
    /// Create a Compression from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            5 => Some(Compression::Lzw),
            6 => Some(Compression::OldJpeg),
            7 => Some(Compression::Jpeg),
            8 => Some(Compression::Deflate),
            32773 => Some(Compression::PackBits),
            32946 => Some(Compression::AdobeDeflate),
            34712 => Some(Compression::Jpeg2000),
            34887 => Some(Compression::Lerc),
            50000 => Some(Compression::Zstd),
            50001 => Some(Compression::Webp),
            _ => None,
        }
    }

    /// Whether chunks with this compression can be decoded.
    pub const fn is_supported(self) -> bool {
        matches!(
            self,
            Compression::None | Compression::Lzw | Compression::Deflate | Compression::AdobeDeflate
        )
    }

    /// Human-readable name for error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old-style JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate => "Deflate",
            Compression::PackBits => "PackBits",
            Compression::AdobeDeflate => "Adobe Deflate",
            Compression::Jpeg2000 => "JPEG 2000",
            Compression::Lerc => "LERC",
            Compression::Zstd => "ZSTD",
            Compression::Webp => "WebP",
        }
    }
}

// =============================================================================
// Predictor and Sample Format
// =============================================================================

/// Differencing applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Predictor {
    None = 1,
    /// Integer horizontal differencing
    Horizontal = 2,
    /// Byte-shuffled floating point differencing
    FloatingPoint = 3,
}

impl Predictor {
    /// Create a Predictor from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Predictor::None),
            2 => Some(Predictor::Horizontal),
            3 => Some(Predictor::FloatingPoint),
            _ => None,
        }
    }
}

/// SampleFormat tag values.
pub mod sample_format {
    pub const UNSIGNED: u16 = 1;
    pub const SIGNED: u16 = 2;
    pub const FLOAT: u16 = 3;
}

/// PhotometricInterpretation tag values used by the writer.
pub mod photometric {
    pub const MIN_IS_BLACK: u16 = 1;
    pub const RGB: u16 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_sizes() {
        assert_eq!(FieldType::Byte.size_in_bytes(), 1);
        assert_eq!(FieldType::Short.size_in_bytes(), 2);
        assert_eq!(FieldType::Float.size_in_bytes(), 4);
        assert_eq!(FieldType::Double.size_in_bytes(), 8);
        assert_eq!(FieldType::Rational.size_in_bytes(), 8);
        assert_eq!(FieldType::Rational.swap_unit(), 4);
        assert_eq!(FieldType::Double.swap_unit(), 8);
    }

    #[test]
    fn test_field_type_from_u16() {
        assert_eq!(FieldType::from_u16(12), Some(FieldType::Double));
        assert_eq!(FieldType::from_u16(16), Some(FieldType::Long8));
        assert_eq!(FieldType::from_u16(14), None);
        assert_eq!(FieldType::from_u16(0), None);
    }

    #[test]
    fn test_fits_inline() {
        assert!(FieldType::Short.fits_inline(2, false));
        assert!(!FieldType::Short.fits_inline(3, false));
        assert!(!FieldType::Double.fits_inline(1, false));
        assert!(FieldType::Double.fits_inline(1, true));
        assert!(!FieldType::Long8.fits_inline(2, true));
    }

    #[test]
    fn test_geotiff_tags() {
        assert_eq!(TiffTag::from_u16(33550), Some(TiffTag::ModelPixelScale));
        assert_eq!(TiffTag::from_u16(34735), Some(TiffTag::GeoKeyDirectory));
        assert_eq!(TiffTag::GdalNodata.as_u16(), 42113);
        assert_eq!(TiffTag::from_u16(9999), None);
    }

    #[test]
    fn test_structural_tags_exclude_georeference() {
        assert!(STRUCTURAL_TAGS.contains(&TiffTag::TileOffsets.as_u16()));
        assert!(!STRUCTURAL_TAGS.contains(&TiffTag::ModelTiepoint.as_u16()));
        assert!(!STRUCTURAL_TAGS.contains(&TiffTag::GdalNodata.as_u16()));
    }

    #[test]
    fn test_compression_support() {
        assert!(Compression::Deflate.is_supported());
        assert!(Compression::AdobeDeflate.is_supported());
        assert!(Compression::Lzw.is_supported());
        assert!(!Compression::Jpeg.is_supported());
        assert_eq!(Compression::from_u16(32946), Some(Compression::AdobeDeflate));
        assert_eq!(Compression::Zstd.name(), "ZSTD");
    }

    #[test]
    fn test_predictor_from_u16() {
        assert_eq!(Predictor::from_u16(2), Some(Predictor::Horizontal));
        assert_eq!(Predictor::from_u16(4), None);
    }
}
