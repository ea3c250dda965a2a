//! Image layout: which IFDs hold pixels and how they are chunked.
//!
//! A GeoTIFF holds one full resolution image, optionally followed by
//! reduced-resolution overviews (NewSubfileType bit 0) and transparency
//! masks (bit 2). The layout keeps the full resolution image as level 0 and
//! the overviews sorted from largest to smallest; masks are ignored.
//!
//! Both tiled and striped images are supported. A strip is treated as a
//! chunk that spans the full image width, so the dataset layer only ever
//! deals with a grid of chunks.

use crate::error::TiffError;
use crate::io::RangeReader;

use super::decode::{ChunkCodec, DataType};
use super::parser::{ByteOrder, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{
    sample_format, Compression, Predictor, TiffTag, SUBFILE_MASK, SUBFILE_REDUCED_IMAGE,
};
use super::values::ValueReader;

/// Maximum number of IFDs followed in the chain.
const MAX_IFDS: usize = 64;

/// ExtraSamples values that mark an alpha channel.
const EXTRA_SAMPLE_ASSOCIATED_ALPHA: u16 = 1;
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u16 = 2;

// =============================================================================
// ImageLevel
// =============================================================================

/// One image of the file (full resolution or overview).
#[derive(Debug, Clone)]
pub struct ImageLevel {
    /// Position of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,

    /// Whether the image uses TileWidth/TileLength (false = strips)
    pub tiled: bool,

    /// Chunk width in pixels (image width for strips)
    pub chunk_width: u32,

    /// Chunk height in pixels (RowsPerStrip for strips)
    pub chunk_height: u32,

    pub chunks_across: u32,
    pub chunks_down: u32,

    /// Downsample factor relative to level 0 (1.0 for level 0)
    pub downsample: f64,

    pub codec: ChunkCodec,

    /// Byte offset of each chunk, row-major
    pub offsets: Vec<u64>,

    /// Stored size of each chunk
    pub byte_counts: Vec<u64>,
}

impl ImageLevel {
    /// Build a level from a parsed IFD, loading its chunk offsets.
    async fn load<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        ifd_index: usize,
    ) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let values = ValueReader::new(reader, header);

        let width = ifd
            .get_u32(TiffTag::ImageWidth, byte_order)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .get_u32(TiffTag::ImageLength, byte_order)
            .ok_or(TiffError::MissingTag("ImageLength"))?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty image {}x{}", width, height),
            });
        }

        let samples_per_pixel = ifd
            .get_u32(TiffTag::SamplesPerPixel, byte_order)
            .unwrap_or(1) as u16;

        let planar = ifd
            .get_u32(TiffTag::PlanarConfiguration, byte_order)
            .unwrap_or(1);
        if planar != 1 && samples_per_pixel > 1 {
            return Err(TiffError::UnsupportedLayout(
                "separate sample planes".to_string(),
            ));
        }

        let bits = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => values.read_u16_array(entry).await?,
            None => vec![1],
        };
        let bits_per_sample = bits.first().copied().unwrap_or(1);
        if bits.iter().any(|&b| b != bits_per_sample) {
            return Err(TiffError::UnsupportedLayout(format!(
                "mixed bits per sample {:?}",
                bits
            )));
        }

        let format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => values
                .read_u16_array(entry)
                .await?
                .first()
                .copied()
                .unwrap_or(sample_format::UNSIGNED),
            None => sample_format::UNSIGNED,
        };
        let data_type = DataType::from_tags(bits_per_sample, format)?;

        let compression_raw = ifd
            .get_u32(TiffTag::Compression, byte_order)
            .unwrap_or(1) as u16;
        let compression = Compression::from_u16(compression_raw)
            .filter(|c| c.is_supported())
            .ok_or_else(|| {
                TiffError::UnsupportedCompression(
                    Compression::from_u16(compression_raw)
                        .map(|c| c.name().to_string())
                        .unwrap_or_else(|| compression_raw.to_string()),
                )
            })?;

        let predictor_raw = ifd.get_u32(TiffTag::Predictor, byte_order).unwrap_or(1) as u16;
        let predictor = Predictor::from_u16(predictor_raw).ok_or_else(|| {
            TiffError::InvalidTagValue {
                tag: "Predictor",
                message: format!("unknown predictor {}", predictor_raw),
            }
        })?;

        let tile_width = ifd.get_u32(TiffTag::TileWidth, byte_order);
        let tile_height = ifd.get_u32(TiffTag::TileLength, byte_order);

        let (tiled, chunk_width, chunk_height, offsets_tag, counts_tag) =
            match (tile_width, tile_height) {
                (Some(tw), Some(th)) if tw > 0 && th > 0 => (
                    true,
                    tw,
                    th,
                    TiffTag::TileOffsets,
                    TiffTag::TileByteCounts,
                ),
                _ => {
                    let rows = ifd
                        .get_u32(TiffTag::RowsPerStrip, byte_order)
                        .unwrap_or(height)
                        .clamp(1, height);
                    (
                        false,
                        width,
                        rows,
                        TiffTag::StripOffsets,
                        TiffTag::StripByteCounts,
                    )
                }
            };

        let chunks_across = width.div_ceil(chunk_width);
        let chunks_down = height.div_ceil(chunk_height);
        let chunk_count = chunks_across as usize * chunks_down as usize;

        let offsets = match ifd.get_entry_by_tag(offsets_tag) {
            Some(entry) => values.read_u64_array(entry).await?,
            None => {
                return Err(TiffError::MissingTag(if tiled {
                    "TileOffsets"
                } else {
                    "StripOffsets"
                }))
            }
        };
        let byte_counts = match ifd.get_entry_by_tag(counts_tag) {
            Some(entry) => values.read_u64_array(entry).await?,
            None => {
                return Err(TiffError::MissingTag(if tiled {
                    "TileByteCounts"
                } else {
                    "StripByteCounts"
                }))
            }
        };
        if offsets.len() < chunk_count || byte_counts.len() < chunk_count {
            return Err(TiffError::InvalidTagValue {
                tag: "ChunkOffsets",
                message: format!(
                    "expected {} chunks, found {} offsets and {} byte counts",
                    chunk_count,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        Ok(ImageLevel {
            ifd_index,
            width,
            height,
            tiled,
            chunk_width,
            chunk_height,
            chunks_across,
            chunks_down,
            downsample: 1.0,
            codec: ChunkCodec {
                compression,
                predictor,
                data_type,
                samples_per_pixel,
                byte_order,
            },
            offsets,
            byte_counts,
        })
    }

    /// Number of samples per pixel.
    #[inline]
    pub fn samples_per_pixel(&self) -> u16 {
        self.codec.samples_per_pixel
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.codec.data_type
    }

    /// Row-major index of chunk (`cx`, `cy`).
    #[inline]
    pub fn chunk_index(&self, cx: u32, cy: u32) -> Option<usize> {
        if cx >= self.chunks_across || cy >= self.chunks_down {
            return None;
        }
        Some(cy as usize * self.chunks_across as usize + cx as usize)
    }

    /// Number of rows stored in the chunk at row `cy`.
    ///
    /// Tiles are always full size; the last strip may be shorter.
    pub fn chunk_rows(&self, cy: u32) -> u32 {
        if self.tiled {
            self.chunk_height
        } else {
            let start = cy * self.chunk_height;
            self.chunk_height.min(self.height.saturating_sub(start))
        }
    }

    /// File location (offset, size) of a chunk.
    pub fn chunk_location(&self, index: usize) -> Option<(u64, u64)> {
        Some((*self.offsets.get(index)?, *self.byte_counts.get(index)?))
    }
}

// =============================================================================
// TiffLayout
// =============================================================================

/// Parsed image structure of a TIFF file.
#[derive(Debug, Clone)]
pub struct TiffLayout {
    pub header: TiffHeader,

    /// Level 0 is the full resolution image; overviews follow, largest first
    pub levels: Vec<ImageLevel>,

    /// IFD of the full resolution image (holds the GeoTIFF tags)
    pub base_ifd: Ifd,

    /// Sample index of the alpha channel, if the image has one
    pub alpha_sample: Option<usize>,
}

impl TiffLayout {
    /// Parse the header and IFD chain of a TIFF file.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;
        let byte_order = header.byte_order;

        let mut base: Option<(usize, Ifd)> = None;
        let mut overview_ifds = Vec::new();
        for (index, ifd) in ifds.into_iter().enumerate() {
            let subfile = ifd
                .get_u32(TiffTag::NewSubfileType, byte_order)
                .unwrap_or(0);
            if subfile & SUBFILE_MASK != 0 {
                continue;
            }
            if base.is_none() {
                base = Some((index, ifd));
            } else if subfile & SUBFILE_REDUCED_IMAGE != 0 {
                overview_ifds.push((index, ifd));
            }
        }

        let (base_index, base_ifd) = base.ok_or(TiffError::MissingTag("ImageWidth"))?;
        let base_level = ImageLevel::load(reader, &header, &base_ifd, base_index).await?;

        let mut levels = vec![base_level];
        for (index, ifd) in &overview_ifds {
            let mut level = ImageLevel::load(reader, &header, ifd, *index).await?;
            let base = &levels[0];
            if level.codec.samples_per_pixel != base.codec.samples_per_pixel
                || level.codec.data_type != base.codec.data_type
                || level.width >= base.width
            {
                continue;
            }
            level.downsample = base.width as f64 / level.width as f64;
            levels.push(level);
        }
        levels[1..].sort_by(|a, b| b.width.cmp(&a.width));

        let alpha_sample =
            Self::find_alpha_sample(reader, &header, &base_ifd, levels[0].samples_per_pixel())
                .await?;

        Ok(TiffLayout {
            header,
            levels,
            base_ifd,
            alpha_sample,
        })
    }

    /// Parse all IFDs following the next-IFD chain.
    async fn parse_all_ifds<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            // First, read just enough to get the entry count
            let count_size = header.ifd_count_size();
            let count_bytes = reader.read_exact_at(offset, count_size).await?;
            let entry_count = Ifd::parse_entry_count(&count_bytes, header)?;

            // Now read the full IFD
            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            let next_offset = ifd.next_ifd_offset;
            ifds.push(ifd);
            offset = next_offset;
        }

        Ok(ifds)
    }

    async fn find_alpha_sample<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        samples_per_pixel: u16,
    ) -> Result<Option<usize>, TiffError> {
        let Some(entry) = ifd.get_entry_by_tag(TiffTag::ExtraSamples) else {
            return Ok(None);
        };
        let extra = ValueReader::new(reader, header)
            .read_u16_array(entry)
            .await?;
        let first_extra = (samples_per_pixel as usize).saturating_sub(extra.len());

        Ok(extra
            .iter()
            .position(|&v| v == EXTRA_SAMPLE_ASSOCIATED_ALPHA || v == EXTRA_SAMPLE_UNASSOCIATED_ALPHA)
            .map(|i| first_extra + i))
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// The full resolution image.
    #[inline]
    pub fn base(&self) -> &ImageLevel {
        &self.levels[0]
    }

    /// Overviews, largest first.
    pub fn overviews(&self) -> &[ImageLevel] {
        &self.levels[1..]
    }

    /// Whether the full resolution image is tiled.
    pub fn is_tiled(&self) -> bool {
        self.base().tiled
    }

    /// Pick the level to read for a requested downsample factor.
    ///
    /// Returns the index of the coarsest level whose downsample does not
    /// exceed the request, so the read never has less detail than asked for.
    pub fn level_for_downsample(&self, downsample: f64) -> usize {
        self.levels
            .iter()
            .rposition(|l| l.downsample <= downsample * 1.01)
            .unwrap_or(0)
    }
}
