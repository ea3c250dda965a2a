//! Tiled TIFF writer.
//!
//! Writes a little-endian, block-tiled, deflate-compressed TIFF (or BigTIFF)
//! with an optional chain of reduced-resolution overviews. Blocks are
//! appended to the file as they arrive; the directories are written last by
//! [`TiledTiffWriter::finish`], after which the header is patched to point at
//! the first one.
//!
//! ```text
//! +--------+---------------------------+-----------+-----------+-----
//! | header | blocks (any level, order) | IFD 0+vals| IFD 1+vals| ...
//! +--------+---------------------------+-----------+-----------+-----
//!      |                                  ^
//!      +----------- first IFD ------------+
//! ```

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::TiffError;

use super::decode::{ChunkCodec, DataType};
use super::parser::ByteOrder;
use super::tags::{photometric, Compression, FieldType, Predictor, TiffTag, SUBFILE_REDUCED_IMAGE};

/// Uncompressed size above which BigTIFF is used, with headroom for
/// overviews (about a third of the base image).
const BIGTIFF_THRESHOLD: f64 = 4.0e9;

/// ExtraSamples value for an unassociated alpha channel.
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u16 = 2;

/// Whether an image needs BigTIFF offsets.
pub fn needs_bigtiff(width: u32, height: u32, samples_per_pixel: u16, data_type: DataType) -> bool {
    let raw = width as f64 * height as f64 * samples_per_pixel as f64 * data_type.size() as f64;
    raw * 4.0 / 3.0 > BIGTIFF_THRESHOLD
}

// =============================================================================
// Options and raw tags
// =============================================================================

/// Output profile.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    pub width: u32,
    pub height: u32,
    pub block_size: u32,
    pub data_type: DataType,
    pub samples_per_pixel: u16,
    /// Sample index of an alpha channel to declare in ExtraSamples
    pub alpha_sample: Option<usize>,
    pub predictor: Predictor,
    pub bigtiff: bool,
}

impl WriterOptions {
    /// Default profile for an image: 256 px blocks, deflate, horizontal
    /// differencing for integer samples, BigTIFF when the data calls for it.
    pub fn for_image(width: u32, height: u32, samples_per_pixel: u16, data_type: DataType) -> Self {
        Self {
            width,
            height,
            block_size: 256,
            data_type,
            samples_per_pixel,
            alpha_sample: None,
            predictor: if data_type.is_integer() {
                Predictor::Horizontal
            } else {
                Predictor::None
            },
            bigtiff: needs_bigtiff(width, height, samples_per_pixel, data_type),
        }
    }

    fn codec(&self) -> ChunkCodec {
        ChunkCodec {
            compression: Compression::Deflate,
            predictor: self.predictor,
            data_type: self.data_type,
            samples_per_pixel: self.samples_per_pixel,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// Size of one decoded block in bytes.
    pub fn block_len(&self) -> usize {
        self.codec().decoded_len(self.block_size, self.block_size)
    }
}

/// A tag copied verbatim into the full resolution directory.
///
/// `data` holds `count` values of `field_type` in little-endian order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub tag: u16,
    pub field_type: FieldType,
    pub count: u64,
    pub data: Vec<u8>,
}

// =============================================================================
// Levels
// =============================================================================

#[derive(Debug, Clone)]
struct LevelPlan {
    width: u32,
    height: u32,
    blocks_across: u32,
    blocks_down: u32,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl LevelPlan {
    fn new(width: u32, height: u32, block_size: u32) -> Self {
        let blocks_across = width.div_ceil(block_size);
        let blocks_down = height.div_ceil(block_size);
        let count = blocks_across as usize * blocks_down as usize;
        Self {
            width,
            height,
            blocks_across,
            blocks_down,
            offsets: vec![0; count],
            byte_counts: vec![0; count],
        }
    }
}

// =============================================================================
// TiledTiffWriter
// =============================================================================

/// Streaming writer for a tiled TIFF with overviews.
pub struct TiledTiffWriter {
    file: File,
    path: PathBuf,
    options: WriterOptions,
    codec: ChunkCodec,
    levels: Vec<LevelPlan>,
    extra_tags: Vec<RawTag>,
    /// End of the data written so far
    end: u64,
}

impl TiledTiffWriter {
    /// Create (or truncate) `path` and write a placeholder header.
    pub async fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self, TiffError> {
        let path = path.as_ref().to_path_buf();
        if options.block_size == 0 || options.block_size % 16 != 0 {
            return Err(TiffError::Encode(format!(
                "block size {} is not a multiple of 16",
                options.block_size
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        let header = header_bytes(options.bigtiff, 0);
        file.write_all(&header).await.map_err(|e| io_error(&path, e))?;

        let codec = options.codec();
        let base = LevelPlan::new(options.width, options.height, options.block_size);

        Ok(Self {
            file,
            path,
            end: header.len() as u64,
            codec,
            levels: vec![base],
            extra_tags: Vec::new(),
            options,
        })
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Number of levels (full resolution + overviews).
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Width, height and block grid of a level.
    pub fn level_geometry(&self, level: usize) -> Option<(u32, u32, u32, u32)> {
        self.levels
            .get(level)
            .map(|l| (l.width, l.height, l.blocks_across, l.blocks_down))
    }

    /// Declare an overview of the given size; returns its level index.
    pub fn add_overview(&mut self, width: u32, height: u32) -> usize {
        self.levels
            .push(LevelPlan::new(width.max(1), height.max(1), self.options.block_size));
        self.levels.len() - 1
    }

    /// Set tags to copy into the full resolution directory.
    ///
    /// Tags the writer emits itself are ignored.
    pub fn set_extra_tags(&mut self, tags: Vec<RawTag>) {
        self.extra_tags = tags;
    }

    fn block_index(&self, level: usize, bx: u32, by: u32) -> Result<usize, TiffError> {
        let plan = self
            .levels
            .get(level)
            .ok_or_else(|| TiffError::Encode(format!("no level {}", level)))?;
        if bx >= plan.blocks_across || by >= plan.blocks_down {
            return Err(TiffError::Encode(format!(
                "block ({}, {}) outside {}x{} grid of level {}",
                bx, by, plan.blocks_across, plan.blocks_down, level
            )));
        }
        Ok(by as usize * plan.blocks_across as usize + bx as usize)
    }

    /// Append one block of little-endian samples (full block size).
    pub async fn write_block(
        &mut self,
        level: usize,
        bx: u32,
        by: u32,
        samples: &[u8],
    ) -> Result<(), TiffError> {
        let index = self.block_index(level, bx, by)?;
        if samples.len() != self.options.block_len() {
            return Err(TiffError::Encode(format!(
                "block has {} bytes, expected {}",
                samples.len(),
                self.options.block_len()
            )));
        }

        let encoded = self.codec.encode(samples, self.options.block_size)?;
        let offset = self.end;
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        self.file
            .write_all(&encoded)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        // Keep blocks word aligned.
        let mut len = encoded.len() as u64;
        if len % 2 == 1 {
            self.file
                .write_all(&[0])
                .await
                .map_err(|e| io_error(&self.path, e))?;
            len += 1;
        }
        self.end += len;

        let plan = &mut self.levels[level];
        plan.offsets[index] = offset;
        plan.byte_counts[index] = encoded.len() as u64;

        if !self.options.bigtiff && self.end > u32::MAX as u64 {
            return Err(TiffError::Encode(
                "output exceeds 4 GiB without BigTIFF".to_string(),
            ));
        }
        Ok(())
    }

    /// Read back and decode a block that was already written.
    ///
    /// Blocks never written read as zeros.
    pub async fn read_block(&mut self, level: usize, bx: u32, by: u32) -> Result<Vec<u8>, TiffError> {
        let index = self.block_index(level, bx, by)?;
        let plan = &self.levels[level];
        let (offset, count) = (plan.offsets[index], plan.byte_counts[index]);
        if offset == 0 || count == 0 {
            return Ok(vec![0; self.options.block_len()]);
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        let mut raw = vec![0u8; count as usize];
        self.file
            .read_exact(&mut raw)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        self.codec
            .decode(&raw, self.options.block_size, self.options.block_size)
    }

    /// Write all directories, patch the header and flush to disk.
    pub async fn finish(mut self) -> Result<(), TiffError> {
        let bigtiff = self.options.bigtiff;
        let mut directories = Vec::with_capacity(self.levels.len());
        for (i, plan) in self.levels.iter().enumerate() {
            directories.push(self.build_directory(i, plan));
        }

        // Lay the directories out back to back, then chain them.
        let mut start = self.end;
        let mut encoded = Vec::with_capacity(directories.len());
        for dir in &directories {
            let bytes = dir.encode(start, bigtiff);
            encoded.push((start, bytes));
            start += encoded.last().map(|(_, b)| b.len() as u64).unwrap_or(0);
        }
        for i in 0..encoded.len() {
            let next = encoded.get(i + 1).map(|(s, _)| *s).unwrap_or(0);
            let (_, bytes) = &mut encoded[i];
            let at = directories[i].next_offset_position(bigtiff);
            write_offset(bytes, at, next, bigtiff);
        }

        if !bigtiff && start > u32::MAX as u64 {
            return Err(TiffError::Encode(
                "output exceeds 4 GiB without BigTIFF".to_string(),
            ));
        }

        self.file
            .seek(SeekFrom::Start(self.end))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        for (_, bytes) in &encoded {
            self.file
                .write_all(bytes)
                .await
                .map_err(|e| io_error(&self.path, e))?;
        }

        let first = encoded.first().map(|(s, _)| *s).unwrap_or(0);
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        self.file
            .write_all(&header_bytes(bigtiff, first))
            .await
            .map_err(|e| io_error(&self.path, e))?;

        self.file.flush().await.map_err(|e| io_error(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }

    fn build_directory(&self, level: usize, plan: &LevelPlan) -> Directory {
        let o = &self.options;
        let spp = o.samples_per_pixel as usize;
        let bigtiff = o.bigtiff;
        let mut dir = Directory::default();

        let subfile = if level == 0 { 0 } else { SUBFILE_REDUCED_IMAGE };
        let photometric = if spp >= 3 {
            photometric::RGB
        } else {
            photometric::MIN_IS_BLACK
        };
        let colour_samples = if photometric == photometric::RGB { 3 } else { 1 };

        dir.push_u32s(TiffTag::NewSubfileType.as_u16(), &[subfile]);
        dir.push_u32s(TiffTag::ImageWidth.as_u16(), &[plan.width]);
        dir.push_u32s(TiffTag::ImageLength.as_u16(), &[plan.height]);
        dir.push_u16s(TiffTag::BitsPerSample.as_u16(), &vec![o.data_type.bits(); spp]);
        dir.push_u16s(TiffTag::Compression.as_u16(), &[Compression::Deflate as u16]);
        dir.push_u16s(TiffTag::PhotometricInterpretation.as_u16(), &[photometric]);
        dir.push_u16s(TiffTag::SamplesPerPixel.as_u16(), &[o.samples_per_pixel]);
        dir.push_u16s(TiffTag::PlanarConfiguration.as_u16(), &[1]);
        dir.push_u16s(TiffTag::Predictor.as_u16(), &[o.predictor as u16]);
        dir.push_u32s(TiffTag::TileWidth.as_u16(), &[o.block_size]);
        dir.push_u32s(TiffTag::TileLength.as_u16(), &[o.block_size]);
        dir.push_offsets(TiffTag::TileOffsets.as_u16(), &plan.offsets, bigtiff);
        dir.push_offsets(TiffTag::TileByteCounts.as_u16(), &plan.byte_counts, bigtiff);
        if spp > colour_samples {
            let extra: Vec<u16> = (colour_samples..spp)
                .map(|i| {
                    if o.alpha_sample == Some(i) {
                        EXTRA_SAMPLE_UNASSOCIATED_ALPHA
                    } else {
                        0
                    }
                })
                .collect();
            dir.push_u16s(TiffTag::ExtraSamples.as_u16(), &extra);
        }
        dir.push_u16s(TiffTag::SampleFormat.as_u16(), &vec![o.data_type.sample_format(); spp]);

        if level == 0 {
            for tag in &self.extra_tags {
                if dir.has(tag.tag) {
                    continue;
                }
                if tag.field_type.is_bigtiff_only() && !bigtiff {
                    continue;
                }
                dir.entries.push(DirEntry {
                    tag: tag.tag,
                    field_type: tag.field_type,
                    count: tag.count,
                    data: tag.data.clone(),
                });
            }
        }

        dir.entries.sort_by_key(|e| e.tag);
        dir
    }
}

fn io_error(path: &Path, err: std::io::Error) -> TiffError {
    TiffError::Encode(format!("{}: {}", path.display(), err))
}

fn header_bytes(bigtiff: bool, first_ifd: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(16);
    header.extend_from_slice(b"II");
    if bigtiff {
        header.extend_from_slice(&43u16.to_le_bytes());
        header.extend_from_slice(&8u16.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&first_ifd.to_le_bytes());
    } else {
        header.extend_from_slice(&42u16.to_le_bytes());
        header.extend_from_slice(&(first_ifd as u32).to_le_bytes());
    }
    header
}

fn write_offset(bytes: &mut [u8], at: usize, value: u64, bigtiff: bool) {
    if bigtiff {
        bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
    } else {
        bytes[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
    }
}

// =============================================================================
// Directory encoding
// =============================================================================

#[derive(Debug, Clone)]
struct DirEntry {
    tag: u16,
    field_type: FieldType,
    count: u64,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    fn has(&self, tag: u16) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    fn push_u16s(&mut self, tag: u16, values: &[u16]) {
        self.entries.push(DirEntry {
            tag,
            field_type: FieldType::Short,
            count: values.len() as u64,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        });
    }

    fn push_u32s(&mut self, tag: u16, values: &[u32]) {
        self.entries.push(DirEntry {
            tag,
            field_type: FieldType::Long,
            count: values.len() as u64,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        });
    }

    fn push_offsets(&mut self, tag: u16, values: &[u64], bigtiff: bool) {
        if bigtiff {
            self.entries.push(DirEntry {
                tag,
                field_type: FieldType::Long8,
                count: values.len() as u64,
                data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            });
        } else {
            let narrow: Vec<u32> = values.iter().map(|&v| v as u32).collect();
            self.push_u32s(tag, &narrow);
        }
    }

    fn entry_layout(bigtiff: bool) -> (usize, usize, usize) {
        // (count field, entry size, inline value size)
        if bigtiff {
            (8, 20, 8)
        } else {
            (2, 12, 4)
        }
    }

    fn next_offset_position(&self, bigtiff: bool) -> usize {
        let (count_size, entry_size, _) = Self::entry_layout(bigtiff);
        count_size + self.entries.len() * entry_size
    }

    /// Encode the directory placed at `start`, followed by its out-of-line values.
    fn encode(&self, start: u64, bigtiff: bool) -> Vec<u8> {
        let (count_size, entry_size, inline_size) = Self::entry_layout(bigtiff);
        let offset_size = if bigtiff { 8 } else { 4 };
        let table_len = count_size + self.entries.len() * entry_size + offset_size;

        let mut table = Vec::with_capacity(table_len);
        let mut values: Vec<u8> = Vec::new();

        if bigtiff {
            table.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        } else {
            table.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        }

        for entry in &self.entries {
            table.extend_from_slice(&entry.tag.to_le_bytes());
            table.extend_from_slice(&entry.field_type.as_u16().to_le_bytes());
            if bigtiff {
                table.extend_from_slice(&entry.count.to_le_bytes());
            } else {
                table.extend_from_slice(&(entry.count as u32).to_le_bytes());
            }

            if entry.data.len() <= inline_size {
                let mut field = entry.data.clone();
                field.resize(inline_size, 0);
                table.extend_from_slice(&field);
            } else {
                let offset = start + table_len as u64 + values.len() as u64;
                write_field(&mut table, offset, bigtiff);
                values.extend_from_slice(&entry.data);
                if values.len() % 2 == 1 {
                    values.push(0);
                }
            }
        }

        table.extend_from_slice(&vec![0u8; offset_size]);
        table.extend_from_slice(&values);
        if table.len() % 2 == 1 {
            table.push(0);
        }
        table
    }
}

fn write_field(out: &mut Vec<u8>, value: u64, bigtiff: bool) {
    if bigtiff {
        out.extend_from_slice(&value.to_le_bytes());
    } else {
        out.extend_from_slice(&(value as u32).to_le_bytes());
    }
}
