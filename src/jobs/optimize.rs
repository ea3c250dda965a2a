//! Raster optimization: rewrite a GeoTIFF as a tiled, deflate-compressed
//! file with an internal overview pyramid.
//!
//! # Phases and reported progress
//!
//! ```text
//!   0%   processing             open source, skip if already optimized
//!  10%   processing             copy blocks into "<file>.tmp"      ─┐
//!  ...                          (reported every ~5% of blocks)      │ 10-80%
//!  80%   processing_overviews   2x .. 64x averaged overviews       ─┘
//!        backup original -> invalidate -> rename .tmp over original -> invalidate
//! 100%   completed
//! ```
//!
//! On failure the job is marked `failed` at 0% and the temporary file is
//! removed; the original is only ever replaced by an atomic rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{PipelineError, TiffError};
use crate::format::tiff::{RawTag, TiledTiffWriter, ValueReader, WriterOptions, STRUCTURAL_TAGS};
use crate::io::RetryPolicy;
use crate::raster::{HandlePool, RasterDataset};

use super::status::{JobId, JobStatus, JobStatusStore};

/// Overview decimation factors.
pub const OVERVIEW_FACTORS: [u32; 6] = [2, 4, 8, 16, 32, 64];

/// Output block edge in pixels.
pub const BLOCK_SIZE: u32 = 256;

/// Result of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeOutcome {
    /// The file was already tiled with overviews and was left untouched.
    AlreadyOptimized,
    /// The file was rewritten. `empty_blocks` counts blocks whose source
    /// window could not be read and were written as zeros.
    Optimized {
        blocks: usize,
        empty_blocks: usize,
        overviews: usize,
    },
}

/// Rewrites rasters into a tiled, overview-bearing layout.
pub struct Optimizer {
    pool: Arc<HandlePool>,
    backup_dir: PathBuf,
    replace_policy: RetryPolicy,
}

impl Optimizer {
    pub fn new(pool: Arc<HandlePool>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            backup_dir: backup_dir.into(),
            replace_policy: RetryPolicy::REPLACE,
        }
    }

    /// Override the retry policy used when swapping the file into place.
    pub fn with_replace_policy(mut self, policy: RetryPolicy) -> Self {
        self.replace_policy = policy;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Optimize `path`, reporting progress for `job`.
    ///
    /// # Errors
    ///
    /// Any failure marks the job `failed`; the temporary output is removed
    /// and the original file is left as it was.
    pub async fn run(
        &self,
        path: &Path,
        job: JobId,
        status: &dyn JobStatusStore,
    ) -> Result<OptimizeOutcome, PipelineError> {
        let temp = temp_path(path);
        match self.optimize(path, &temp, job, status).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(path = %path.display(), "Optimization failed: {}", err);
                status.update_progress(job, JobStatus::Failed, 0).await;
                match tokio::fs::remove_file(&temp).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %temp.display(), "Could not remove temporary file: {}", e),
                }
                Err(err)
            }
        }
    }

    async fn optimize(
        &self,
        path: &Path,
        temp: &Path,
        job: JobId,
        status: &dyn JobStatusStore,
    ) -> Result<OptimizeOutcome, PipelineError> {
        status.update_progress(job, JobStatus::Processing, 0).await;

        let file = path;
        let mut source = RetryPolicy::OPEN
            .run("open raster", move |_| RasterDataset::open(file))
            .await?;

        if source.layout().is_tiled() && !source.layout().overviews().is_empty() {
            info!(path = %path.display(), "Raster already optimized");
            status.update_progress(job, JobStatus::Completed, 100).await;
            return Ok(OptimizeOutcome::AlreadyOptimized);
        }

        status.update_progress(job, JobStatus::Processing, 10).await;
        info!(path = %path.display(), "Optimizing raster");

        let (width, height) = source.dimensions();
        let options = WriterOptions {
            block_size: BLOCK_SIZE,
            alpha_sample: source.layout().alpha_sample,
            ..WriterOptions::for_image(
                width,
                height,
                source.samples_per_pixel() as u16,
                source.data_type(),
            )
        };
        let mut writer = TiledTiffWriter::create(temp, options).await?;
        writer.set_extra_tags(copy_tags(&source).await?);

        let (blocks, empty_blocks) = copy_blocks(&mut source, &mut writer, job, status).await?;

        status
            .update_progress(job, JobStatus::ProcessingOverviews, 80)
            .await;
        let overviews = build_overviews(&source, &mut writer, width, height).await?;
        writer.finish().await?;
        drop(source);

        self.backup(path).await?;
        self.replace(path, temp).await?;

        if empty_blocks > 0 {
            error!(
                path = %path.display(),
                empty_blocks,
                blocks,
                "Raster optimized with unreadable blocks left empty"
            );
        } else {
            info!(path = %path.display(), blocks, overviews, "Raster optimized");
        }
        status.update_progress(job, JobStatus::Completed, 100).await;
        Ok(OptimizeOutcome::Optimized {
            blocks,
            empty_blocks,
            overviews,
        })
    }

    async fn backup(&self, path: &Path) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        if let Some(name) = path.file_name() {
            tokio::fs::copy(path, self.backup_dir.join(name)).await?;
        }
        Ok(())
    }

    /// Swap `temp` over `path`, invalidating the pooled view before every
    /// try and once more after the rename.
    async fn replace(&self, path: &Path, temp: &Path) -> Result<(), PipelineError> {
        self.replace_policy
            .run("replace raster", |_| async move {
                self.pool.invalidate(path).await;
                tokio::fs::rename(temp, path).await
            })
            .await
            .map_err(|e| PipelineError::Replace {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        // A render between the first invalidate and the rename re-pools the
        // old file.
        self.pool.invalidate(path).await;
        Ok(())
    }
}

/// `"<path>.tmp"` next to the original.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Non-structural tags of the source's full resolution directory.
async fn copy_tags(source: &RasterDataset) -> Result<Vec<RawTag>, TiffError> {
    let layout = source.layout();
    let values = ValueReader::new(source.reader(), &layout.header);
    let mut tags = Vec::new();
    for entry in &layout.base_ifd.entries {
        if STRUCTURAL_TAGS.contains(&entry.tag_id) {
            continue;
        }
        let Some(field_type) = entry.field_type else {
            continue;
        };
        tags.push(RawTag {
            tag: entry.tag_id,
            field_type,
            count: entry.count,
            data: values.read_bytes_le(entry).await?,
        });
    }
    Ok(tags)
}

/// Copy the full resolution image block by block.
///
/// Returns the block count and how many of those were written empty because
/// the source window could not be read.
async fn copy_blocks(
    source: &mut RasterDataset,
    writer: &mut TiledTiffWriter,
    job: JobId,
    status: &dyn JobStatusStore,
) -> Result<(usize, usize), TiffError> {
    let Some((_, _, across, down)) = writer.level_geometry(0) else {
        return Ok((0, 0));
    };
    let total = across as usize * down as usize;
    let step = (total / 20).max(1);
    let block_len = writer.options().block_len();
    let mut empty = 0;

    for i in 0..total {
        let bx = (i % across as usize) as u32;
        let by = (i / across as usize) as u32;
        let block = match source
            .read_window_raw(0, bx * BLOCK_SIZE, by * BLOCK_SIZE, BLOCK_SIZE, BLOCK_SIZE)
            .await
        {
            Ok(block) => block,
            Err(err) => {
                error!(bx, by, "Could not read source window, writing empty block: {}", err);
                empty += 1;
                vec![0; block_len]
            }
        };
        writer.write_block(0, bx, by, &block).await?;

        if total > 20 && i % step == 0 {
            let progress = 10 + (i * 70 / total) as u8;
            status
                .update_progress(job, JobStatus::Processing, progress)
                .await;
        }
    }
    Ok((total, empty))
}

/// Build the overview pyramid, each level a 2x2 average of the previous one.
///
/// Only valid pixels are averaged; a destination pixel without any valid
/// source pixel gets the no-data value (or zeros, alpha included).
async fn build_overviews(
    source: &RasterDataset,
    writer: &mut TiledTiffWriter,
    width: u32,
    height: u32,
) -> Result<usize, TiffError> {
    let data_type = source.data_type();
    let spp = source.samples_per_pixel();
    let nodata = source.geo().nodata;
    let alpha = source.layout().alpha_sample;

    let mut previous = 0;
    let mut built = 0;
    for factor in OVERVIEW_FACTORS {
        let (prev_w, prev_h, _, _) = writer
            .level_geometry(previous)
            .ok_or_else(|| TiffError::Encode(format!("no level {}", previous)))?;
        if prev_w == 1 && prev_h == 1 {
            break;
        }
        let level = writer.add_overview(width.div_ceil(factor), height.div_ceil(factor));
        let (w, h, across, down) = writer
            .level_geometry(level)
            .ok_or_else(|| TiffError::Encode(format!("no level {}", level)))?;

        for by in 0..down {
            for bx in 0..across {
                // The 2x2 source blocks this block is reduced from.
                let mut quad: [[Option<Vec<u8>>; 2]; 2] = Default::default();
                for (dy, row) in quad.iter_mut().enumerate() {
                    for (dx, slot) in row.iter_mut().enumerate() {
                        let (sbx, sby) = (bx * 2 + dx as u32, by * 2 + dy as u32);
                        if sbx * BLOCK_SIZE < prev_w && sby * BLOCK_SIZE < prev_h {
                            *slot = Some(writer.read_block(previous, sbx, sby).await?);
                        }
                    }
                }

                let mut block = vec![0u8; writer.options().block_len()];
                let mut sums = vec![0.0; spp];
                for py in 0..BLOCK_SIZE {
                    for px in 0..BLOCK_SIZE {
                        let (ox, oy) = (bx * BLOCK_SIZE + px, by * BLOCK_SIZE + py);
                        if ox >= w || oy >= h {
                            continue;
                        }
                        sums.iter_mut().for_each(|s| *s = 0.0);
                        let mut count = 0usize;
                        for (sx, sy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                            let (col, row) = (ox * 2 + sx, oy * 2 + sy);
                            if col >= prev_w || row >= prev_h {
                                continue;
                            }
                            let quadrant = &quad[((row / BLOCK_SIZE) % 2) as usize]
                                [((col / BLOCK_SIZE) % 2) as usize];
                            let Some(samples) = quadrant else { continue };
                            let pixel = ((row % BLOCK_SIZE) * BLOCK_SIZE + col % BLOCK_SIZE) as usize;
                            if !source.is_valid(samples, pixel) {
                                continue;
                            }
                            for (s, sum) in sums.iter_mut().enumerate() {
                                *sum += data_type.read_f64(samples, pixel * spp + s);
                            }
                            count += 1;
                        }

                        let pixel = (py * BLOCK_SIZE + px) as usize;
                        for s in 0..spp {
                            let value = if count > 0 {
                                sums[s] / count as f64
                            } else if Some(s) == alpha {
                                0.0
                            } else {
                                nodata.unwrap_or(0.0)
                            };
                            data_type.write_f64(&mut block, pixel * spp + s, value);
                        }
                    }
                }
                writer.write_block(level, bx, by, &block).await?;
            }
        }

        previous = level;
        built += 1;
    }
    Ok(built)
}
