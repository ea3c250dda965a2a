//! Cache warming: pre-render every tile of a raster over a zoom range.
//!
//! The sweep enumerates the tiles covering the raster's geographic bounds,
//! skips the ones already cached, and renders the rest through a
//! [`TileSource`]. Every [`WarmOptions::batch_size`] processed tiles it
//! reports progress and re-reads the job status:
//!
//! - `paused`: sleep and poll again until the status changes
//! - `cancelled`: stop at once, without marking the job completed
//!
//! Warming is best effort. A failure that stops the sweep is logged and the
//! job still ends `completed` at 100%.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::RasterError;
use crate::geo::{tiles_covering, Bounds, TileRange};
use crate::raster::TileSource;
use crate::tile::{TileCache, TileKey, DEFAULT_TILE_TTL};

use super::status::{JobId, JobStatus, JobStatusStore};

/// Lowest zoom level warmed by default.
pub const DEFAULT_WARM_MIN_ZOOM: u8 = 12;

/// Highest zoom level warmed by default.
pub const DEFAULT_WARM_MAX_ZOOM: u8 = 20;

/// Sweep parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,

    /// Tiles processed between progress reports and status polls
    pub batch_size: usize,

    /// Sleep between status polls while paused
    pub poll_interval: Duration,

    /// Lifetime of the tiles written
    pub ttl: Duration,
}

impl Default for WarmOptions {
    fn default() -> Self {
        Self {
            min_zoom: DEFAULT_WARM_MIN_ZOOM,
            max_zoom: DEFAULT_WARM_MAX_ZOOM,
            batch_size: 20,
            poll_interval: Duration::from_secs(2),
            ttl: DEFAULT_TILE_TTL,
        }
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    Completed,
    Cancelled,
    /// Stopped by an error; the job is still reported completed
    Aborted(String),
}

/// Counters of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmReport {
    /// Tiles covering the raster over the zoom range
    pub planned: u64,
    /// Tiles visited, skipped ones included
    pub processed: u64,
    /// Tiles already cached
    pub skipped: u64,
    /// Tiles rendered and stored
    pub rendered: u64,
    pub outcome: WarmOutcome,
}

impl WarmReport {
    fn new(planned: u64) -> Self {
        Self {
            planned,
            processed: 0,
            skipped: 0,
            rendered: 0,
            outcome: WarmOutcome::Completed,
        }
    }
}

/// Tile ranges covering `bounds` (lon/lat degrees) for every zoom in
/// `min_zoom..=max_zoom`.
pub fn plan(bounds: &Bounds, min_zoom: u8, max_zoom: u8) -> Vec<TileRange> {
    (min_zoom..=max_zoom)
        .flat_map(|z| tiles_covering(bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y, z))
        .collect()
}

// =============================================================================
// CacheWarmer
// =============================================================================

/// Pre-renders tiles into the durable cache.
pub struct CacheWarmer<S: TileSource + ?Sized> {
    source: Arc<S>,
    cache: TileCache,
    options: WarmOptions,
}

impl<S: TileSource + ?Sized> CacheWarmer<S> {
    pub fn new(source: Arc<S>, cache: TileCache) -> Self {
        Self::with_options(source, cache, WarmOptions::default())
    }

    pub fn with_options(source: Arc<S>, cache: TileCache, options: WarmOptions) -> Self {
        Self {
            source,
            cache,
            options,
        }
    }

    pub fn options(&self) -> &WarmOptions {
        &self.options
    }

    /// Warm the cache for `path`, reporting progress for `job`.
    ///
    /// Never fails; see [`WarmOutcome`] for how the sweep ended.
    pub async fn run(&self, path: &Path, job: JobId, status: &dyn JobStatusStore) -> WarmReport {
        status.update_progress(job, JobStatus::Processing, 0).await;

        let mut report = WarmReport::new(0);
        if let Err(err) = self.sweep(path, job, status, &mut report).await {
            error!(path = %path.display(), "Cache warming failed: {}", err);
            report.outcome = WarmOutcome::Aborted(err.to_string());
        }

        match report.outcome {
            WarmOutcome::Cancelled => {
                info!(path = %path.display(), processed = report.processed, "Cache warming cancelled");
            }
            _ => {
                info!(
                    path = %path.display(),
                    planned = report.planned,
                    rendered = report.rendered,
                    skipped = report.skipped,
                    "Cache warming finished"
                );
                status.update_progress(job, JobStatus::Completed, 100).await;
            }
        }
        report
    }

    async fn sweep(
        &self,
        path: &Path,
        job: JobId,
        status: &dyn JobStatusStore,
        report: &mut WarmReport,
    ) -> Result<(), RasterError> {
        // A job paused before warming starts stays paused until resumed.
        if self.wait_while_paused(job, status).await == Some(JobStatus::Cancelled) {
            report.outcome = WarmOutcome::Cancelled;
            return Ok(());
        }

        let bounds = self.source.geographic_bounds(path).await?;
        let ranges = plan(&bounds, self.options.min_zoom, self.options.max_zoom);
        report.planned = ranges.iter().map(TileRange::count).sum();
        info!(path = %path.display(), tiles = report.planned, "Warming tile cache");

        let batch = self.options.batch_size.max(1) as u64;
        for range in &ranges {
            for (z, x, y) in range.iter() {
                self.warm_tile(path, z, x, y, report).await;
                report.processed += 1;

                if report.processed % batch == 0 {
                    let progress = (report.processed * 100 / report.planned.max(1)) as u8;
                    status
                        .update_progress(job, JobStatus::Processing, progress)
                        .await;
                    if self.wait_while_paused(job, status).await == Some(JobStatus::Cancelled) {
                        report.outcome = WarmOutcome::Cancelled;
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Render and store one tile unless it is cached. Tile failures are
    /// logged and skipped.
    async fn warm_tile(&self, path: &Path, z: u8, x: u32, y: u32, report: &mut WarmReport) {
        let key = TileKey::for_file(path, z, x, y).to_string();
        match self.cache.contains(&key).await {
            Ok(true) => {
                report.skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(err) => warn!(key = %key, "Tile cache lookup failed: {}", err),
        }

        match self.source.render_tile(path, z, x, y).await {
            Ok(Some(data)) => match self.cache.set(&key, data, self.options.ttl).await {
                Ok(()) => report.rendered += 1,
                Err(err) => warn!(key = %key, "Tile cache write failed: {}", err),
            },
            Ok(None) => {}
            Err(err) => warn!(key = %key, "Tile render failed: {}", err),
        }
    }

    /// Block while the job is paused; returns the first non-paused status.
    async fn wait_while_paused(
        &self,
        job: JobId,
        status: &dyn JobStatusStore,
    ) -> Option<JobStatus> {
        loop {
            let current = status.read_status(job).await;
            if current != Some(JobStatus::Paused) {
                return current;
            }
            debug!(job = %job, "Cache warming paused");
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}
