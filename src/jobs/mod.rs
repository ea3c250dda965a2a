//! Background processing of uploaded rasters.
//!
//! ```text
//!   upload ──► ProcessingPipeline
//!                 │
//!                 ├─ Optimizer      tiled + compressed + overviews, atomic swap
//!                 │     │ ok
//!                 │     ▼
//!                 └─ CacheWarmer    z12..z20 pre-render into the tile cache
//!                         │
//!                         └─ polls JobStatusStore for pause / cancel
//! ```
//!
//! Both stages report through a [`JobStatusStore`]. The optimizer's
//! `completed` is reported as `processing` at 100% so a pause made during
//! optimization carries over into warming. Warming only starts after a
//! successful optimization and when the job was not cancelled in between.

mod optimize;
mod status;
mod warm;

pub use optimize::{temp_path, OptimizeOutcome, Optimizer, BLOCK_SIZE, OVERVIEW_FACTORS};
pub use status::{JobId, JobSnapshot, JobStatus, JobStatusStore, MemoryJobStore};
pub use warm::{
    plan, CacheWarmer, WarmOptions, WarmOutcome, WarmReport, DEFAULT_WARM_MAX_ZOOM,
    DEFAULT_WARM_MIN_ZOOM,
};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::PipelineError;
use crate::raster::HandlePool;

/// What happened to one uploaded file.
#[derive(Debug)]
pub struct PipelineReport {
    pub optimize: OptimizeOutcome,
    /// `None` when warming was skipped
    pub warm: Option<WarmReport>,
}

/// Optimization followed by cache warming.
pub struct ProcessingPipeline {
    optimizer: Optimizer,
    warmer: CacheWarmer<HandlePool>,
    status: Arc<dyn JobStatusStore>,
}

impl ProcessingPipeline {
    pub fn new(
        optimizer: Optimizer,
        warmer: CacheWarmer<HandlePool>,
        status: Arc<dyn JobStatusStore>,
    ) -> Self {
        Self {
            optimizer,
            warmer,
            status,
        }
    }

    pub fn status(&self) -> &Arc<dyn JobStatusStore> {
        &self.status
    }

    /// Run both stages for `path` under `job`.
    ///
    /// # Errors
    ///
    /// Returns the optimization error; the job is already marked `failed`.
    pub async fn run(&self, path: &Path, job: JobId) -> Result<PipelineReport, PipelineError> {
        let stage = OptimizeStage(self.status.as_ref());
        let optimize = self.optimizer.run(path, job, &stage).await?;

        if self.status.read_status(job).await == Some(JobStatus::Cancelled) {
            info!(job = %job, "Job cancelled, skipping cache warming");
            return Ok(PipelineReport {
                optimize,
                warm: None,
            });
        }

        let warm = self.warmer.run(path, job, self.status.as_ref()).await;
        Ok(PipelineReport {
            optimize,
            warm: Some(warm),
        })
    }
}

/// Status reports of the optimization stage when warming follows it.
struct OptimizeStage<'a>(&'a dyn JobStatusStore);

#[async_trait]
impl JobStatusStore for OptimizeStage<'_> {
    async fn update_progress(&self, job: JobId, status: JobStatus, progress: u8) {
        let status = match status {
            JobStatus::Completed => JobStatus::Processing,
            other => other,
        };
        self.0.update_progress(job, status, progress).await;
    }

    async fn read_status(&self, job: JobId) -> Option<JobStatus> {
        self.0.read_status(job).await
    }
}
