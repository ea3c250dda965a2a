//! Job status reporting.
//!
//! Background pipelines report progress through [`JobStatusStore`] and poll
//! it to honour pause and cancel requests. The store is owned by the caller;
//! [`MemoryJobStore`] is the in-process implementation used by the server.
//!
//! # Controlled states
//!
//! `paused` and `cancelled` are set by users, not by pipelines. A progress
//! update carrying an active status (`processing`, `processing_overviews`)
//! only moves the progress of a paused job and leaves the pause in place.
//! `cancelled` is final: no later update changes it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::JobError;

/// Processing state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    ProcessingOverviews,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::ProcessingOverviews => "processing_overviews",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }

    /// Whether the job has finished, one way or another.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a pipeline is (or will be) working on the job.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Processing | JobStatus::ProcessingOverviews
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// JobStatusStore Trait
// =============================================================================

/// Where pipelines report progress and read control state.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Record `status` and `progress` (0-100) for `job`.
    async fn update_progress(&self, job: JobId, status: JobStatus, progress: u8);

    /// Current status of `job`, `None` if unknown.
    async fn read_status(&self, job: JobId) -> Option<JobStatus>;
}

// =============================================================================
// MemoryJobStore
// =============================================================================

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub file: String,
    pub status: JobStatus,
    pub progress: u8,
}

/// In-process job table.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobSnapshot>>,
    next_id: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job for `file`.
    pub async fn create(&self, file: impl Into<String>) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let snapshot = JobSnapshot {
            job_id: id,
            file: file.into(),
            status: JobStatus::Pending,
            progress: 0,
        };
        self.jobs.write().await.insert(id, snapshot);
        id
    }

    pub async fn snapshot(&self, job: JobId) -> Option<JobSnapshot> {
        self.jobs.read().await.get(&job).cloned()
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.job_id);
        jobs
    }

    /// Pause an active job.
    pub async fn pause(&self, job: JobId) -> Result<JobSnapshot, JobError> {
        self.transition(job, "pause", |s| s.is_active(), JobStatus::Paused)
            .await
    }

    /// Resume a paused job.
    pub async fn resume(&self, job: JobId) -> Result<JobSnapshot, JobError> {
        self.transition(
            job,
            "resume",
            |s| s == JobStatus::Paused,
            JobStatus::Processing,
        )
        .await
    }

    /// Cancel a job that has not finished.
    pub async fn cancel(&self, job: JobId) -> Result<JobSnapshot, JobError> {
        self.transition(job, "cancel", |s| !s.is_terminal(), JobStatus::Cancelled)
            .await
    }

    async fn transition(
        &self,
        job: JobId,
        action: &'static str,
        allowed: impl Fn(JobStatus) -> bool,
        to: JobStatus,
    ) -> Result<JobSnapshot, JobError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(&job).ok_or(JobError::NotFound { id: job.0 })?;
        if !allowed(entry.status) {
            return Err(JobError::InvalidTransition {
                id: job.0,
                action,
                status: entry.status.to_string(),
            });
        }
        debug!(job = %job, from = %entry.status, to = %to, "Job {}", action);
        entry.status = to;
        Ok(entry.clone())
    }
}

#[async_trait]
impl JobStatusStore for MemoryJobStore {
    async fn update_progress(&self, job: JobId, status: JobStatus, progress: u8) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&job) else {
            return;
        };
        match (entry.status, status) {
            (JobStatus::Cancelled, _) => return,
            (JobStatus::Paused, s) if s.is_active() => {}
            (_, s) => entry.status = s,
        }
        entry.progress = progress.min(100);
    }

    async fn read_status(&self, job: JobId) -> Option<JobStatus> {
        self.jobs.read().await.get(&job).map(|j| j.status)
    }
}
