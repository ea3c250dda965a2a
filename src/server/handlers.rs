//! HTTP request handlers for the GeoTile Streamer API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{file}/{z}/{x}/{y}[.webp|.png]` - Serve a tile
//! - `DELETE /tiles/{file}` - Drop the pooled view (and cached tiles)
//! - `POST /jobs` - Optimize and warm an uploaded raster
//! - `GET /jobs`, `GET /jobs/{id}` - Job status
//! - `POST /jobs/{id}/pause|resume|cancel` - Job control
//! - `GET /health` - Health check endpoint

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{IoError, JobError, RasterError, TileError};
use crate::jobs::{JobId, JobSnapshot, JobStatus, MemoryJobStore, ProcessingPipeline};
use crate::tile::{TileRequest, TileResponse, TileService};

/// Default `Cache-Control` max-age for rendered tiles: 30 days.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 30 * 24 * 3600;

/// Default `Cache-Control` max-age for the placeholder tile.
pub const DEFAULT_PLACEHOLDER_MAX_AGE: u32 = 60;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub tile_service: Arc<TileService>,

    /// Upload and optimize/warm pipeline
    pub pipeline: Arc<ProcessingPipeline>,

    pub jobs: Arc<MemoryJobStore>,

    /// Directory raster file names are resolved against
    pub data_dir: PathBuf,

    /// Cache-Control max-age in seconds for rendered tiles
    pub cache_max_age: u32,

    /// Cache-Control max-age in seconds for the placeholder
    pub placeholder_max_age: u32,
}

impl AppState {
    pub fn new(
        tile_service: Arc<TileService>,
        pipeline: Arc<ProcessingPipeline>,
        jobs: Arc<MemoryJobStore>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tile_service,
            pipeline,
            jobs,
            data_dir: data_dir.into(),
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            placeholder_max_age: DEFAULT_PLACEHOLDER_MAX_AGE,
        }
    }

    /// Path of `name` inside the data directory.
    ///
    /// # Errors
    ///
    /// `InvalidFileName` for names with path components, `FileNotFound`
    /// when no such file exists.
    pub async fn resolve_file(&self, name: &str) -> Result<PathBuf, TileError> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(TileError::InvalidFileName {
                name: name.to_string(),
            });
        }
        let path = self.data_dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(TileError::FileNotFound {
                name: name.to_string(),
            }),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{file}/{z}/{x}/{filename}`
/// where filename is `{y}`, `{y}.webp` or `{y}.png`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    /// Raster file name inside the data directory
    pub file: String,

    pub z: u8,
    pub x: u32,

    /// Tile Y coordinate with optional extension (e.g., "0" or "0.webp")
    pub filename: String,
}

impl TilePathParams {
    /// Parse the Y coordinate from the filename, stripping any image extension.
    pub fn y(&self) -> Result<u32, std::num::ParseIntError> {
        let y = self
            .filename
            .strip_suffix(".webp")
            .or_else(|| self.filename.strip_suffix(".png"))
            .unwrap_or(&self.filename);
        y.parse()
    }
}

/// Query parameters for tile invalidation.
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateQueryParams {
    /// Also delete the file's cached tiles
    #[serde(default)]
    pub purge: bool,
}

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Raster file name inside the data directory
    pub file: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from `DELETE /tiles/{file}`.
#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub file: String,
    pub view_closed: bool,
    pub tiles_purged: usize,
}

/// Response from `POST /jobs`.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Response from `GET /jobs`.
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobSnapshot>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Log an error response by severity and turn it into JSON.
fn error_response(status: StatusCode, error_type: &'static str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        // Common and expected
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

/// Convert TileError to HTTP response.
///
/// Tile rendering itself never produces an error response (absent tiles are
/// served as the placeholder); these are file lookup, cache and raster-open
/// failures from the management endpoints.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileError::FileNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TileError::Raster(RasterError::Io(IoError::NotFound(_))) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            TileError::InvalidFileName { .. } => (StatusCode::BAD_REQUEST, "invalid_file_name"),
            TileError::InvalidCoordinates { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_coordinates")
            }
            TileError::Raster(RasterError::Tiff(_))
            | TileError::Raster(RasterError::MissingGeoreference)
            | TileError::Raster(RasterError::UnsupportedCrs(_)) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            TileError::Raster(_) => (StatusCode::INTERNAL_SERVER_ERROR, "raster_error"),
            TileError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
            TileError::Encode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
        };
        error_response(status, error_type, self.to_string())
    }
}

/// Convert JobError to HTTP response.
impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            JobError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            JobError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        };
        error_response(status, error_type, self.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{file}/{z}/{x}/{y}[.webp|.png]`
///
/// # Response
///
/// - `200 OK`: the tile, or the transparent placeholder when the tile is
///   outside the raster, empty, unreadable or has invalid coordinates
/// - `400 Bad Request`: file name with path components
/// - `404 Not Found`: no such file in the data directory
///
/// # Headers
///
/// - `Content-Type: image/webp` (or `image/png`)
/// - `Cache-Control: public, max-age={cache_max_age}` (`placeholder_max_age`
///   for the placeholder)
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler(
    State(state): State<AppState>,
    Path(params): Path<TilePathParams>,
) -> Result<Response, TileError> {
    let path = state.resolve_file(&params.file).await?;

    let response = match params.y() {
        Ok(y) => {
            let request = TileRequest::new(path, params.z, params.x, y);
            state.tile_service.get_tile(&request).await
        }
        Err(_) => {
            debug!(filename = %params.filename, "Unparseable tile row, serving placeholder");
            TileResponse {
                data: state.tile_service.placeholder(),
                cache_hit: false,
                placeholder: true,
                content_type: state.tile_service.content_type(),
            }
        }
    };

    let max_age = if response.placeholder {
        state.placeholder_max_age
    } else {
        state.cache_max_age
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, response.content_type.to_string()),
            (header::CACHE_CONTROL, format!("public, max-age={}", max_age)),
            (
                header::HeaderName::from_static("x-tile-cache-hit"),
                response.cache_hit.to_string(),
            ),
        ],
        response.data,
    )
        .into_response())
}

/// Handle invalidation requests.
///
/// # Endpoint
///
/// `DELETE /tiles/{file}?purge=true`
///
/// Closes the pooled view of the file; with `purge`, also deletes its cached
/// tiles. Works for files that no longer exist on disk.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<InvalidateQueryParams>,
) -> Result<Json<InvalidateResponse>, TileError> {
    let path = match state.resolve_file(&file).await {
        Ok(path) => path,
        Err(TileError::FileNotFound { .. }) => state.data_dir.join(&file),
        Err(err) => return Err(err),
    };

    let outcome = state.tile_service.invalidate(&path, query.purge).await?;
    info!(
        file = %file,
        view_closed = outcome.view_closed,
        tiles_purged = outcome.tiles_purged,
        "Invalidated raster"
    );
    Ok(Json(InvalidateResponse {
        file,
        view_closed: outcome.view_closed,
        tiles_purged: outcome.tiles_purged,
    }))
}

/// Handle job creation.
///
/// # Endpoint
///
/// `POST /jobs` with `{"file": "<name>"}`
///
/// Returns `202 Accepted` with the new job id. Optimization and cache
/// warming run in the background.
pub async fn create_job_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<Response, TileError> {
    let path = state.resolve_file(&body.file).await?;
    let job = state.jobs.create(body.file.clone()).await;
    info!(job = %job, file = %body.file, "Processing job created");

    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        if let Err(err) = pipeline.run(&path, job).await {
            warn!(job = %job, "Processing job failed: {}", err);
        }
    });

    let body = CreateJobResponse {
        job_id: job,
        status: JobStatus::Pending,
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// `GET /jobs`
pub async fn jobs_handler(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.jobs.list().await,
    })
}

/// `GET /jobs/{id}`
pub async fn job_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobSnapshot>, JobError> {
    state
        .jobs
        .snapshot(JobId(id))
        .await
        .map(Json)
        .ok_or(JobError::NotFound { id })
}

/// `POST /jobs/{id}/pause`
pub async fn pause_job_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobSnapshot>, JobError> {
    state.jobs.pause(JobId(id)).await.map(Json)
}

/// `POST /jobs/{id}/resume`
pub async fn resume_job_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobSnapshot>, JobError> {
    state.jobs.resume(JobId(id)).await.map(Json)
}

/// `POST /jobs/{id}/cancel`
pub async fn cancel_job_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobSnapshot>, JobError> {
    state.jobs.cancel(JobId(id)).await.map(Json)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
