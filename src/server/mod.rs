//! HTTP server layer for GeoTile Streamer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │           GET /tiles/{file}/{z}/{x}/{y}.webp                    │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (tiles, jobs, health)    │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    cancel_job_handler, create_job_handler, health_handler, invalidate_handler, job_handler,
    jobs_handler, pause_job_handler, resume_job_handler, tile_handler, AppState,
    CreateJobRequest, CreateJobResponse, ErrorResponse, HealthResponse, InvalidateQueryParams,
    InvalidateResponse, JobsResponse, TilePathParams, DEFAULT_CACHE_MAX_AGE,
    DEFAULT_PLACEHOLDER_MAX_AGE,
};
pub use routes::{create_router, RouterConfig};
