//! Router configuration for GeoTile Streamer.
//!
//! This module defines the HTTP routes and applies CORS and tracing
//! middleware.
//!
//! # Route Structure
//!
//! ```text
//! /health                           GET     Health check
//! /tiles/{file}/{z}/{x}/{y}.webp    GET     Tile endpoint
//! /tiles/{file}                     DELETE  Invalidate a raster
//! /jobs                             GET     List jobs
//!                                   POST    Start processing a raster
//! /jobs/{id}                        GET     Job status
//! /jobs/{id}/pause|resume|cancel    POST    Job control
//! ```
//!
//! # Example
//!
//! ```ignore
//! use geotile_streamer::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(tile_service, pipeline, jobs, "uploads");
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cancel_job_handler, create_job_handler, health_handler, invalidate_handler, job_handler,
    jobs_handler, pause_job_handler, resume_job_handler, tile_handler, AppState,
    DEFAULT_CACHE_MAX_AGE, DEFAULT_PLACEHOLDER_MAX_AGE,
};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds for rendered tiles
    pub cache_max_age: u32,

    /// Cache-Control max-age in seconds for the placeholder tile
    pub placeholder_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Tiles are cacheable for 30 days, the placeholder for 60 seconds
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            placeholder_max_age: DEFAULT_PLACEHOLDER_MAX_AGE,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_placeholder_max_age(mut self, seconds: u32) -> Self {
        self.placeholder_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// The cache lifetimes of `config` override the ones in `state`.
pub fn create_router(mut state: AppState, config: RouterConfig) -> Router {
    state.cache_max_age = config.cache_max_age;
    state.placeholder_max_age = config.placeholder_max_age;

    let cors = build_cors_layer(&config);

    // {filename} captures both "{y}" and "{y}.webp"
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tiles/{file}/{z}/{x}/{filename}", get(tile_handler))
        .route("/tiles/{file}", delete(invalidate_handler))
        .route("/jobs", get(jobs_handler).post(create_job_handler))
        .route("/jobs/{id}", get(job_handler))
        .route("/jobs/{id}/pause", post(pause_job_handler))
        .route("/jobs/{id}/resume", post(resume_job_handler))
        .route("/jobs/{id}/cancel", post(cancel_job_handler))
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        // No origins allowed
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
