//! API integration tests for tiles, invalidation and jobs.
//!
//! Tests verify:
//! - Tile retrieval with content type and cache headers
//! - Placeholder responses and their short cache lifetime
//! - Error cases (missing file, invalid file name, unknown job)
//! - Job creation, completion and pause/resume/cancel transitions

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use geotile_streamer::{
    create_router, AppState, CacheWarmer, HandlePool, JobStatusStore, MemoryJobStore, Optimizer,
    ProcessingPipeline, RasterDataset, RouterConfig, TileCache, TileEncoder, TileFormat,
    TileService, WarmOptions,
};

use super::test_utils::{decode_tile, opaque_pixels, write_test_raster};

struct TestApp {
    dir: TempDir,
    router: Router,
    jobs: Arc<MemoryJobStore>,
    cache: TileCache,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(RouterConfig::new().with_tracing(false))
    }

    fn with_config(config: RouterConfig) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("uploads")).unwrap();

        let pool = Arc::new(HandlePool::new(4, TileEncoder::new(TileFormat::Png, 90)));
        let cache = TileCache::in_memory().unwrap();
        let tile_service = TileService::new(Arc::clone(&pool), cache.clone()).unwrap();

        let jobs = Arc::new(MemoryJobStore::new());
        let options = WarmOptions {
            min_zoom: 8,
            max_zoom: 9,
            ..WarmOptions::default()
        };
        let pipeline = ProcessingPipeline::new(
            Optimizer::new(Arc::clone(&pool), dir.path().join("backup")),
            CacheWarmer::with_options(Arc::clone(&pool), cache.clone(), options),
            Arc::clone(&jobs) as Arc<dyn JobStatusStore>,
        );

        let state = AppState::new(
            Arc::new(tile_service),
            Arc::new(pipeline),
            Arc::clone(&jobs),
            dir.path().join("uploads"),
        );
        Self {
            router: create_router(state, config),
            dir,
            jobs,
            cache,
        }
    }

    fn upload(&self, name: &str) -> PathBuf {
        write_test_raster(&self.dir.path().join("uploads"), name)
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, body) = self.request(method, uri, body).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.json("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_retrieval_success() {
    let app = TestApp::new();
    app.upload("dem.tif");

    let request = Request::builder()
        .uri("/tiles/dem.tif/8/128/127.webp")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=2592000"
    );
    assert_eq!(response.headers().get("x-tile-cache-hit").unwrap(), "false");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(opaque_pixels(&decode_tile(&body)) > 0);
}

#[tokio::test]
async fn test_tile_second_request_is_cache_hit() {
    let app = TestApp::new();
    app.upload("dem.tif");

    app.request("GET", "/tiles/dem.tif/8/128/127", None).await;
    let request = Request::builder()
        .uri("/tiles/dem.tif/8/128/127")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-tile-cache-hit").unwrap(), "true");
}

#[tokio::test]
async fn test_tile_outside_raster_is_placeholder() {
    let app = TestApp::with_config(
        RouterConfig::new()
            .with_placeholder_max_age(15)
            .with_tracing(false),
    );
    app.upload("dem.tif");

    let request = Request::builder()
        .uri("/tiles/dem.tif/8/0/0.webp")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=15"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let image = decode_tile(&body);
    assert_eq!(image.dimensions(), (256, 256));
    assert_eq!(opaque_pixels(&image), 0);
}

#[tokio::test]
async fn test_tile_invalid_coordinates_are_placeholder() {
    let app = TestApp::new();
    app.upload("dem.tif");

    let (status, body) = app.request("GET", "/tiles/dem.tif/2/9/0.webp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opaque_pixels(&decode_tile(&body)), 0);

    let (status, body) = app.request("GET", "/tiles/dem.tif/8/128/abc.webp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opaque_pixels(&decode_tile(&body)), 0);
}

#[tokio::test]
async fn test_tile_missing_file() {
    let app = TestApp::new();

    let (status, body) = app.json("GET", "/tiles/nope.tif/8/128/127.webp", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_tile_invalid_file_name() {
    let app = TestApp::new();
    write_test_raster(app.dir.path(), "secret.tif");

    let (status, body) = app
        .json("GET", "/tiles/..%2Fsecret.tif/8/128/127.webp", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_file_name");
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_invalidate_with_purge() {
    let app = TestApp::new();
    app.upload("dem.tif");
    app.request("GET", "/tiles/dem.tif/8/128/127.webp", None).await;
    app.request("GET", "/tiles/dem.tif/9/256/254.webp", None).await;
    assert_eq!(app.cache.len().await.unwrap(), 2);

    let (status, body) = app.json("DELETE", "/tiles/dem.tif?purge=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file"], "dem.tif");
    assert_eq!(body["view_closed"], true);
    assert_eq!(body["tiles_purged"], 2);
    assert!(app.cache.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_invalidate_without_purge_keeps_tiles() {
    let app = TestApp::new();
    app.upload("dem.tif");
    app.request("GET", "/tiles/dem.tif/8/128/127.webp", None).await;

    let (status, body) = app.json("DELETE", "/tiles/dem.tif", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tiles_purged"], 0);
    assert_eq!(app.cache.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_invalidate_deleted_file() {
    let app = TestApp::new();
    let path = app.upload("dem.tif");
    app.request("GET", "/tiles/dem.tif/8/128/127.webp", None).await;
    std::fs::remove_file(path).unwrap();

    let (status, body) = app.json("DELETE", "/tiles/dem.tif?purge=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tiles_purged"], 1);
}

// =============================================================================
// Jobs
// =============================================================================

async fn wait_for_terminal(app: &TestApp, id: u64) -> Value {
    for _ in 0..200 {
        let (_, body) = app.json("GET", &format!("/jobs/{}", id), None).await;
        if matches!(
            body["status"].as_str(),
            Some("completed" | "failed" | "cancelled")
        ) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish", id);
}

#[tokio::test]
async fn test_job_runs_to_completion() {
    let app = TestApp::new();
    let path = app.upload("dem.tif");

    let (status, body) = app
        .json("POST", "/jobs", Some(serde_json::json!({ "file": "dem.tif" })))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let id = body["job_id"].as_u64().unwrap();

    // Optimization and warming each end in "completed"; wait for the tiles
    // of z8..z9 (1 + 2) to land before the final check
    for _ in 0..200 {
        if app.cache.len().await.unwrap() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(app.cache.len().await.unwrap(), 3);

    let job = wait_for_terminal(&app, id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);
    assert_eq!(job["file"], "dem.tif");

    let dataset = RasterDataset::open(&path).await.unwrap();
    assert!(dataset.layout().is_tiled());
    assert!(app.dir.path().join("backup").join("dem.tif").exists());

    let (_, list) = app.json("GET", "/jobs", None).await;
    assert_eq!(list["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_for_missing_file() {
    let app = TestApp::new();

    let (status, _) = app
        .json("POST", "/jobs", Some(serde_json::json!({ "file": "nope.tif" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.jobs.list().await.is_empty());
}

#[tokio::test]
async fn test_job_failure_is_reported() {
    let app = TestApp::new();
    std::fs::write(app.dir.path().join("uploads/broken.tif"), b"not a tiff").unwrap();

    let (_, body) = app
        .json("POST", "/jobs", Some(serde_json::json!({ "file": "broken.tif" })))
        .await;
    let job = wait_for_terminal(&app, body["job_id"].as_u64().unwrap()).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["progress"], 0);
}

#[tokio::test]
async fn test_job_control_transitions() {
    let app = TestApp::new();
    // Created directly so no pipeline races the transitions
    let id = app.jobs.create("dem.tif").await.0;

    let (status, body) = app.json("POST", &format!("/jobs/{}/pause", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) = app.json("POST", &format!("/jobs/{}/pause", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.json("POST", &format!("/jobs/{}/resume", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");

    let (status, body) = app.json("POST", &format!("/jobs/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = app.json("POST", &format!("/jobs/{}/resume", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn test_unknown_job() {
    let app = TestApp::new();

    let (status, body) = app.json("GET", "/jobs/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = app.json("POST", "/jobs/42/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
