//! Optimization and processing pipeline tests.
//!
//! Tests verify:
//! - Striped rasters are rewritten as tiled with an overview pyramid
//! - Pixels survive the rewrite and the original is backed up
//! - Progress is reported in order and failures leave no temp file behind
//! - The full pipeline warms the tile cache after optimizing

use std::sync::Arc;
use std::time::Duration;

use geotile_streamer::format::tiff::DataType;
use geotile_streamer::jobs::temp_path;
use geotile_streamer::{
    CacheWarmer, HandlePool, JobId, JobStatus, JobStatusStore, MemoryJobStore, OptimizeOutcome,
    Optimizer, ProcessingPipeline, RasterDataset, TileCache, TileEncoder, TileKey, WarmOptions,
    WarmOutcome,
};
use tempfile::TempDir;

use super::test_utils::{gradient, write_test_raster, GeoTiffBuilder, RecordingStore};

fn optimizer(dir: &TempDir) -> (Arc<HandlePool>, Optimizer) {
    let pool = Arc::new(HandlePool::new(4, TileEncoder::default()));
    let optimizer = Optimizer::new(Arc::clone(&pool), dir.path().join("backup"));
    (pool, optimizer)
}

async fn read_all(path: &std::path::Path) -> Vec<u8> {
    let mut dataset = RasterDataset::open(path).await.unwrap();
    let (width, height) = dataset.dimensions();
    dataset.read_window_raw(0, 0, 0, width, height).await.unwrap()
}

// =============================================================================
// Optimization
// =============================================================================

#[tokio::test]
async fn test_optimize_striped_raster() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let before = read_all(&path).await;
    assert!(!RasterDataset::open(&path).await.unwrap().layout().is_tiled());

    let (_pool, optimizer) = optimizer(&dir);
    let store = RecordingStore::new();
    let outcome = optimizer.run(&path, JobId(1), &store).await.unwrap();

    // 100x100 fits one 256 block; overviews halve down to 2x2
    assert_eq!(
        outcome,
        OptimizeOutcome::Optimized {
            blocks: 1,
            empty_blocks: 0,
            overviews: 6
        }
    );

    let optimized = RasterDataset::open(&path).await.unwrap();
    assert!(optimized.layout().is_tiled());
    assert_eq!(optimized.layout().overviews().len(), 6);
    assert_eq!(optimized.dimensions(), (100, 100));
    assert_eq!(
        optimized.lonlat_bounds().unwrap(),
        RasterDataset::open(dir.path().join("backup/dem.tif"))
            .await
            .unwrap()
            .lonlat_bounds()
            .unwrap()
    );

    assert_eq!(read_all(&path).await, before, "pixels must survive the rewrite");
    assert!(!temp_path(&path).exists());
}

#[tokio::test]
async fn test_optimize_reports_progress_in_order() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");

    let (_pool, optimizer) = optimizer(&dir);
    let store = RecordingStore::new();
    optimizer.run(&path, JobId(1), &store).await.unwrap();

    assert_eq!(
        store.updates(),
        vec![
            (JobStatus::Processing, 0),
            (JobStatus::Processing, 10),
            (JobStatus::ProcessingOverviews, 80),
            (JobStatus::Completed, 100),
        ]
    );
}

#[tokio::test]
async fn test_optimize_reports_block_progress_for_large_rasters() {
    let dir = TempDir::new().unwrap();
    // 6x5 blocks of 256
    let path = GeoTiffBuilder::new()
        .size(1500, 1200)
        .georef(4326, (0.0, 1.2), 0.001)
        .write(&dir.path().join("big.tif"), gradient);

    let (_pool, optimizer) = optimizer(&dir);
    let store = RecordingStore::new();
    let outcome = optimizer.run(&path, JobId(1), &store).await.unwrap();
    assert!(matches!(outcome, OptimizeOutcome::Optimized {
            blocks: 30,
            empty_blocks: 0,
            ..
        }));

    let copying: Vec<u8> = store
        .updates()
        .iter()
        .filter(|(status, _)| *status == JobStatus::Processing)
        .map(|(_, progress)| *progress)
        .collect();
    assert!(copying.len() > 3, "block copy should report progress");
    assert!(copying.windows(2).all(|w| w[0] <= w[1]));
    assert!(copying.iter().all(|&p| p < 80));
}

#[tokio::test]
async fn test_optimize_counts_unreadable_blocks() {
    let dir = TempDir::new().unwrap();
    // 3x2 blocks; the last strip holds rows 288..300 of the lower block row
    let path = GeoTiffBuilder::new()
        .size(600, 300)
        .georef(4326, (0.0, 0.6), 0.001)
        .truncated()
        .write(&dir.path().join("cut.tif"), gradient);

    let (_pool, optimizer) = optimizer(&dir);
    let store = RecordingStore::new();
    let outcome = optimizer.run(&path, JobId(1), &store).await.unwrap();

    assert!(matches!(
        outcome,
        OptimizeOutcome::Optimized {
            blocks: 6,
            empty_blocks: 3,
            ..
        }
    ));
    assert_eq!(store.last(), Some((JobStatus::Completed, 100)));
    assert!(RasterDataset::open(&path).await.unwrap().layout().is_tiled());
}

#[tokio::test]
async fn test_optimize_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let (_pool, optimizer) = optimizer(&dir);

    optimizer
        .run(&path, JobId(1), &RecordingStore::new())
        .await
        .unwrap();
    let optimized = std::fs::read(&path).unwrap();

    let store = RecordingStore::new();
    let outcome = optimizer.run(&path, JobId(2), &store).await.unwrap();
    assert_eq!(outcome, OptimizeOutcome::AlreadyOptimized);
    assert_eq!(store.last(), Some((JobStatus::Completed, 100)));
    assert_eq!(std::fs::read(&path).unwrap(), optimized);
}

#[tokio::test]
async fn test_optimize_backs_up_original() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let original = std::fs::read(&path).unwrap();

    let (_pool, optimizer) = optimizer(&dir);
    optimizer
        .run(&path, JobId(1), &RecordingStore::new())
        .await
        .unwrap();

    let backup = dir.path().join("backup").join("dem.tif");
    assert_eq!(std::fs::read(backup).unwrap(), original);
    assert_ne!(std::fs::read(&path).unwrap(), original);
}

#[tokio::test]
async fn test_optimize_failure_cleans_up() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.tif");
    std::fs::write(&path, b"definitely not a tiff").unwrap();

    let (_pool, optimizer) = optimizer(&dir);
    let store = RecordingStore::new();
    let result = optimizer.run(&path, JobId(1), &store).await;

    assert!(result.is_err());
    assert_eq!(store.last(), Some((JobStatus::Failed, 0)));
    assert!(!temp_path(&path).exists());
    assert_eq!(std::fs::read(&path).unwrap(), b"definitely not a tiff");
    assert!(!dir.path().join("backup").join("broken.tif").exists());
}

#[tokio::test]
async fn test_optimize_invalidates_pooled_view() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let (pool, optimizer) = optimizer(&dir);

    pool.view(&path).await.unwrap();
    assert!(pool.contains(&path).await);

    optimizer
        .run(&path, JobId(1), &RecordingStore::new())
        .await
        .unwrap();
    assert!(!pool.contains(&path).await);

    // The next request reopens the optimized file
    let view = pool.view(&path).await.unwrap();
    assert!(view.render_tile(8, 128, 127).await.is_some());
}

#[tokio::test]
async fn test_optimize_nodata_float_raster() {
    let dir = TempDir::new().unwrap();
    let path = GeoTiffBuilder::new()
        .data_type(DataType::Float32)
        .nodata("-9999")
        .write(&dir.path().join("dem.tif"), |col, row, _| {
            if col < 50 {
                -9999.0
            } else {
                (col + row) as f64 * 0.5
            }
        });

    let (_pool, optimizer) = optimizer(&dir);
    optimizer
        .run(&path, JobId(1), &RecordingStore::new())
        .await
        .unwrap();

    let mut dataset = RasterDataset::open(&path).await.unwrap();
    assert_eq!(dataset.geo().nodata, Some(-9999.0));

    // Overview pixels fully inside the no-data half keep the no-data value
    let overview = dataset.read_window_raw(1, 0, 0, 50, 50).await.unwrap();
    assert_eq!(DataType::Float32.read_f64(&overview, 0), -9999.0);
    let valid = DataType::Float32.read_f64(&overview, 40);
    assert!(valid > 0.0, "valid pixels are averaged, got {}", valid);
}

// =============================================================================
// Processing Pipeline
// =============================================================================

#[tokio::test]
async fn test_pipeline_optimizes_then_warms() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");

    let pool = Arc::new(HandlePool::new(4, TileEncoder::default()));
    let cache = TileCache::in_memory().unwrap();
    let jobs = Arc::new(MemoryJobStore::new());
    let options = WarmOptions {
        min_zoom: 8,
        max_zoom: 10,
        ..WarmOptions::default()
    };
    let pipeline = ProcessingPipeline::new(
        Optimizer::new(Arc::clone(&pool), dir.path().join("backup")),
        CacheWarmer::with_options(Arc::clone(&pool), cache.clone(), options),
        Arc::clone(&jobs) as Arc<dyn JobStatusStore>,
    );

    let job = jobs.create("dem.tif").await;
    let report = pipeline.run(&path, job).await.unwrap();

    assert!(matches!(report.optimize, OptimizeOutcome::Optimized { .. }));
    let warm = report.warm.expect("warming should run");
    assert_eq!(warm.outcome, WarmOutcome::Completed);
    assert_eq!(warm.planned, 9);
    assert_eq!(warm.rendered, 9);

    assert_eq!(cache.len().await.unwrap(), 9);
    let key = TileKey::for_file(&path, 8, 128, 127).to_string();
    assert!(cache.contains(&key).await.unwrap());

    let snapshot = jobs.snapshot(job).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
}

#[tokio::test]
async fn test_pipeline_pause_during_optimization_holds_warming() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");

    let pool = Arc::new(HandlePool::new(4, TileEncoder::default()));
    let cache = TileCache::in_memory().unwrap();
    let jobs = Arc::new(MemoryJobStore::new());
    let options = WarmOptions {
        min_zoom: 8,
        max_zoom: 10,
        poll_interval: Duration::from_millis(5),
        ..WarmOptions::default()
    };
    let pipeline = Arc::new(ProcessingPipeline::new(
        Optimizer::new(Arc::clone(&pool), dir.path().join("backup")),
        CacheWarmer::with_options(Arc::clone(&pool), cache.clone(), options),
        Arc::clone(&jobs) as Arc<dyn JobStatusStore>,
    ));

    let job = jobs.create("dem.tif").await;
    jobs.pause(job).await.unwrap();
    let run = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let path = path.clone();
        async move { pipeline.run(&path, job).await }
    });

    // Optimization ends with the tiled file swapped in
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let tiled = match RasterDataset::open(&path).await {
                Ok(dataset) => dataset.layout().is_tiled(),
                Err(_) => false,
            };
            if tiled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("optimization did not finish");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(jobs.read_status(job).await, Some(JobStatus::Paused));
    assert!(cache.is_empty().await.unwrap());
    assert!(!run.is_finished());

    jobs.resume(job).await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.warm.unwrap().rendered, 9);
    assert_eq!(jobs.read_status(job).await, Some(JobStatus::Completed));
    assert_eq!(cache.len().await.unwrap(), 9);
}

#[tokio::test]
async fn test_pipeline_failure_skips_warming() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.tif");
    std::fs::write(&path, b"garbage").unwrap();

    let pool = Arc::new(HandlePool::new(4, TileEncoder::default()));
    let cache = TileCache::in_memory().unwrap();
    let jobs = Arc::new(MemoryJobStore::new());
    let pipeline = ProcessingPipeline::new(
        Optimizer::new(Arc::clone(&pool), dir.path().join("backup")),
        CacheWarmer::new(Arc::clone(&pool), cache.clone()),
        Arc::clone(&jobs) as Arc<dyn JobStatusStore>,
    );

    let job = jobs.create("broken.tif").await;
    assert!(pipeline.run(&path, job).await.is_err());

    assert_eq!(jobs.snapshot(job).await.unwrap().status, JobStatus::Failed);
    assert!(cache.is_empty().await.unwrap());
}
