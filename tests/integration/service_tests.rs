//! Tile service, handle pool and durable cache tests against real files.
//!
//! Tests verify:
//! - Rendering from striped and tiled rasters in EPSG:4326 and EPSG:3857
//! - Placeholder tiles outside the raster and for invalid coordinates
//! - Cache hits, persistence across restarts and purging
//! - Pool eviction under FIFO and LRU

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use geotile_streamer::format::tiff::DataType;
use geotile_streamer::{
    EvictionPolicy, HandlePool, TileCache, TileEncoder, TileFormat, TileRequest, TileService,
};
use tempfile::TempDir;

use super::test_utils::{
    decode_tile, gradient, opaque_pixels, write_test_raster, GeoTiffBuilder,
};

fn service_with(pool: HandlePool, cache: TileCache) -> TileService {
    TileService::new(Arc::new(pool), cache).unwrap()
}

fn png_service() -> TileService {
    service_with(
        HandlePool::new(4, TileEncoder::new(TileFormat::Png, 90)),
        TileCache::in_memory().unwrap(),
    )
}

// =============================================================================
// Rendering
// =============================================================================

#[tokio::test]
async fn test_render_geographic_raster() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = png_service();

    let tile = service.get_tile(&TileRequest::new(&path, 8, 128, 127)).await;
    assert!(!tile.placeholder);
    assert!(!tile.cache_hit);
    assert_eq!(tile.content_type, "image/png");

    let image = decode_tile(&tile.data);
    assert_eq!(image.dimensions(), (256, 256));

    // The raster covers only part of the tile
    let opaque = opaque_pixels(&image);
    assert!(opaque > 0);
    assert!(opaque < 256 * 256);
}

#[tokio::test]
async fn test_render_mercator_raster() {
    let dir = TempDir::new().unwrap();
    // Exactly tile z1/1/0
    let half = 20037508.342789244;
    let path = GeoTiffBuilder::new()
        .size(256, 256)
        .georef(3857, (0.0, half), half / 256.0)
        .write(&dir.path().join("mercator.tif"), gradient);
    let service = png_service();

    let tile = service.get_tile(&TileRequest::new(&path, 1, 1, 0)).await;
    assert!(!tile.placeholder);
    assert!(opaque_pixels(&decode_tile(&tile.data)) > 255 * 255);

    let outside = service.get_tile(&TileRequest::new(&path, 1, 0, 1)).await;
    assert!(outside.placeholder);
}

#[tokio::test]
async fn test_render_rgb_with_alpha() {
    let dir = TempDir::new().unwrap();
    let path = GeoTiffBuilder::new().bands(3).alpha().write(
        &dir.path().join("rgba.tif"),
        |col, _row, sample| match sample {
            0 => 200.0,
            1 => 100.0,
            2 => 50.0,
            // Left half transparent
            _ => {
                if col < 50 {
                    0.0
                } else {
                    255.0
                }
            }
        },
    );
    let service = png_service();

    let image = decode_tile(
        &service
            .get_tile(&TileRequest::new(&path, 8, 128, 127))
            .await
            .data,
    );
    let opaque: Vec<_> = image.pixels().filter(|p| p.0[3] > 0).collect();
    assert!(!opaque.is_empty());
    assert!(opaque.iter().all(|p| p.0[0] == 200 && p.0[1] == 100 && p.0[2] == 50));
}

#[tokio::test]
async fn test_render_float_with_nodata() {
    let dir = TempDir::new().unwrap();
    let path = GeoTiffBuilder::new()
        .data_type(DataType::Float32)
        .nodata("-9999")
        .write(&dir.path().join("dem.tif"), |col, row, _| {
            if row < 50 {
                -9999.0
            } else {
                100.0 + col as f64
            }
        });

    let with_nodata = opaque_pixels(&decode_tile(
        &png_service()
            .get_tile(&TileRequest::new(&path, 8, 128, 127))
            .await
            .data,
    ));

    let full = write_test_raster(dir.path(), "full.tif");
    let without_nodata = opaque_pixels(&decode_tile(
        &png_service()
            .get_tile(&TileRequest::new(&full, 8, 128, 127))
            .await
            .data,
    ));

    assert!(with_nodata > 0);
    assert!(with_nodata < without_nodata);
}

#[tokio::test]
async fn test_render_default_webp() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = service_with(
        HandlePool::new(4, TileEncoder::default()),
        TileCache::in_memory().unwrap(),
    );

    let tile = service.get_tile(&TileRequest::new(&path, 8, 128, 127)).await;
    assert_eq!(tile.content_type, "image/webp");
    assert_eq!(&tile.data[0..4], b"RIFF");
    assert_eq!(&tile.data[8..12], b"WEBP");
    assert_eq!(decode_tile(&tile.data).dimensions(), (256, 256));
}

// =============================================================================
// Placeholders
// =============================================================================

#[tokio::test]
async fn test_placeholder_outside_raster() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = png_service();

    let tile = service.get_tile(&TileRequest::new(&path, 8, 0, 0)).await;
    assert!(tile.placeholder);
    assert_eq!(tile.data, service.placeholder());
    assert_eq!(opaque_pixels(&decode_tile(&tile.data)), 0);

    // Placeholders are never cached
    assert!(service.cache().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_placeholder_for_invalid_coordinates() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = png_service();

    assert!(
        service
            .get_tile(&TileRequest::new(&path, 2, 4, 0))
            .await
            .placeholder
    );
    assert!(
        service
            .get_tile(&TileRequest::new(&path, 31, 0, 0))
            .await
            .placeholder
    );
    assert!(service
        .generate_tile(&TileRequest::new(&path, 2, 0, 4))
        .await
        .is_err());
}

#[tokio::test]
async fn test_placeholder_for_unreadable_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.tif");
    std::fs::write(&path, b"II*\0garbage").unwrap();
    let service = png_service();

    let tile = service.get_tile(&TileRequest::new(&path, 8, 128, 127)).await;
    assert!(tile.placeholder);
    assert!(service.generate_tile(&TileRequest::new(&path, 8, 128, 127)).await.is_err());
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_second_request_hits_cache() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = png_service();
    let request = TileRequest::new(&path, 8, 128, 127);

    let first = service.get_tile(&request).await;
    let second = service.get_tile(&request).await;
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(service.cache().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let db = dir.path().join("tiles.sqlite3");
    let request = TileRequest::new(&path, 8, 128, 127);

    let rendered = {
        let service = service_with(
            HandlePool::new(4, TileEncoder::new(TileFormat::Png, 90)),
            TileCache::open(&db).await.unwrap(),
        );
        service.get_tile(&request).await.data
    };

    // The raster is gone; only the cache can answer
    std::fs::remove_file(&path).unwrap();
    let service = service_with(
        HandlePool::new(4, TileEncoder::new(TileFormat::Png, 90)),
        TileCache::open(&db).await.unwrap(),
    );
    let tile = service.get_tile(&request).await;
    assert!(tile.cache_hit);
    assert_eq!(tile.data, rendered);
}

#[tokio::test]
async fn test_expired_tiles_are_rendered_again() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let service = png_service().with_ttl(Duration::from_millis(1));
    let request = TileRequest::new(&path, 8, 128, 127);

    service.get_tile(&request).await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(!service.get_tile(&request).await.cache_hit);
}

#[tokio::test]
async fn test_invalidate_with_purge() {
    let dir = TempDir::new().unwrap();
    let path = write_test_raster(dir.path(), "dem.tif");
    let other = write_test_raster(dir.path(), "other.tif");
    let service = png_service();

    service.get_tile(&TileRequest::new(&path, 8, 128, 127)).await;
    service.get_tile(&TileRequest::new(&path, 9, 256, 254)).await;
    service.get_tile(&TileRequest::new(&other, 8, 128, 127)).await;
    assert_eq!(service.cache().len().await.unwrap(), 3);

    let outcome = service.invalidate(&path, true).await.unwrap();
    assert!(outcome.view_closed);
    assert_eq!(outcome.tiles_purged, 2);
    assert_eq!(service.cache().len().await.unwrap(), 1);
    assert!(!service.pool().contains(&path).await);
    assert!(service.pool().contains(&other).await);

    let again = service.invalidate(&path, false).await.unwrap();
    assert!(!again.view_closed);
    assert_eq!(again.tiles_purged, 0);
}

// =============================================================================
// Handle Pool
// =============================================================================

fn three_rasters(dir: &TempDir) -> Vec<PathBuf> {
    ["a.tif", "b.tif", "c.tif"]
        .iter()
        .map(|name| write_test_raster(dir.path(), name))
        .collect()
}

#[tokio::test]
async fn test_pool_fifo_eviction() {
    let dir = TempDir::new().unwrap();
    let paths = three_rasters(&dir);
    let pool = HandlePool::with_policy(2, EvictionPolicy::Fifo, TileEncoder::default());

    pool.view(&paths[0]).await.unwrap();
    pool.view(&paths[1]).await.unwrap();
    // Using a doesn't save it under FIFO
    pool.view(&paths[0]).await.unwrap();
    pool.view(&paths[2]).await.unwrap();

    assert_eq!(pool.len().await, 2);
    assert!(!pool.contains(&paths[0]).await);
    assert!(pool.contains(&paths[1]).await);
    assert!(pool.contains(&paths[2]).await);
}

#[tokio::test]
async fn test_pool_lru_eviction() {
    let dir = TempDir::new().unwrap();
    let paths = three_rasters(&dir);
    let pool = HandlePool::with_policy(2, EvictionPolicy::Lru, TileEncoder::default());

    pool.view(&paths[0]).await.unwrap();
    pool.view(&paths[1]).await.unwrap();
    pool.view(&paths[0]).await.unwrap();
    pool.view(&paths[2]).await.unwrap();

    assert_eq!(pool.len().await, 2);
    assert!(pool.contains(&paths[0]).await);
    assert!(!pool.contains(&paths[1]).await);
}

#[tokio::test]
async fn test_pool_evicted_view_is_closed() {
    let dir = TempDir::new().unwrap();
    let paths = three_rasters(&dir);
    let pool = HandlePool::new(1, TileEncoder::default());

    let first = pool.view(&paths[0]).await.unwrap();
    assert!(first.is_open().await);
    pool.view(&paths[1]).await.unwrap();

    assert!(!first.is_open().await);
    // A closed view reopens its file on the next render
    assert!(first.render_tile(8, 128, 127).await.is_some());
    assert!(first.is_open().await);
}

#[tokio::test]
async fn test_pool_open_failure_is_not_cached() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.tif");
    let pool = HandlePool::new(2, TileEncoder::default());

    assert!(pool.view(&missing).await.is_err());
    assert!(pool.is_empty().await);

    write_test_raster(dir.path(), "missing.tif");
    assert!(pool.view(&missing).await.is_ok());
}

#[tokio::test]
async fn test_pool_close_all() {
    let dir = TempDir::new().unwrap();
    let paths = three_rasters(&dir);
    let pool = HandlePool::new(4, TileEncoder::default());

    let views = open_views(&pool, &paths).await;
    pool.close_all().await;

    assert!(pool.is_empty().await);
    for view in views {
        assert!(!view.is_open().await);
    }
}

async fn open_views(
    pool: &HandlePool,
    paths: &[PathBuf],
) -> Vec<Arc<geotile_streamer::RasterView>> {
    let mut views = Vec::new();
    for path in paths {
        views.push(pool.view(path).await.unwrap());
    }
    views
}
