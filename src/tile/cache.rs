//! Durable tile cache.
//!
//! Encoded tiles are stored in a single SQLite table keyed by a flat string
//! `"{basename}-{z}-{x}-{y}"`. Every entry carries an absolute expiry time;
//! expired entries read as absent and are deleted when they are found.
//! There is no eviction beyond expiry.
//!
//! SQLite calls are blocking, so each operation runs on the blocking thread
//! pool against one shared connection.
//!
//! # Key collisions
//!
//! Keys use the file's base name, not its full path: two rasters with the
//! same file name in different directories share cache entries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::CacheError;

/// Lifetime of cached tiles: 30 days.
pub const DEFAULT_TILE_TTL: Duration = Duration::from_secs(2_592_000);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tiles (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS tiles_expires_at ON tiles (expires_at);";

// =============================================================================
// Cache Key
// =============================================================================

/// Identity of one cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Source identifier (file base name)
    pub identifier: String,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(identifier: impl Into<String>, z: u8, x: u32, y: u32) -> Self {
        Self {
            identifier: identifier.into(),
            z,
            x,
            y,
        }
    }

    /// Key for a tile of the raster at `path`, identified by base name.
    pub fn for_file(path: &Path, z: u8, x: u32, y: u32) -> Self {
        Self::new(file_identifier(path), z, x, y)
    }

    /// Common prefix of every key of one source.
    pub fn prefix(identifier: &str) -> String {
        format!("{}-", identifier)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.identifier, self.z, self.x, self.y)
    }
}

/// Cache identifier of a raster file: its base name.
pub fn file_identifier(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// TileCache
// =============================================================================

/// SQLite-backed tile store with per-entry expiry.
#[derive(Clone)]
pub struct TileCache {
    connection: Arc<Mutex<Connection>>,
    location: Option<PathBuf>,
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("location", &self.location)
            .finish()
    }
}

impl TileCache {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let location = path.clone();
        let connection = tokio::task::spawn_blocking(move || -> Result<Connection, CacheError> {
            let connection = Connection::open(&path)?;
            connection.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            connection.execute_batch(SCHEMA)?;
            Ok(connection)
        })
        .await
        .map_err(join_error)??;

        debug!(path = %location.display(), "Opened tile cache");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            location: Some(location),
        })
    }

    /// A private in-memory cache.
    pub fn in_memory() -> Result<Self, CacheError> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            location: None,
        })
    }

    /// Database file, `None` for in-memory caches.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .map_err(|_| CacheError::Sqlite("tile cache mutex poisoned".to_string()))?;
            op(&guard).map_err(CacheError::from)
        })
        .await
        .map_err(join_error)?
    }

    /// Tile bytes for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let key = key.to_string();
        let now = unix_now();
        self.with_connection(move |conn| {
            let row: Option<(Vec<u8>, i64)> = conn
                .prepare_cached("SELECT data, expires_at FROM tiles WHERE key = ?1")?
                .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            match row {
                Some((data, expires_at)) if expires_at > now => Ok(Some(Bytes::from(data))),
                Some(_) => {
                    conn.prepare_cached("DELETE FROM tiles WHERE key = ?1 AND expires_at <= ?2")?
                        .execute(params![key, now])?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Store `data` under `key` for `ttl`. Last write wins.
    pub async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        let expires_at = unix_now().saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        self.with_connection(move |conn| {
            conn.prepare_cached(
                "INSERT OR REPLACE INTO tiles (key, data, expires_at) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![key, data.as_ref(), expires_at])?;
            Ok(())
        })
        .await
    }

    /// Whether a live entry exists for `key`.
    pub async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        let now = unix_now();
        self.with_connection(move |conn| {
            conn.prepare_cached("SELECT 1 FROM tiles WHERE key = ?1 AND expires_at > ?2")?
                .exists(params![key, now])
        })
        .await
    }

    /// Delete one entry. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            Ok(conn
                .prepare_cached("DELETE FROM tiles WHERE key = ?1")?
                .execute(params![key])?
                > 0)
        })
        .await
    }

    /// Delete every entry whose key starts with `prefix`.
    pub async fn purge_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let prefix = prefix.to_string();
        self.with_connection(move |conn| {
            conn.prepare_cached("DELETE FROM tiles WHERE substr(key, 1, ?1) = ?2")?
                .execute(params![prefix.chars().count() as i64, prefix])
        })
        .await
    }

    /// Delete every expired entry.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = unix_now();
        self.with_connection(move |conn| {
            conn.prepare_cached("DELETE FROM tiles WHERE expires_at <= ?1")?
                .execute(params![now])
        })
        .await
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> Result<usize, CacheError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn join_error(err: tokio::task::JoinError) -> CacheError {
    CacheError::Sqlite(format!("cache task failed: {}", err))
}
