//! Tile service layer.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │   TileEncoder   │  │
//! │  │  (SQLite,    │  │  (WebP / PNG)   │  │
//! │  │   30 d TTL)  │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               HandlePool                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! - [`TileService`]: cache-first render path with placeholder fallback
//! - [`TileCache`]: durable key/value store with expiry
//! - [`TileKey`]: `"{basename}-{z}-{x}-{y}"` cache keys
//! - [`TileEncoder`]: RGBA to WebP or PNG

mod cache;
mod encoder;
mod service;

pub use cache::{file_identifier, TileCache, TileKey, DEFAULT_TILE_TTL};
pub use encoder::{
    clamp_quality, TileEncoder, TileFormat, DEFAULT_TILE_QUALITY, MAX_TILE_QUALITY,
    MIN_TILE_QUALITY,
};
pub use service::{Invalidation, TileRequest, TileResponse, TileService};
