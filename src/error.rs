use thiserror::Error;

/// I/O errors that can occur when reading raster files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Any other operating-system level failure (permission, lock, short read)
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

impl IoError {
    /// Map a `std::io::Error` raised while accessing `path`.
    pub fn from_std(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(path)
        } else {
            IoError::Io {
                path,
                message: err.to_string(),
            }
        }
    }
}

/// Errors that can occur when parsing, decoding or writing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Compression scheme without a decoder
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Sample layout the reader cannot handle (planar, odd bit depths, ...)
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// Chunk payload could not be decompressed
    #[error("Failed to decode chunk: {0}")]
    Decode(String),

    /// Chunk or directory could not be written
    #[error("Failed to write TIFF: {0}")]
    Encode(String),
}

/// Errors raised while opening or reading a georeferenced raster
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// I/O error while opening the raster
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The file is not a TIFF we can read
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// No geotransform could be derived from the file
    #[error("Raster has no georeference")]
    MissingGeoreference,

    /// The raster uses a coordinate reference the transformer does not know
    #[error("Unsupported coordinate reference: {0}")]
    UnsupportedCrs(String),

    /// Coordinate transformation failed
    #[error("Projection error: {0}")]
    Projection(String),
}

/// Errors from the durable tile store
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// SQLite failure
    #[error("Tile cache error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Sqlite(err.to_string())
    }
}

/// Errors that can occur during tile serving
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Raster could not be opened
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// Tile cache failure
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// Requested file does not exist in the data directory
    #[error("File not found: {name}")]
    FileNotFound { name: String },

    /// File name contains path components
    #[error("Invalid file name: {name}")]
    InvalidFileName { name: String },

    /// Tile coordinates outside the zoom level's grid
    #[error("Invalid tile coordinates: z={z} x={x} y={y}")]
    InvalidCoordinates { z: u8, x: u32, y: u32 },

    /// Error encoding the output image
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },
}

/// Errors raised by the optimization pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source raster could not be opened or read
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// Output file could not be written
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Filesystem failure (backup, cleanup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Swapping the optimized file into place failed
    #[error("Failed to replace {path}: {message}")]
    Replace { path: String, message: String },
}

/// Errors from job control requests
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// No job with this id
    #[error("Job not found: {id}")]
    NotFound { id: u64 },

    /// The job's current status does not allow the request
    #[error("Cannot {action} job {id} while it is {status}")]
    InvalidTransition {
        id: u64,
        action: &'static str,
        status: String,
    },
}
