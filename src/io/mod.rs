//! I/O layer: byte-range access to raster files and retry policies.

mod file_reader;
mod range_reader;
pub mod retry;

pub use file_reader::LocalFileReader;
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};
pub use retry::{Backoff, RetryPolicy};
