//! Local filesystem range reader.
//!
//! Uploaded rasters live on local disk. A `LocalFileReader` owns one open
//! file descriptor; dropping the reader closes it. Reads seek and read under
//! a mutex, so a single reader can be shared by reference but never issues
//! two overlapping seeks.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::IoError;

use super::range_reader::{check_range, RangeReader};

/// Range reader over a file on local disk.
pub struct LocalFileReader {
    file: Mutex<File>,
    path: PathBuf,
    identifier: String,
    size: u64,
}

impl LocalFileReader {
    /// Open `path` for reading.
    ///
    /// # Errors
    /// Returns `IoError::NotFound` if the file does not exist and `IoError::Io`
    /// for any other failure (permissions, exclusive locks held by a writer).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = File::open(&path)
            .await
            .map_err(|e| IoError::from_std(identifier.clone(), &e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| IoError::from_std(identifier.clone(), &e))?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            identifier,
            size: metadata.len(),
        })
    }

    /// Path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| IoError::from_std(self.identifier.clone(), &e))?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| IoError::from_std(self.identifier.clone(), &e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
