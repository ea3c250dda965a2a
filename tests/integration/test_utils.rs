//! Test utilities for creating GeoTIFF files.
//!
//! The builder writes classic little-endian TIFFs with uncompressed strips:
//! the un-optimized kind of file users upload, which the optimizer rewrites
//! as tiled with overviews.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use geotile_streamer::format::tiff::DataType;
use geotile_streamer::{JobId, JobStatus, JobStatusStore};

// =============================================================================
// GeoTIFF Builder
// =============================================================================

/// A single IFD entry: tag, field type, count and little-endian value bytes.
struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: 3,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: 4,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn doubles(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: 12,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            field_type: 2,
            count: data.len() as u32,
            data,
        }
    }
}

/// Builder for striped, uncompressed GeoTIFFs.
pub struct GeoTiffBuilder {
    width: u32,
    height: u32,
    bands: u16,
    alpha: bool,
    data_type: DataType,
    epsg: u16,
    origin: (f64, f64),
    pixel_size: f64,
    rows_per_strip: u32,
    nodata: Option<String>,
    truncated: bool,
}

impl GeoTiffBuilder {
    /// A 100x100 single band u8 raster in EPSG:4326 covering
    /// lon 0.2..0.7, lat 0.3..0.8.
    pub fn new() -> Self {
        Self {
            width: 100,
            height: 100,
            bands: 1,
            alpha: false,
            data_type: DataType::UInt8,
            epsg: 4326,
            origin: (0.2, 0.8),
            pixel_size: 0.005,
            rows_per_strip: 16,
            nodata: None,
            truncated: false,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    /// Append an unassociated alpha sample after the bands.
    pub fn alpha(mut self) -> Self {
        self.alpha = true;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Georeference in `epsg` with the upper-left corner at `origin`.
    pub fn georef(mut self, epsg: u16, origin: (f64, f64), pixel_size: f64) -> Self {
        self.epsg = epsg;
        self.origin = origin;
        self.pixel_size = pixel_size;
        self
    }

    pub fn nodata(mut self, nodata: &str) -> Self {
        self.nodata = Some(nodata.to_string());
        self
    }

    /// Point the last strip past the end of the file, as in an upload cut
    /// short.
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    fn samples(&self) -> u16 {
        self.bands + u16::from(self.alpha)
    }

    /// Encode the file; `value(col, row, sample)` gives each sample.
    pub fn build(&self, value: impl Fn(u32, u32, usize) -> f64) -> Vec<u8> {
        let samples = self.samples() as usize;
        let row_len = self.width as usize * samples;
        let strip_count = self.height.div_ceil(self.rows_per_strip);

        // Header, patched with the IFD offset at the end
        let mut out = vec![b'I', b'I', 42, 0, 0, 0, 0, 0];

        let mut strip_offsets = Vec::with_capacity(strip_count as usize);
        let mut strip_counts = Vec::with_capacity(strip_count as usize);
        for strip in 0..strip_count {
            let first = strip * self.rows_per_strip;
            let rows = self.rows_per_strip.min(self.height - first);
            let mut data = vec![0u8; rows as usize * row_len * self.data_type.size()];
            for r in 0..rows {
                for col in 0..self.width {
                    for s in 0..samples {
                        let index = r as usize * row_len + col as usize * samples + s;
                        self.data_type
                            .write_f64(&mut data, index, value(col, first + r, s));
                    }
                }
            }
            strip_offsets.push(out.len() as u32);
            strip_counts.push(data.len() as u32);
            out.extend_from_slice(&data);
        }
        if self.truncated {
            if let Some(last) = strip_offsets.last_mut() {
                *last = u32::MAX - 1;
            }
        }

        let mut entries = vec![
            Entry::longs(256, &[self.width]),
            Entry::longs(257, &[self.height]),
            Entry::shorts(258, &vec![self.data_type.bits(); samples]),
            Entry::shorts(259, &[1]),
            Entry::shorts(262, &[if self.bands >= 3 { 2 } else { 1 }]),
            Entry::longs(273, &strip_offsets),
            Entry::shorts(277, &[samples as u16]),
            Entry::longs(278, &[self.rows_per_strip]),
            Entry::longs(279, &strip_counts),
            Entry::shorts(284, &[1]),
            Entry::shorts(339, &vec![self.data_type.sample_format(); samples]),
        ];
        if self.alpha {
            entries.push(Entry::shorts(338, &[2]));
        }
        entries.extend(self.geo_entries());
        entries.sort_by_key(|e| e.tag);

        // Values that do not fit the 4-byte slot go before the IFD
        let mut value_offsets = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.data.len() > 4 {
                if out.len() % 2 == 1 {
                    out.push(0);
                }
                value_offsets.push(Some(out.len() as u32));
                out.extend_from_slice(&entry.data);
            } else {
                value_offsets.push(None);
            }
        }

        if out.len() % 2 == 1 {
            out.push(0);
        }
        let ifd_offset = out.len() as u32;
        out[4..8].copy_from_slice(&ifd_offset.to_le_bytes());

        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (entry, offset) in entries.iter().zip(&value_offsets) {
            out.extend_from_slice(&entry.tag.to_le_bytes());
            out.extend_from_slice(&entry.field_type.to_le_bytes());
            out.extend_from_slice(&entry.count.to_le_bytes());
            match offset {
                Some(offset) => out.extend_from_slice(&offset.to_le_bytes()),
                None => {
                    let mut slot = [0u8; 4];
                    slot[..entry.data.len()].copy_from_slice(&entry.data);
                    out.extend_from_slice(&slot);
                }
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    /// Encode the file and write it to `path`.
    pub fn write(&self, path: &Path, value: impl Fn(u32, u32, usize) -> f64) -> PathBuf {
        std::fs::write(path, self.build(value)).unwrap();
        path.to_path_buf()
    }

    fn geo_entries(&self) -> Vec<Entry> {
        let geographic = self.epsg == 4326;
        let keys = [
            1,
            1,
            0,
            3,
            1024,
            0,
            1,
            if geographic { 2 } else { 1 },
            1025,
            0,
            1,
            1,
            if geographic { 2048 } else { 3072 },
            0,
            1,
            self.epsg,
        ];

        let mut entries = vec![
            Entry::doubles(33550, &[self.pixel_size, self.pixel_size, 0.0]),
            Entry::doubles(33922, &[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0]),
            Entry::shorts(34735, &keys),
        ];
        if let Some(nodata) = &self.nodata {
            entries.push(Entry::ascii(42113, nodata));
        }
        entries
    }
}

/// A gradient that is never zero, so every pixel is distinguishable.
pub fn gradient(col: u32, row: u32, _sample: usize) -> f64 {
    (1 + (col + row) % 250) as f64
}

/// Write the default test raster as `name` inside `dir`.
pub fn write_test_raster(dir: &Path, name: &str) -> PathBuf {
    GeoTiffBuilder::new().write(&dir.join(name), gradient)
}

// =============================================================================
// Image Helpers
// =============================================================================

/// Decode a rendered tile into RGBA.
pub fn decode_tile(data: &[u8]) -> image::RgbaImage {
    image::load_from_memory(data)
        .expect("tile should decode")
        .to_rgba8()
}

/// Count pixels with non-zero alpha.
pub fn opaque_pixels(image: &image::RgbaImage) -> usize {
    image.pixels().filter(|p| p.0[3] > 0).count()
}

// =============================================================================
// Recording Status Store
// =============================================================================

/// A status store that remembers every update in order.
#[derive(Default)]
pub struct RecordingStore {
    updates: Mutex<Vec<(JobStatus, u8)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(JobStatus, u8)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(JobStatus, u8)> {
        self.updates.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl JobStatusStore for RecordingStore {
    async fn update_progress(&self, _job: JobId, status: JobStatus, progress: u8) {
        self.updates.lock().unwrap().push((status, progress));
    }

    async fn read_status(&self, _job: JobId) -> Option<JobStatus> {
        self.last().map(|(status, _)| status)
    }
}
