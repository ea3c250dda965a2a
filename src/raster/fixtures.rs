//! Synthetic GeoTIFFs for unit tests.

use std::path::Path;

use crate::format::tiff::{DataType, FieldType, RawTag, TiffTag, TiledTiffWriter, WriterOptions};
use crate::geo::mercator::HALF_CIRCUMFERENCE;

#[derive(Debug, Clone)]
pub(crate) struct Fixture {
    pub width: u32,
    pub height: u32,
    pub samples: u16,
    pub data_type: DataType,
    pub epsg: u16,
    /// Upper-left corner in native units
    pub origin: (f64, f64),
    pub pixel_size: f64,
    pub nodata: Option<&'static str>,
    pub alpha_sample: Option<usize>,
    pub overview: bool,
}

impl Fixture {
    /// A 256x256 single band u8 raster covering Web Mercator tile z1/1/0.
    pub fn mercator_quadrant() -> Self {
        Self {
            width: 256,
            height: 256,
            samples: 1,
            data_type: DataType::UInt8,
            epsg: 3857,
            origin: (0.0, HALF_CIRCUMFERENCE),
            pixel_size: HALF_CIRCUMFERENCE / 256.0,
            nodata: None,
            alpha_sample: None,
            overview: false,
        }
    }

    /// A geographic raster covering lon 0..1, lat 0..1 (EPSG:4326).
    pub fn geographic_degree(data_type: DataType) -> Self {
        Self {
            width: 100,
            height: 100,
            samples: 1,
            data_type,
            epsg: 4326,
            origin: (0.0, 1.0),
            pixel_size: 0.01,
            nodata: None,
            alpha_sample: None,
            overview: false,
        }
    }

    /// Write the raster; `value(col, row, sample)` gives each sample.
    pub async fn write(&self, path: &Path, value: impl Fn(u32, u32, usize) -> f64) {
        let options = WriterOptions {
            block_size: 64,
            alpha_sample: self.alpha_sample,
            ..WriterOptions::for_image(self.width, self.height, self.samples, self.data_type)
        };
        let mut writer = TiledTiffWriter::create(path, options).await.unwrap();
        writer.set_extra_tags(self.geo_tags());

        let overview = self
            .overview
            .then(|| writer.add_overview(self.width.div_ceil(2), self.height.div_ceil(2)));

        for level in std::iter::once(0).chain(overview) {
            let factor = if level == 0 { 1 } else { 2 };
            let (width, height, across, down) = writer.level_geometry(level).unwrap();
            for by in 0..down {
                for bx in 0..across {
                    let mut block = vec![0u8; writer.options().block_len()];
                    for py in 0..64 {
                        for px in 0..64 {
                            let (col, row) = (bx * 64 + px, by * 64 + py);
                            if col >= width || row >= height {
                                continue;
                            }
                            for s in 0..self.samples as usize {
                                let index = (py * 64 + px) as usize * self.samples as usize + s;
                                let v = value(col * factor, row * factor, s);
                                self.data_type.write_f64(&mut block, index, v);
                            }
                        }
                    }
                    writer.write_block(level, bx, by, &block).await.unwrap();
                }
            }
        }
        writer.finish().await.unwrap();
    }

    fn geo_tags(&self) -> Vec<RawTag> {
        let geographic = matches!(self.epsg, 4326 | 4258 | 4269);
        let mut keys: Vec<u16> = vec![1, 1, 0, 3];
        keys.extend_from_slice(&[1024, 0, 1, if geographic { 2 } else { 1 }]);
        keys.extend_from_slice(&[1025, 0, 1, 1]);
        keys.extend_from_slice(&[if geographic { 2048 } else { 3072 }, 0, 1, self.epsg]);

        let mut tags = vec![
            shorts(TiffTag::GeoKeyDirectory, &keys),
            doubles(TiffTag::ModelPixelScale, &[self.pixel_size, self.pixel_size, 0.0]),
            doubles(
                TiffTag::ModelTiepoint,
                &[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0],
            ),
        ];
        if let Some(nodata) = self.nodata {
            let mut data = nodata.as_bytes().to_vec();
            data.push(0);
            tags.push(RawTag {
                tag: TiffTag::GdalNodata.as_u16(),
                field_type: FieldType::Ascii,
                count: data.len() as u64,
                data,
            });
        }
        tags
    }
}

fn shorts(tag: TiffTag, values: &[u16]) -> RawTag {
    RawTag {
        tag: tag.as_u16(),
        field_type: FieldType::Short,
        count: values.len() as u64,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

fn doubles(tag: TiffTag, values: &[f64]) -> RawTag {
    RawTag {
        tag: tag.as_u16(),
        field_type: FieldType::Double,
        count: values.len() as u64,
        data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}
