//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry or at an offset in the
//! file. Arrays (chunk offsets, GeoTIFF doubles) are fetched with a single
//! range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values from a TIFF file, honouring its byte order.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    /// Create a new ValueReader.
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Get the byte order from the header.
    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    fn field_type(entry: &IfdEntry) -> Result<FieldType, TiffError> {
        entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))
    }

    /// Read the raw bytes of an entry's value, in file byte order.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ))
        } else {
            let len = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
                tag: "value",
                message: format!("value of {} bytes is too large", size),
            })?;
            Ok(self.reader.read_exact_at(entry.offset, len).await?)
        }
    }

    /// Read the raw bytes of an entry's value converted to little-endian.
    ///
    /// Used when copying tags verbatim into a little-endian output file.
    pub async fn read_bytes_le(&self, entry: &IfdEntry) -> Result<Vec<u8>, TiffError> {
        let field_type = Self::field_type(entry)?;
        let mut bytes = self.read_bytes(entry).await?.to_vec();
        if self.byte_order().is_big_endian() {
            let unit = field_type.swap_unit();
            if unit > 1 {
                for chunk in bytes.chunks_exact_mut(unit) {
                    chunk.reverse();
                }
            }
        }
        Ok(bytes)
    }

    /// Read a single integer value.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        let values = self.read_u64_array(entry).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: "value",
                message: "expected at least one value".to_string(),
            })
    }

    /// Read an array of unsigned integers (Byte, Short, Long, Long8).
    ///
    /// This is the primary method for reading TileOffsets/StripOffsets and
    /// their byte counts.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = Self::field_type(entry)?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.read_bytes(entry).await?;
        parse_u64_array(&bytes, entry.count as usize, field_type, self.byte_order()).ok_or_else(
            || TiffError::InvalidTagValue {
                tag: "value",
                message: format!("expected an unsigned integer type, got {:?}", field_type),
            },
        )
    }

    /// Read an array of Short values (GeoKeyDirectory, BitsPerSample, ExtraSamples).
    pub async fn read_u16_array(&self, entry: &IfdEntry) -> Result<Vec<u16>, TiffError> {
        let values = self.read_u64_array(entry).await?;
        Ok(values.into_iter().map(|v| v as u16).collect())
    }

    /// Read an array of floating point values (Double or Float).
    pub async fn read_f64_array(&self, entry: &IfdEntry) -> Result<Vec<f64>, TiffError> {
        let field_type = Self::field_type(entry)?;
        let count = entry.count as usize;
        let bytes = self.read_bytes(entry).await?;
        let byte_order = self.byte_order();

        match field_type {
            FieldType::Double => Ok((0..count)
                .map(|i| byte_order.read_f64(&bytes[i * 8..]))
                .collect()),
            FieldType::Float => Ok((0..count)
                .map(|i| f32::from_bits(byte_order.read_u32(&bytes[i * 4..])) as f64)
                .collect()),
            _ => Err(TiffError::InvalidTagValue {
                tag: "value",
                message: format!("expected Double or Float, got {:?}", field_type),
            }),
        }
    }

    /// Read a string value (ASCII type), stripping the NUL terminator.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let field_type = Self::field_type(entry)?;
        if field_type != FieldType::Ascii {
            return Err(TiffError::InvalidTagValue {
                tag: "value",
                message: format!("expected Ascii type for string, got {:?}", field_type),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

// =============================================================================
// Parsing from bytes
// =============================================================================

/// Parse an array of unsigned integers from raw bytes.
///
/// Returns None for non-integer field types.
pub fn parse_u64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Option<Vec<u64>> {
    let width = field_type.size_in_bytes();
    let read: fn(ByteOrder, &[u8]) -> u64 = match field_type {
        FieldType::Byte | FieldType::Undefined => |_, b| b[0] as u64,
        FieldType::Short => |o, b| o.read_u16(b) as u64,
        FieldType::Long | FieldType::Ifd => |o, b| o.read_u32(b) as u64,
        FieldType::Long8 | FieldType::Ifd8 => |o, b| o.read_u64(b),
        _ => return None,
    };

    Some(
        bytes
            .chunks_exact(width)
            .take(count)
            .map(|chunk| read(byte_order, chunk))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;
    use async_trait::async_trait;

    struct MemoryReader {
        data: Bytes,
    }

    #[async_trait]
    impl RangeReader for MemoryReader {
        async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
            let start = offset as usize;
            let end = start + len;
            if end > self.data.len() {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: len as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(self.data.slice(start..end))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "memory://values"
        }
    }

    fn header(byte_order: ByteOrder) -> TiffHeader {
        TiffHeader {
            byte_order,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    fn offset_entry(field_type: FieldType, count: u64, offset: u64) -> IfdEntry {
        IfdEntry {
            tag_id: 0,
            field_type: Some(field_type),
            field_type_raw: field_type.as_u16(),
            count,
            value_offset_bytes: [0; 8],
            is_inline: false,
            offset,
        }
    }

    #[tokio::test]
    async fn test_read_f64_array_big_endian() {
        let mut data = vec![0u8; 16];
        for v in [0.5f64, -120.25, 3.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let reader = MemoryReader {
            data: Bytes::from(data),
        };
        let header = header(ByteOrder::BigEndian);
        let values = ValueReader::new(&reader, &header)
            .read_f64_array(&offset_entry(FieldType::Double, 3, 16))
            .await
            .unwrap();
        assert_eq!(values, vec![0.5, -120.25, 3.0]);
    }

    #[tokio::test]
    async fn test_read_u64_array_long() {
        let mut data = vec![0u8; 8];
        for v in [100u32, 200, 300] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let reader = MemoryReader {
            data: Bytes::from(data),
        };
        let header = header(ByteOrder::LittleEndian);
        let values = ValueReader::new(&reader, &header)
            .read_u64_array(&offset_entry(FieldType::Long, 3, 8))
            .await
            .unwrap();
        assert_eq!(values, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_read_string_strips_nul() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(b"-9999\0");
        let reader = MemoryReader {
            data: Bytes::from(data),
        };
        let header = header(ByteOrder::LittleEndian);
        let s = ValueReader::new(&reader, &header)
            .read_string(&offset_entry(FieldType::Ascii, 6, 4))
            .await
            .unwrap();
        assert_eq!(s, "-9999");
    }

    #[tokio::test]
    async fn test_read_bytes_le_swaps_shorts() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);
        let reader = MemoryReader {
            data: Bytes::from(data),
        };
        let header = header(ByteOrder::BigEndian);
        let bytes = ValueReader::new(&reader, &header)
            .read_bytes_le(&offset_entry(FieldType::Short, 3, 4))
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);
    }

    #[tokio::test]
    async fn test_read_u64_inline() {
        let reader = MemoryReader {
            data: Bytes::from(vec![0u8; 8]),
        };
        let header = header(ByteOrder::LittleEndian);
        let mut entry = offset_entry(FieldType::Short, 1, 0);
        entry.is_inline = true;
        entry.value_offset_bytes[..2].copy_from_slice(&256u16.to_le_bytes());
        let value = ValueReader::new(&reader, &header)
            .read_u64(&entry)
            .await
            .unwrap();
        assert_eq!(value, 256);
    }

    #[test]
    fn test_parse_u64_array_rejects_floats() {
        assert!(parse_u64_array(&[0; 8], 1, FieldType::Double, ByteOrder::LittleEndian).is_none());
        assert_eq!(
            parse_u64_array(&[1, 0, 2, 0], 2, FieldType::Short, ByteOrder::LittleEndian),
            Some(vec![1, 2])
        );
    }
}
