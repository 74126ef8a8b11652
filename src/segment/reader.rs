//! Segment decoding.

use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::segment::{decompress, CHECKSUM_SIZE, FORMAT_VERSION, HEADER_SIZE, MAGIC_NUMBER};
use crate::value::Value;
use bytes::Buf;
use std::fs;
use std::path::Path;

/// A fully decoded segment held in memory.
#[derive(Debug, Clone)]
pub struct SegmentData {
    id: u64,
    ordinals: Vec<u64>,
    columns: Vec<Vec<Value>>,
    estimated_size: usize,
}

impl SegmentData {
    /// Read and decode the segment file at `path`, which must hold segment `expected_id`.
    ///
    /// Every failure is reported as `Error::CorruptSegment` for that id, except I/O
    /// errors opening the file.
    pub fn read<P: AsRef<Path>>(path: P, expected_id: u64) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::corrupt_segment(expected_id, "segment file is missing")
            } else {
                Error::Io(e)
            }
        })?;
        Self::decode(&bytes, expected_id)
    }

    /// Decode a segment from its file contents.
    pub fn decode(bytes: &[u8], expected_id: u64) -> Result<Self> {
        let corrupt = |reason: &str| Error::corrupt_segment(expected_id, reason);
        if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(corrupt("file too small"));
        }

        let mut header = &bytes[..HEADER_SIZE];
        if header.get_u32_le() != MAGIC_NUMBER {
            return Err(corrupt("bad magic number"));
        }
        let version = header.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported format version {}", version)));
        }
        let codec = CompressionType::from_u8(header.get_u8())
            .ok_or_else(|| corrupt("unknown or disabled compression codec"))?;
        let _reserved = header.get_u8();
        let id = header.get_u64_le();
        if id != expected_id {
            return Err(corrupt(&format!("header names segment {}", id)));
        }
        let row_count = header.get_u32_le() as usize;
        let column_count = header.get_u16_le() as usize;
        let body_len = header.get_u64_le() as usize;

        if HEADER_SIZE.checked_add(body_len).and_then(|n| n.checked_add(CHECKSUM_SIZE)) != Some(bytes.len()) {
            return Err(corrupt("length does not match header"));
        }
        let stored = &bytes[HEADER_SIZE..HEADER_SIZE + body_len];
        let mut trailer = &bytes[HEADER_SIZE + body_len..];
        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(stored);
        if expected != actual {
            return Err(corrupt(&format!(
                "checksum mismatch (expected {:#010x}, got {:#010x})",
                expected, actual
            )));
        }

        let body = decompress(codec, stored, expected_id)?;
        // The header is outside the checksum: its counts must fit the body before
        // anything is sized from them.
        if row_count.checked_mul(8).map_or(true, |n| n > body.len()) {
            return Err(corrupt(&format!("row count {} does not fit the body", row_count)));
        }
        if column_count > body.len() {
            return Err(corrupt(&format!("column count {} does not fit the body", column_count)));
        }
        let mut reader = BodyReader { buf: &body, segment_id: expected_id };

        let mut ordinals = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            ordinals.push(reader.u64()?);
        }

        let mut columns = Vec::with_capacity(column_count);
        let mut estimated_size = row_count * 8;
        for _ in 0..column_count {
            let tag = reader.u8()?;
            let data_type = DataType::from_u8(tag)
                .ok_or_else(|| corrupt(&format!("unknown type tag {}", tag)))?;
            let bitmap = reader.bytes(row_count.div_ceil(8))?.to_vec();
            let mut values = Vec::with_capacity(row_count);
            for i in 0..row_count {
                let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
                let value = reader.value(data_type)?;
                let value = if is_null { Value::Null } else { value };
                estimated_size += value.estimated_size();
                values.push(value);
            }
            columns.push(values);
        }
        if reader.buf.has_remaining() {
            return Err(corrupt("trailing bytes after last column"));
        }

        Ok(Self { id, ordinals, columns, estimated_size })
    }

    /// Segment id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of physical rows.
    pub fn row_count(&self) -> usize {
        self.ordinals.len()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Ordinal of each row.
    pub fn ordinals(&self) -> &[u64] {
        &self.ordinals
    }

    /// All values of one column.
    pub fn column(&self, index: usize) -> Option<&[Value]> {
        self.columns.get(index).map(|c| c.as_slice())
    }

    /// One cell.
    pub fn value(&self, offset: usize, column: usize) -> Option<&Value> {
        self.columns.get(column)?.get(offset)
    }

    /// Copies one row.
    pub fn row(&self, offset: usize) -> Option<Vec<Value>> {
        if offset >= self.row_count() {
            return None;
        }
        Some(self.columns.iter().map(|c| c[offset].clone()).collect())
    }

    /// Approximate decoded size, used as the cache charge.
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }
}

struct BodyReader<'a> {
    buf: &'a [u8],
    segment_id: u64,
}

impl<'a> BodyReader<'a> {
    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::corrupt_segment(self.segment_id, "body truncated"));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn value(&mut self, data_type: DataType) -> Result<Value> {
        Ok(match data_type {
            DataType::Integer => {
                self.need(4)?;
                Value::Integer(self.buf.get_i32_le())
            }
            DataType::Long => {
                self.need(8)?;
                Value::Long(self.buf.get_i64_le())
            }
            DataType::DateTime => {
                self.need(8)?;
                Value::DateTime(self.buf.get_i64_le())
            }
            DataType::Float | DataType::Decimal => {
                self.need(8)?;
                Value::Float(self.buf.get_f64_le())
            }
            DataType::Boolean => Value::Boolean(self.u8()? != 0),
            DataType::String => {
                self.need(4)?;
                let len = self.buf.get_u32_le() as usize;
                let raw = self.bytes(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| Error::corrupt_segment(self.segment_id, "invalid UTF-8 in string"))?;
                Value::String(s.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::segment::{segment_file_name, SegmentBuilder};
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new()
            .with_column("Id", DataType::Integer)
            .with_column("Name", DataType::String)
            .with_column("Score", DataType::Float)
            .with_column("Active", DataType::Boolean)
            .with_column("At", DataType::DateTime)
    }

    fn write_sample(dir: &Path, codec: CompressionType) -> std::path::PathBuf {
        let mut builder = SegmentBuilder::new(5, &schema());
        builder
            .add(10, vec![
                Value::Integer(1),
                Value::from("Ann"),
                Value::Float(1.5),
                Value::Boolean(true),
                Value::DateTime(1_700_000_000_000),
            ])
            .unwrap();
        builder
            .add(11, vec![Value::Integer(2), Value::Null, Value::Null, Value::Boolean(false), Value::Null])
            .unwrap();
        builder.finish(dir, codec, false).unwrap();
        dir.join(segment_file_name(5))
    }

    #[test]
    fn test_read_back() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::None);
        let data = SegmentData::read(&path, 5).unwrap();

        assert_eq!(data.row_count(), 2);
        assert_eq!(data.ordinals(), &[10, 11]);
        assert_eq!(data.value(0, 1), Some(&Value::from("Ann")));
        assert_eq!(data.value(1, 1), Some(&Value::Null));
        assert_eq!(data.value(1, 2), Some(&Value::Null));
        assert_eq!(data.value(0, 4), Some(&Value::DateTime(1_700_000_000_000)));
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_read_back_compressed() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::Snappy);
        let data = SegmentData::read(&path, 5).unwrap();
        assert_eq!(data.row(0).unwrap()[1], Value::from("Ann"));
    }

    #[test]
    fn test_flipped_byte_detected() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::None);
        let mut bytes = fs::read(&path).unwrap();
        let mid = HEADER_SIZE + 3;
        bytes[mid] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        match SegmentData::read(&path, 5) {
            Err(Error::CorruptSegment { segment_id, .. }) => assert_eq!(segment_id, 5),
            other => panic!("expected corrupt segment, got {:?}", other),
        }
    }

    #[test]
    fn test_damaged_header_counts_detected() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::None);
        let original = fs::read(&path).unwrap();

        // High byte of the row count, then high byte of the column count.
        for offset in [19, 21] {
            let mut bytes = original.clone();
            bytes[offset] = 0xff;
            fs::write(&path, &bytes).unwrap();
            assert!(matches!(SegmentData::read(&path, 5), Err(Error::CorruptSegment { segment_id: 5, .. })));
        }

        // A body length that overflows the file size arithmetic.
        let mut bytes = original.clone();
        bytes[22..30].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(SegmentData::read(&path, 5), Err(Error::CorruptSegment { .. })));
    }

    #[test]
    fn test_truncated_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::None);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();
        assert!(matches!(SegmentData::read(&path, 5), Err(Error::CorruptSegment { .. })));
    }

    #[test]
    fn test_wrong_id_detected() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(dir.path(), CompressionType::None);
        assert!(matches!(SegmentData::read(&path, 6), Err(Error::CorruptSegment { .. })));
    }

    #[test]
    fn test_missing_file_is_corrupt_segment() {
        let dir = TempDir::new().unwrap();
        let err = SegmentData::read(dir.path().join("000009.seg"), 9).unwrap_err();
        assert!(matches!(err, Error::CorruptSegment { segment_id: 9, .. }));
    }
}
