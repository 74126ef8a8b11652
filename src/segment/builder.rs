//! Segment builder.
//!
//! Accumulates rows column by column and writes a sealed segment file.

use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};
use crate::segment::{
    compress, segment_file_name, SegmentMeta, CHECKSUM_SIZE, FORMAT_VERSION, HEADER_SIZE,
    MAGIC_NUMBER,
};
use crate::value::Value;
use bytes::{BufMut, BytesMut};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// SegmentBuilder builds one segment file.
///
/// Usage:
/// ```no_run
/// use velocity::segment::SegmentBuilder;
/// use velocity::{CompressionType, DataType, Schema, Value};
///
/// let schema = Schema::new().with_column("Id", DataType::Integer);
/// let mut builder = SegmentBuilder::new(1, &schema);
/// builder.add(0, vec![Value::Integer(1)]).unwrap();
/// let meta = builder.finish("data", CompressionType::None, false).unwrap();
/// assert_eq!(meta.row_count, 1);
/// ```
#[derive(Debug)]
pub struct SegmentBuilder {
    id: u64,
    types: Vec<DataType>,
    ordinals: Vec<u64>,
    columns: Vec<Vec<Value>>,
    estimated_size: usize,
}

impl SegmentBuilder {
    /// Create a new builder for segment `id` with the column types of `schema`.
    pub fn new(id: u64, schema: &Schema) -> Self {
        let types: Vec<DataType> = schema.columns().iter().map(|c| c.data_type).collect();
        let columns = types.iter().map(|_| Vec::new()).collect();
        Self { id, types, ordinals: Vec::new(), columns, estimated_size: 0 }
    }

    /// Segment id this builder writes.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Add a row. Values must already be validated against the schema.
    pub fn add(&mut self, ordinal: u64, row: Vec<Value>) -> Result<()> {
        if row.len() != self.types.len() {
            return Err(Error::schema_mismatch(format!(
                "segment expects {} columns, row has {}",
                self.types.len(),
                row.len()
            )));
        }
        if self.ordinals.len() >= u32::MAX as usize {
            return Err(Error::invalid_argument("segment row limit reached"));
        }
        self.estimated_size += 8 + row.iter().map(Value::estimated_size).sum::<usize>();
        self.ordinals.push(ordinal);
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        Ok(())
    }

    /// Number of rows added so far.
    pub fn row_count(&self) -> usize {
        self.ordinals.len()
    }

    /// Returns true if no rows were added.
    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    /// Approximate in-memory size of the rows added so far.
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    /// Encode the uncompressed body.
    pub(crate) fn encode_body(&self) -> Result<BytesMut> {
        let rows = self.ordinals.len();
        let mut body = BytesMut::with_capacity(self.estimated_size + rows / 8 + 16);
        for ordinal in &self.ordinals {
            body.put_u64_le(*ordinal);
        }
        for (data_type, values) in self.types.iter().zip(&self.columns) {
            body.put_u8(*data_type as u8);
            let mut bitmap = vec![0u8; rows.div_ceil(8)];
            for (i, value) in values.iter().enumerate() {
                if value.is_null() {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            body.put_slice(&bitmap);
            for value in values {
                encode_value(&mut body, *data_type, value, self.id)?;
            }
        }
        Ok(body)
    }

    /// Finish the segment: encode, compress, write to a temp file, fsync and rename
    /// into `dir/NNNNNN.seg`.
    ///
    /// With `auto_compression` the codec is kept only when it shrinks the body.
    pub fn finish<P: AsRef<Path>>(
        self,
        dir: P,
        codec: CompressionType,
        auto_compression: bool,
    ) -> Result<SegmentMeta> {
        if self.is_empty() {
            return Err(Error::invalid_argument("cannot seal an empty segment"));
        }
        let raw = self.encode_body()?;
        let (codec, stored) = match codec {
            CompressionType::None => (CompressionType::None, raw.to_vec()),
            codec => {
                let compressed = compress(codec, &raw)?;
                if auto_compression && compressed.len() >= raw.len() {
                    (CompressionType::None, raw.to_vec())
                } else {
                    (codec, compressed)
                }
            }
        };
        let checksum = crc32fast::hash(&stored);

        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        header.put_u32_le(MAGIC_NUMBER);
        header.put_u16_le(FORMAT_VERSION);
        header.put_u8(codec as u8);
        header.put_u8(0);
        header.put_u64_le(self.id);
        header.put_u32_le(self.ordinals.len() as u32);
        header.put_u16_le(self.types.len() as u16);
        header.put_u64_le(stored.len() as u64);

        let final_path = dir.as_ref().join(segment_file_name(self.id));
        let tmp_path = temp_path(&final_path);
        let written = write_file(&tmp_path, &header, &stored, checksum);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &final_path)?;

        let byte_len = (HEADER_SIZE + stored.len() + CHECKSUM_SIZE) as u64;
        log::debug!(
            "Sealed segment {} ({} rows, {} bytes, {:?})",
            self.id,
            self.ordinals.len(),
            byte_len,
            codec
        );
        Ok(SegmentMeta {
            id: self.id,
            row_count: self.ordinals.len() as u32,
            min_ordinal: self.ordinals.iter().copied().min().unwrap_or(0),
            max_ordinal: self.ordinals.iter().copied().max().unwrap_or(0),
            byte_len,
            data_size: self.estimated_size as u64,
            codec,
            checksum,
        })
    }
}

/// Temp name used while a segment is being written.
pub(crate) fn temp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_file(path: &Path, header: &[u8], body: &[u8], checksum: u32) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header)?;
    writer.write_all(body)?;
    writer.write_all(&checksum.to_le_bytes())?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn encode_value(buf: &mut BytesMut, data_type: DataType, value: &Value, segment_id: u64) -> Result<()> {
    let mismatch = || {
        Error::internal(format!(
            "segment {}: value {:?} does not match column type {}",
            segment_id, value, data_type
        ))
    };
    match (data_type, value) {
        (DataType::Integer, Value::Null) => buf.put_i32_le(0),
        (DataType::Integer, Value::Integer(v)) => buf.put_i32_le(*v),
        (DataType::Long | DataType::DateTime, Value::Null) => buf.put_i64_le(0),
        (DataType::Long, Value::Long(v)) | (DataType::DateTime, Value::DateTime(v)) => {
            buf.put_i64_le(*v)
        }
        (DataType::Float | DataType::Decimal, Value::Null) => buf.put_f64_le(0.0),
        (DataType::Float | DataType::Decimal, Value::Float(v)) => buf.put_f64_le(*v),
        (DataType::Boolean, Value::Null) => buf.put_u8(0),
        (DataType::Boolean, Value::Boolean(b)) => buf.put_u8(u8::from(*b)),
        (DataType::String, Value::Null) => buf.put_u32_le(0),
        (DataType::String, Value::String(s)) => {
            let len = u32::try_from(s.len()).map_err(|_| mismatch())?;
            buf.put_u32_le(len);
            buf.put_slice(s.as_bytes());
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new().with_column("Id", DataType::Integer).with_column("Name", DataType::String)
    }

    #[test]
    fn test_builder_writes_file() {
        let dir = TempDir::new().unwrap();
        let mut builder = SegmentBuilder::new(3, &schema());
        for i in 0..10 {
            builder.add(i as u64 + 100, vec![Value::Integer(i), Value::from("row")]).unwrap();
        }
        assert_eq!(builder.row_count(), 10);

        let meta = builder.finish(dir.path(), CompressionType::None, true).unwrap();
        assert_eq!(meta.id, 3);
        assert_eq!(meta.row_count, 10);
        assert_eq!(meta.min_ordinal, 100);
        assert_eq!(meta.max_ordinal, 109);

        let path = dir.path().join("000003.seg");
        assert_eq!(fs::metadata(&path).unwrap().len(), meta.byte_len);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_empty_segment_rejected() {
        let dir = TempDir::new().unwrap();
        let builder = SegmentBuilder::new(1, &schema());
        assert!(builder.finish(dir.path(), CompressionType::None, false).is_err());
    }

    #[test]
    fn test_arity_checked() {
        let mut builder = SegmentBuilder::new(1, &schema());
        assert!(builder.add(0, vec![Value::Integer(1)]).is_err());
    }

    #[test]
    fn test_mismatched_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut builder = SegmentBuilder::new(1, &schema());
        builder.add(0, vec![Value::from("oops"), Value::from("x")]).unwrap();
        assert!(builder.finish(dir.path(), CompressionType::None, false).is_err());
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_auto_compression_keeps_smaller_body() {
        let dir = TempDir::new().unwrap();
        let mut builder = SegmentBuilder::new(1, &schema());
        for i in 0..200 {
            builder.add(i, vec![Value::Integer(7), Value::from("repeat repeat repeat")]).unwrap();
        }
        let meta = builder.finish(dir.path(), CompressionType::Snappy, true).unwrap();
        assert_eq!(meta.codec, CompressionType::Snappy);

        let mut tiny = SegmentBuilder::new(2, &schema());
        tiny.add(0, vec![Value::Integer(1), Value::from("a")]).unwrap();
        let meta = tiny.finish(dir.path(), CompressionType::Snappy, true).unwrap();
        assert_eq!(meta.codec, CompressionType::None);
    }
}
