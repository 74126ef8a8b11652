//! Open write buffer.
//!
//! Rows are appended here until the buffer reaches the target segment size, then
//! the whole buffer is sealed into one segment. The buffer already owns the id of
//! the segment it will become, so row handles issued for buffered rows stay valid
//! across sealing.

use crate::config::CompressionType;
use crate::error::Result;
use crate::schema::Schema;
use crate::segment::{SegmentBuilder, SegmentMeta};
use crate::value::Value;
use std::path::Path;

/// Rows appended since the last seal.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    segment_id: u64,
    ordinals: Vec<u64>,
    rows: Vec<Vec<Value>>,
    approximate_size: usize,
}

impl WriteBuffer {
    /// Creates an empty buffer that will become segment `segment_id`.
    pub fn new(segment_id: u64) -> Self {
        Self { segment_id, ordinals: Vec::new(), rows: Vec::new(), approximate_size: 0 }
    }

    /// Id of the segment this buffer will be sealed into.
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Appends a validated row and returns its offset.
    pub fn push(&mut self, ordinal: u64, row: Vec<Value>) -> u32 {
        let offset = self.rows.len() as u32;
        self.approximate_size += 8 + row.iter().map(Value::estimated_size).sum::<usize>();
        self.ordinals.push(ordinal);
        self.rows.push(row);
        offset
    }

    /// Row at `offset`.
    pub fn row(&self, offset: u32) -> Option<&[Value]> {
        self.rows.get(offset as usize).map(|r| r.as_slice())
    }

    /// Ordinals of all buffered rows.
    pub fn ordinals(&self) -> &[u64] {
        &self.ordinals
    }

    /// Number of buffered rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Approximate in-memory size of the buffered rows.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Writes the buffered rows as a sealed segment in `dir`.
    pub fn seal(
        &self,
        dir: &Path,
        schema: &Schema,
        codec: CompressionType,
        auto_compression: bool,
    ) -> Result<SegmentMeta> {
        let mut builder = SegmentBuilder::new(self.segment_id, schema);
        for (ordinal, row) in self.ordinals.iter().zip(&self.rows) {
            builder.add(*ordinal, row.clone())?;
        }
        builder.finish(dir, codec, auto_compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use crate::segment::{segment_file_name, SegmentData};
    use tempfile::TempDir;

    #[test]
    fn test_push_tracks_offsets_and_size() {
        let mut buffer = WriteBuffer::new(4);
        assert!(buffer.is_empty());
        assert_eq!(buffer.push(7, vec![Value::Integer(1)]), 0);
        let size_after_one = buffer.approximate_size();
        assert!(size_after_one > 0);
        assert_eq!(buffer.push(3, vec![Value::from("two")]), 1);

        assert_eq!(buffer.len(), 2);
        assert!(buffer.approximate_size() > size_after_one);
        assert_eq!(buffer.row(1), Some(&[Value::from("two")][..]));
        assert_eq!(buffer.ordinals(), &[7, 3]);
        assert!(buffer.row(2).is_none());
    }

    #[test]
    fn test_seal_keeps_offsets() {
        let dir = TempDir::new().unwrap();
        let schema = Schema::new().with_column("Id", DataType::Integer);
        let mut buffer = WriteBuffer::new(12);
        for i in 0..5 {
            buffer.push(50 + i as u64, vec![Value::Integer(i)]);
        }
        let meta = buffer.seal(dir.path(), &schema, CompressionType::None, false).unwrap();
        assert_eq!(meta.id, 12);

        let data = SegmentData::read(dir.path().join(segment_file_name(12)), 12).unwrap();
        for offset in 0..5u32 {
            assert_eq!(data.row(offset as usize).unwrap(), buffer.row(offset).unwrap());
            assert_eq!(data.ordinals()[offset as usize], buffer.ordinals()[offset as usize]);
        }
    }
}
