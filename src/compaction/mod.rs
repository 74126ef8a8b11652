//! Compaction: rewriting live rows into fewer, denser segments.
//!
//! Deleting or updating a row only tombstones it, so sealed segments accumulate dead
//! rows. Compaction reclaims that space.
//!
//! ## Process
//!
//! 1. Snapshot the chosen segments and their tombstones under a short read lock
//!    (picker.rs selects the segments)
//! 2. Without any store lock, read the live rows of those segments, order them by
//!    ordinal and write them into new segments of the target size
//! 3. Commit: under a short write lock, carry over tombstones that arrived during
//!    the rewrite, swap the segment set, remap the index, bump the generation and
//!    replace the manifest
//! 4. Delete the old segment files
//!
//! A failed or cancelled job removes every output it wrote; the committed state is
//! never touched before step 3.

pub mod picker;
pub mod scheduler;

pub use picker::{CompactionPicker, CompactionTask, SegmentStats};
pub use scheduler::BackgroundCompactor;

use crate::cancel::CancellationToken;
use crate::config::{CompactionStrategy, CompressionType};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::segment::{segment_file_name, SegmentBuilder, SegmentCache, SegmentData, SegmentMeta};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Rows between two cancellation checks while rewriting.
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Strategy that ran.
    pub strategy: CompactionStrategy,
    /// Segments rewritten.
    pub segments_in: usize,
    /// Segments produced.
    pub segments_out: usize,
    /// Live rows copied into the new segments.
    pub rows_written: u64,
    /// Tombstoned rows dropped.
    pub rows_dropped: u64,
    /// File bytes freed (input size minus output size, never negative).
    pub bytes_reclaimed: u64,
}

impl CompactionReport {
    /// Report for a compaction that found nothing to do.
    pub fn empty(strategy: CompactionStrategy) -> Self {
        Self {
            strategy,
            segments_in: 0,
            segments_out: 0,
            rows_written: 0,
            rows_dropped: 0,
            bytes_reclaimed: 0,
        }
    }
}

/// One segment to rewrite, with the tombstones it had at snapshot time.
#[derive(Debug, Clone)]
pub struct CompactionInput {
    /// The segment descriptor.
    pub meta: SegmentMeta,
    /// Offsets deleted when the snapshot was taken.
    pub deleted: HashSet<u32>,
}

/// Compaction job that rewrites a set of segments
pub struct CompactionJob {
    /// Segments to rewrite
    pub inputs: Vec<CompactionInput>,
    /// Store directory
    pub dir: PathBuf,
    /// Row shape
    pub schema: Schema,
    /// Size at which an output segment is sealed
    pub target_size: usize,
    /// Codec for output segments
    pub codec: CompressionType,
    /// Keep the codec only when it shrinks the body
    pub auto_compression: bool,
    /// Decoded segment cache shared with the store
    pub cache: Arc<SegmentCache>,
}

/// New segments written by a job, not yet committed.
#[derive(Debug)]
pub struct CompactionOutput {
    /// Descriptors of the written segments, ascending by id.
    pub segments: Vec<SegmentMeta>,
    /// Old slot → new slot for every row that was copied.
    pub moved: HashMap<(u64, u32), (u64, u32)>,
    /// Live rows copied.
    pub rows_written: u64,
    /// Tombstoned rows dropped.
    pub rows_dropped: u64,
}

impl CompactionOutput {
    /// Deletes the written segment files (the job failed or lost its commit).
    pub fn discard(&self, dir: &std::path::Path) {
        for meta in &self.segments {
            let _ = fs::remove_file(dir.join(segment_file_name(meta.id)));
        }
    }
}

impl CompactionJob {
    /// Execute the compaction.
    ///
    /// `next_segment_id` allocates ids for output segments. Outputs are already
    /// durable when this returns, but they only become visible once the caller
    /// commits them.
    pub fn run<F>(&self, mut next_segment_id: F, token: &CancellationToken) -> Result<CompactionOutput>
    where
        F: FnMut() -> u64,
    {
        log::info!("Starting compaction: {} input segments", self.inputs.len());
        let mut output = CompactionOutput {
            segments: Vec::new(),
            moved: HashMap::new(),
            rows_written: 0,
            rows_dropped: 0,
        };

        match self.rewrite(&mut next_segment_id, token, &mut output) {
            Ok(()) => {
                log::info!(
                    "Compaction rewrite completed: {} rows written, {} dropped, {} output segments",
                    output.rows_written,
                    output.rows_dropped,
                    output.segments.len()
                );
                Ok(output)
            }
            Err(e) => {
                output.discard(&self.dir);
                Err(e)
            }
        }
    }

    fn rewrite<F>(
        &self,
        next_segment_id: &mut F,
        token: &CancellationToken,
        output: &mut CompactionOutput,
    ) -> Result<()>
    where
        F: FnMut() -> u64,
    {
        // Load inputs and collect live rows.
        let mut loaded: Vec<Arc<SegmentData>> = Vec::with_capacity(self.inputs.len());
        let mut live: Vec<(u64, usize, u32)> = Vec::new();
        for (input_idx, input) in self.inputs.iter().enumerate() {
            token.check()?;
            let id = input.meta.id;
            let path = self.dir.join(segment_file_name(id));
            let data = self.cache.get_or_load(id, || SegmentData::read(&path, id))?;
            for (offset, ordinal) in data.ordinals().iter().enumerate() {
                let offset = offset as u32;
                if input.deleted.contains(&offset) {
                    output.rows_dropped += 1;
                } else {
                    live.push((*ordinal, input_idx, offset));
                }
            }
            loaded.push(data);
        }
        live.sort_unstable_by_key(|(ordinal, _, _)| *ordinal);

        let mut builder: Option<SegmentBuilder> = None;
        for (n, (ordinal, input_idx, offset)) in live.into_iter().enumerate() {
            if n % CANCEL_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            let current = builder.get_or_insert_with(|| SegmentBuilder::new(next_segment_id(), &self.schema));
            let data = &loaded[input_idx];
            let row = data
                .row(offset as usize)
                .ok_or_else(|| Error::corrupt_segment(data.id(), "row offset out of range"))?;
            let new_offset = current.row_count() as u32;
            current.add(ordinal, row)?;
            output.moved.insert((data.id(), offset), (current.id(), new_offset));
            output.rows_written += 1;

            if current.estimated_size() >= self.target_size {
                if let Some(full) = builder.take() {
                    output.segments.push(full.finish(&self.dir, self.codec, self.auto_compression)?);
                }
            }
        }
        token.check()?;
        if let Some(last) = builder.take() {
            output.segments.push(last.finish(&self.dir, self.codec, self.auto_compression)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use crate::segment::WriteBuffer;
    use crate::value::Value;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new().with_column("Id", DataType::Integer).with_column("Name", DataType::String)
    }

    fn write_segment(dir: &TempDir, id: u64, ordinals: std::ops::Range<u64>) -> SegmentMeta {
        let mut buffer = WriteBuffer::new(id);
        for ordinal in ordinals {
            buffer.push(ordinal, vec![Value::Integer(ordinal as i32), Value::from("x")]);
        }
        buffer.seal(dir.path(), &schema(), CompressionType::None, false).unwrap()
    }

    fn job(dir: &TempDir, inputs: Vec<CompactionInput>, target_size: usize) -> CompactionJob {
        CompactionJob {
            inputs,
            dir: dir.path().to_path_buf(),
            schema: schema(),
            target_size,
            codec: CompressionType::None,
            auto_compression: false,
            cache: Arc::new(SegmentCache::new(1024 * 1024)),
        }
    }

    #[test]
    fn test_rewrite_drops_tombstones_in_ordinal_order() {
        let dir = TempDir::new().unwrap();
        // Segment 2 holds earlier ordinals than segment 1.
        let first = write_segment(&dir, 1, 10..15);
        let second = write_segment(&dir, 2, 0..5);
        let inputs = vec![
            CompactionInput { meta: first, deleted: [0u32, 4].into_iter().collect() },
            CompactionInput { meta: second, deleted: HashSet::new() },
        ];

        let mut next = 10;
        let output = job(&dir, inputs, usize::MAX)
            .run(|| {
                next += 1;
                next
            }, &CancellationToken::new())
            .unwrap();

        assert_eq!(output.rows_written, 8);
        assert_eq!(output.rows_dropped, 2);
        assert_eq!(output.segments.len(), 1);
        let data = SegmentData::read(dir.path().join(segment_file_name(11)), 11).unwrap();
        assert_eq!(data.ordinals(), &[0, 1, 2, 3, 4, 11, 12, 13]);
        assert_eq!(output.moved.get(&(1, 1)), Some(&(11, 5)));
        assert!(!output.moved.contains_key(&(1, 0)));
    }

    #[test]
    fn test_rewrite_splits_at_target_size() {
        let dir = TempDir::new().unwrap();
        let meta = write_segment(&dir, 1, 0..100);
        let inputs = vec![CompactionInput { meta, deleted: HashSet::new() }];

        let mut next = 1;
        // Each row is ~17 bytes; 200 bytes per output gives several segments.
        let output = job(&dir, inputs, 200)
            .run(|| {
                next += 1;
                next
            }, &CancellationToken::new())
            .unwrap();
        assert!(output.segments.len() > 1);
        let total: u32 = output.segments.iter().map(|s| s.row_count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_cancelled_job_leaves_no_files() {
        let dir = TempDir::new().unwrap();
        let meta = write_segment(&dir, 1, 0..10);
        let inputs = vec![CompactionInput { meta, deleted: HashSet::new() }];
        let token = CancellationToken::new();
        token.cancel();

        let err = job(&dir, inputs, usize::MAX).run(|| 2, &token).unwrap_err();
        assert!(matches!(err, crate::Error::Cancelled));
        assert!(!dir.path().join(segment_file_name(2)).exists());
        assert!(dir.path().join(segment_file_name(1)).exists());
    }
}
