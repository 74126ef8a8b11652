//! Compaction segment picker.
//!
//! Selects which sealed segments a compaction rewrites, based on the requested
//! strategy and per-segment tombstone statistics.

use crate::config::CompactionStrategy;

/// Most segments a Quick compaction rewrites.
pub const QUICK_MAX_SEGMENTS: usize = 4;

/// Per-segment statistics the picker works from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    /// Segment id.
    pub id: u64,
    /// Physical rows.
    pub row_count: u32,
    /// Tombstoned rows.
    pub deleted: usize,
    /// Approximate decoded size.
    pub data_size: u64,
}

impl SegmentStats {
    /// Deleted fraction of the segment.
    pub fn deletion_ratio(&self) -> f64 {
        if self.row_count == 0 {
            0.0
        } else {
            self.deleted as f64 / self.row_count as f64
        }
    }
}

/// A compaction task selected by the picker
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionTask {
    /// Segments to rewrite, ascending by id.
    pub segment_ids: Vec<u64>,
    /// Strategy that selected them.
    pub strategy: CompactionStrategy,
}

/// Picker for selecting segments to compact
#[derive(Debug, Clone)]
pub struct CompactionPicker {
    /// Deletion ratio (0.0 - 1.0) from which a segment counts as fragmented.
    deleted_ratio_threshold: f64,
    /// Target output size; segments below half of it count as undersized.
    target_size: u64,
}

impl CompactionPicker {
    /// Create a new compaction picker. `deleted_percentage_threshold` is 0 - 100.
    pub fn new(deleted_percentage_threshold: f64, target_size: u64) -> Self {
        Self { deleted_ratio_threshold: deleted_percentage_threshold / 100.0, target_size }
    }

    /// Pick segments for compaction.
    ///
    /// Returns None if the strategy finds nothing worth rewriting.
    pub fn pick(&self, strategy: CompactionStrategy, segments: &[SegmentStats]) -> Option<CompactionTask> {
        let mut ids = match strategy {
            CompactionStrategy::Quick => self.pick_quick(segments),
            CompactionStrategy::Standard => self.pick_standard(segments),
            CompactionStrategy::Aggressive => self.pick_aggressive(segments),
        };
        if ids.is_empty() {
            return None;
        }
        ids.sort_unstable();
        log::debug!("Picked {} segments for {:?} compaction: {:?}", ids.len(), strategy, ids);
        Some(CompactionTask { segment_ids: ids, strategy })
    }

    /// The most tombstone-heavy segments, or the smallest ones when nothing is deleted.
    fn pick_quick(&self, segments: &[SegmentStats]) -> Vec<u64> {
        let mut fragmented: Vec<&SegmentStats> = segments.iter().filter(|s| s.deleted > 0).collect();
        if !fragmented.is_empty() {
            fragmented.sort_by(|a, b| {
                b.deletion_ratio().total_cmp(&a.deletion_ratio()).then(a.id.cmp(&b.id))
            });
            return fragmented.iter().take(QUICK_MAX_SEGMENTS).map(|s| s.id).collect();
        }

        if segments.len() < 2 {
            return Vec::new();
        }
        let mut smallest: Vec<&SegmentStats> = segments.iter().collect();
        smallest.sort_by_key(|s| (s.data_size, s.id));
        smallest.iter().take(QUICK_MAX_SEGMENTS).map(|s| s.id).collect()
    }

    /// Segments over the deletion threshold plus undersized segments.
    fn pick_standard(&self, segments: &[SegmentStats]) -> Vec<u64> {
        let fragmented: Vec<u64> = segments
            .iter()
            .filter(|s| s.deleted > 0 && s.deletion_ratio() >= self.deleted_ratio_threshold)
            .map(|s| s.id)
            .collect();
        let undersized: Vec<u64> = segments
            .iter()
            .filter(|s| s.data_size < self.target_size / 2 && !fragmented.contains(&s.id))
            .map(|s| s.id)
            .collect();

        // A lone undersized segment has nothing to merge with.
        if fragmented.is_empty() && undersized.len() < 2 {
            return Vec::new();
        }
        fragmented.into_iter().chain(undersized).collect()
    }

    /// Everything, unless the store already is a single clean segment.
    fn pick_aggressive(&self, segments: &[SegmentStats]) -> Vec<u64> {
        if segments.len() == 1 && segments[0].deleted == 0 {
            return Vec::new();
        }
        segments.iter().map(|s| s.id).collect()
    }
}
