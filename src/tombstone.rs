//! Logical deletes.
//!
//! Sealed segments are immutable, so deleting or replacing a row only records its
//! `(segment, offset)` slot here. Readers skip tombstoned slots; compaction drops
//! them for good.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-segment sets of deleted row offsets.
#[derive(Debug, Clone, Default)]
pub struct TombstoneTracker {
    deleted: HashMap<u64, HashSet<u32>>,
    total: u64,
}

impl TombstoneTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a slot deleted. Returns false if it already was.
    pub fn mark(&mut self, segment_id: u64, offset: u32) -> bool {
        let inserted = self.deleted.entry(segment_id).or_default().insert(offset);
        if inserted {
            self.total += 1;
        }
        inserted
    }

    /// Returns true if the slot is deleted.
    pub fn is_deleted(&self, segment_id: u64, offset: u32) -> bool {
        self.deleted.get(&segment_id).is_some_and(|set| set.contains(&offset))
    }

    /// Deleted offsets of one segment.
    pub fn deleted_in(&self, segment_id: u64) -> Option<&HashSet<u32>> {
        self.deleted.get(&segment_id)
    }

    /// Number of deleted rows in one segment.
    pub fn count_in(&self, segment_id: u64) -> usize {
        self.deleted.get(&segment_id).map_or(0, |set| set.len())
    }

    /// Total number of deleted rows.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Forgets every tombstone of a segment (it was compacted away).
    pub fn remove_segment(&mut self, segment_id: u64) -> usize {
        let removed = self.deleted.remove(&segment_id).map_or(0, |set| set.len());
        self.total -= removed as u64;
        removed
    }

    /// Sorted representation stored in the manifest.
    pub fn to_manifest(&self) -> BTreeMap<u64, Vec<u32>> {
        self.deleted
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(id, set)| {
                let mut offsets: Vec<u32> = set.iter().copied().collect();
                offsets.sort_unstable();
                (*id, offsets)
            })
            .collect()
    }

    /// Restores a tracker from its manifest representation.
    pub fn from_manifest(entries: &BTreeMap<u64, Vec<u32>>) -> Self {
        let mut tracker = Self::new();
        for (segment_id, offsets) in entries {
            for offset in offsets {
                tracker.mark(*segment_id, *offset);
            }
        }
        tracker
    }
}
