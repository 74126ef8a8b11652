//! Row handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical location of a row: the segment it lives in, its offset inside that
/// segment and the store generation the handle was issued under.
///
/// Handles are invalidated by compaction, which bumps the generation. Using a
/// handle from an earlier generation fails with `Error::StaleRowId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    /// Segment id (rows still in the write buffer carry their future segment id).
    pub segment_id: u64,
    /// Row offset inside the segment.
    pub offset: u32,
    /// Store generation at issue time.
    pub generation: u64,
}

impl RowId {
    /// Creates a new row handle.
    pub fn new(segment_id: u64, offset: u32, generation: u64) -> Self {
        Self { segment_id, offset, generation }
    }

    /// The `(segment, offset)` slot, independent of generation.
    pub fn slot(&self) -> (u64, u32) {
        (self.segment_id, self.offset)
    }

    pub(crate) fn with_generation(self, generation: u64) -> Self {
        Self { generation, ..self }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.segment_id, self.offset, self.generation)
    }
}
