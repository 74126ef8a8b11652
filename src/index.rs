//! Primary-key index.
//!
//! Maps each live key to the [`RowId`] of the row currently holding it. The map is
//! built lazily by scanning the store once, then kept current by every write. Flush
//! persists it as a checkpoint so a reopened store can skip the rebuild.

use crate::error::{Error, Result};
use crate::rowid::RowId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Checkpoint file name.
pub const INDEX_FILE: &str = "INDEX";

/// Index summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of keys in the index.
    pub indexed_keys: usize,
    /// Whether the index has been built.
    pub built: bool,
    /// Number of sealed segments the index spans.
    pub segments: usize,
    /// Segments whose keys could not be read into the index.
    pub unreadable_segments: usize,
}

/// In-memory key → row map.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyIndex {
    map: HashMap<Value, RowId>,
    built: bool,
    /// Segments whose keys could not be read; absence of a key is unknown while
    /// any remain.
    unindexed: BTreeSet<u64>,
}

impl PrimaryKeyIndex {
    /// Creates an unbuilt index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a built index from a complete key map.
    pub fn from_map(map: HashMap<Value, RowId>) -> Self {
        Self { map, built: true, unindexed: BTreeSet::new() }
    }

    /// Creates a built index that is missing the keys of the `unindexed` segments.
    pub fn from_partial(map: HashMap<Value, RowId>, unindexed: BTreeSet<u64>) -> Self {
        Self { map, built: true, unindexed }
    }

    /// Returns true once the index has been built, possibly without the keys of
    /// unreadable segments.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Returns true if the index is built and holds the keys of every segment.
    pub fn is_complete(&self) -> bool {
        self.built && self.unindexed.is_empty()
    }

    /// Segments whose keys are missing from the index.
    pub fn unindexed_segments(&self) -> impl Iterator<Item = u64> + '_ {
        self.unindexed.iter().copied()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no keys are indexed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Current row for a key, failing when the key might live in an unreadable
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns `Error::CorruptSegment` for a key that is not indexed while some
    /// segment could not be read.
    pub fn lookup(&self, key: &Value) -> Result<Option<RowId>> {
        match (self.map.get(key), self.unindexed.iter().next()) {
            (Some(row_id), _) => Ok(Some(*row_id)),
            (None, Some(&segment_id)) => Err(Error::corrupt_segment(
                segment_id,
                format!("key {} may be held by this unreadable segment", key),
            )),
            (None, None) => Ok(None),
        }
    }

    /// Points a key at a new row, returning the row it replaced.
    pub fn upsert(&mut self, key: Value, row_id: RowId) -> Option<RowId> {
        self.map.insert(key, row_id)
    }

    /// Removes the key whose entry points at `row_id`, if any.
    pub fn remove_row(&mut self, key: &Value, row_id: RowId) -> bool {
        match self.map.get(key) {
            Some(current) if current.slot() == row_id.slot() => {
                self.map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Rewrites every entry after a compaction: moved rows follow `moved`, every
    /// other entry keeps its slot, and all handles take the new generation.
    pub fn remap(&self, moved: &HashMap<(u64, u32), (u64, u32)>, compacted: &[u64], generation: u64) -> Self {
        let mut map = HashMap::with_capacity(self.map.len());
        for (key, row_id) in &self.map {
            let slot = row_id.slot();
            if compacted.contains(&slot.0) {
                match moved.get(&slot) {
                    Some(&(segment_id, offset)) => {
                        map.insert(key.clone(), RowId::new(segment_id, offset, generation));
                    }
                    None => log::warn!("Index entry {} points at a dropped row {}", key, row_id),
                }
            } else {
                map.insert(key.clone(), row_id.with_generation(generation));
            }
        }
        let unindexed = self.unindexed.iter().filter(|id| !compacted.contains(id)).copied().collect();
        Self { map, built: self.built, unindexed }
    }

    /// Writes a checkpoint stamped with `manifest_version` (temp file + rename).
    pub fn write_checkpoint(&self, dir: &Path, manifest_version: u64) -> Result<()> {
        let checkpoint = IndexCheckpoint {
            manifest_version,
            entries: self.map.iter().map(|(k, r)| (k.clone(), r.segment_id, r.offset)).collect(),
        };
        let mut bytes = bincode::serialize(&checkpoint)?;
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join(INDEX_FILE))?;
        log::debug!("Wrote index checkpoint ({} keys, manifest v{})", self.map.len(), manifest_version);
        Ok(())
    }

    /// Loads a checkpoint if it exists, is intact and matches `manifest_version`.
    ///
    /// Returns `Ok(None)` when the checkpoint is absent, stale or damaged; the caller
    /// then rebuilds the index by scanning.
    pub fn load_checkpoint(dir: &Path, manifest_version: u64, generation: u64) -> Result<Option<Self>> {
        let path = dir.join(INDEX_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < 4 {
            log::warn!("Discarding truncated index checkpoint");
            return Ok(None);
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - 4);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(trailer);
        if crc32fast::hash(payload) != u32::from_le_bytes(stored) {
            log::warn!("Discarding index checkpoint with bad checksum");
            return Ok(None);
        }
        let checkpoint: IndexCheckpoint = match bincode::deserialize(payload) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Discarding unreadable index checkpoint: {}", e);
                return Ok(None);
            }
        };
        if checkpoint.manifest_version != manifest_version {
            log::warn!(
                "Discarding stale index checkpoint (v{}, manifest is v{})",
                checkpoint.manifest_version,
                manifest_version
            );
            return Ok(None);
        }
        let map = checkpoint
            .entries
            .into_iter()
            .map(|(key, segment_id, offset)| (key, RowId::new(segment_id, offset, generation)))
            .collect();
        Ok(Some(Self::from_map(map)))
    }
}

#[derive(Serialize, Deserialize)]
struct IndexCheckpoint {
    manifest_version: u64,
    entries: Vec<(Value, u64, u32)>,
}
