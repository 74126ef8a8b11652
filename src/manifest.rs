//! Manifest management.
//!
//! The manifest is the single source of truth for what a store directory holds:
//! schema, options, the committed segment set, tombstones and id counters. It is a
//! JSON document rewritten in full on every commit and swapped in atomically
//! (write temp file, fsync, rename), so a crash leaves either the old or the new
//! manifest, never a mix.

use crate::config::VelocityOptions;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::segment::SegmentMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Manifest file name.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// The committed state of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub format_version: u32,
    /// Incremented on every commit; index checkpoints are stamped with it.
    pub version: u64,
    /// Row shape of every segment.
    pub schema: Schema,
    /// Options the store was created with (plus later policy changes).
    pub options: VelocityOptions,
    /// Row-handle generation, bumped by every compaction.
    pub generation: u64,
    /// Next unused segment id.
    pub next_segment_id: u64,
    /// Next unused row ordinal.
    pub next_ordinal: u64,
    /// Sealed segments, ordered by id.
    pub segments: Vec<SegmentMeta>,
    /// Deleted row offsets per segment id.
    pub tombstones: BTreeMap<u64, Vec<u32>>,
    /// Whether an index checkpoint was written for this version.
    pub index_checkpoint: bool,
}

impl Manifest {
    /// Manifest of a freshly created, empty store.
    pub fn empty(schema: Schema, options: VelocityOptions) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            version: 0,
            schema,
            options,
            generation: 0,
            next_segment_id: 1,
            next_ordinal: 0,
            segments: Vec::new(),
            tombstones: BTreeMap::new(),
            index_checkpoint: false,
        }
    }

    /// Loads the manifest from `dir`. Returns `Ok(None)` if there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| Error::corruption(format!("unreadable manifest: {}", e)))?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported manifest format version {}",
                manifest.format_version
            )));
        }
        manifest.check()?;
        Ok(Some(manifest))
    }

    /// Atomically replaces the manifest in `dir`.
    pub fn commit(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let written = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir);
        log::debug!("Committed manifest v{} ({} segments)", self.version, self.segments.len());
        Ok(())
    }

    /// Internal consistency checks run on load.
    fn check(&self) -> Result<()> {
        let mut previous = None;
        for segment in &self.segments {
            if previous.is_some_and(|p| p >= segment.id) {
                return Err(Error::corruption("manifest segments are not ordered by id"));
            }
            if segment.id >= self.next_segment_id {
                return Err(Error::corruption(format!(
                    "segment {} is not below next_segment_id {}",
                    segment.id, self.next_segment_id
                )));
            }
            previous = Some(segment.id);
        }
        for (segment_id, offsets) in &self.tombstones {
            let Some(segment) = self.segments.iter().find(|s| s.id == *segment_id) else {
                return Err(Error::corruption(format!(
                    "tombstones reference unknown segment {}",
                    segment_id
                )));
            };
            if offsets.iter().any(|o| *o >= segment.row_count) {
                return Err(Error::corruption(format!(
                    "tombstone offset out of range for segment {}",
                    segment_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionType;
    use crate::schema::DataType;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        let schema = Schema::new().with_column("Id", DataType::Integer);
        let mut manifest = Manifest::empty(schema, VelocityOptions::default().primary_key("Id"));
        manifest.segments.push(SegmentMeta {
            id: 1,
            row_count: 10,
            min_ordinal: 0,
            max_ordinal: 9,
            byte_len: 200,
            data_size: 150,
            codec: CompressionType::None,
            checksum: 42,
        });
        manifest.next_segment_id = 2;
        manifest.tombstones.insert(1, vec![2, 4]);
        manifest
    }

    #[test]
    fn test_commit_and_load() {
        let dir = TempDir::new().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());

        let manifest = sample();
        manifest.commit(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert!(!dir.path().join("MANIFEST.tmp").exists());
    }

    #[test]
    fn test_commit_replaces() {
        let dir = TempDir::new().unwrap();
        let mut manifest = sample();
        manifest.commit(dir.path()).unwrap();
        manifest.version = 7;
        manifest.commit(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap().unwrap().version, 7);
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        assert!(matches!(Manifest::load(dir.path()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_inconsistent_tombstones_rejected() {
        let dir = TempDir::new().unwrap();
        let mut manifest = sample();
        manifest.tombstones.insert(1, vec![99]);
        manifest.commit(dir.path()).unwrap();
        assert!(matches!(Manifest::load(dir.path()), Err(Error::Corruption(_))));
    }
}
