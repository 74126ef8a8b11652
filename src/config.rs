//! Configuration options for Velocity stores.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration options for creating or opening a store.
///
/// Options are persisted in the manifest, so a reopened store keeps the
/// settings it was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityOptions {
    /// Column whose values uniquely identify a row.
    /// Default: None (key-based operations are unavailable)
    pub primary_key_column: Option<String>,

    /// Size at which the write buffer is sealed into a segment (in bytes).
    /// Also the output size used by compaction.
    /// Default: 64MB
    pub target_segment_size_bytes: usize,

    /// Compression codec for segment bodies.
    /// Default: CompressionType::Snappy
    pub default_compression: CompressionType,

    /// Keep the compressed body only when it is smaller than the raw body.
    /// When disabled, the default codec is always applied.
    /// Default: true
    pub enable_auto_compression: bool,

    /// Run a Standard compaction after flush when the trigger holds.
    /// Default: true
    pub auto_compaction_enabled: bool,

    /// Which condition makes the store eligible for compaction.
    /// Default: CompactionTrigger::DeletedRowPercentage
    pub auto_compaction_trigger: CompactionTrigger,

    /// Segment count at which the `SegmentCount` trigger fires.
    /// Default: 10
    pub max_segments_before_compaction: usize,

    /// Deleted-row percentage (0-100) at which the `DeletedRowPercentage` trigger fires.
    /// Default: 20.0
    pub deleted_percentage_threshold: f64,

    /// Memory budget for decoded segments (in bytes).
    /// Set to 0 to disable caching.
    /// Default: 64MB
    pub segment_cache_size: usize,

    /// Pause between background compaction checks.
    /// Default: 30 seconds
    pub background_compaction_interval: Duration,
}

impl Default for VelocityOptions {
    fn default() -> Self {
        Self {
            primary_key_column: None,
            target_segment_size_bytes: 64 * 1024 * 1024, // 64MB
            default_compression: CompressionType::default(),
            enable_auto_compression: true,
            auto_compaction_enabled: true,
            auto_compaction_trigger: CompactionTrigger::DeletedRowPercentage,
            max_segments_before_compaction: 10,
            deleted_percentage_threshold: 20.0,
            segment_cache_size: 64 * 1024 * 1024, // 64MB
            background_compaction_interval: Duration::from_secs(30),
        }
    }
}

/// Compression algorithms supported for segment bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,

    /// LZ4 compression (very fast, lower compression ratio).
    #[cfg(feature = "lz4-compression")]
    Lz4 = 2,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            #[cfg(feature = "lz4-compression")]
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

/// Condition consulted by `can_compact`. Only the configured trigger is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionTrigger {
    /// Fires when the number of sealed segments reaches a maximum.
    SegmentCount,
    /// Fires when the share of tombstoned rows reaches a percentage.
    DeletedRowPercentage,
}

/// How much of the store a compaction rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionStrategy {
    /// A handful of the most fragmented (or smallest) segments.
    Quick,
    /// Segments over the deletion threshold plus undersized segments.
    Standard,
    /// Every segment, merged into the minimum number of outputs.
    Aggressive,
}

impl VelocityOptions {
    /// Creates a new VelocityOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for update-heavy workloads: small segments and an early deletion trigger.
    pub fn enterprise(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key_column: Some(primary_key.into()),
            target_segment_size_bytes: 16 * 1024 * 1024,
            auto_compaction_trigger: CompactionTrigger::DeletedRowPercentage,
            deleted_percentage_threshold: 10.0,
            background_compaction_interval: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Preset for append-heavy ingestion: large segments, compacted by count.
    pub fn high_throughput(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key_column: Some(primary_key.into()),
            target_segment_size_bytes: 128 * 1024 * 1024,
            auto_compaction_trigger: CompactionTrigger::SegmentCount,
            max_segments_before_compaction: 20,
            ..Self::default()
        }
    }

    /// Sets the primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key_column = Some(column.into());
        self
    }

    /// Sets the target segment size.
    pub fn target_segment_size(mut self, bytes: usize) -> Self {
        self.target_segment_size_bytes = bytes;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.default_compression = compression;
        self
    }

    /// Enables or disables size-based codec selection.
    pub fn auto_compression(mut self, value: bool) -> Self {
        self.enable_auto_compression = value;
        self
    }

    /// Enables or disables compaction after flush.
    pub fn auto_compaction(mut self, value: bool) -> Self {
        self.auto_compaction_enabled = value;
        self
    }

    /// Sets the compaction trigger and its threshold.
    ///
    /// The threshold is a segment count for `SegmentCount` and a percentage for
    /// `DeletedRowPercentage`.
    pub fn compaction_trigger(mut self, trigger: CompactionTrigger, threshold: f64) -> Self {
        self.apply_trigger(trigger, threshold);
        self
    }

    /// Sets the decoded segment cache size.
    pub fn segment_cache_size(mut self, bytes: usize) -> Self {
        self.segment_cache_size = bytes;
        self
    }

    /// Sets the background compaction interval.
    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.background_compaction_interval = interval;
        self
    }

    pub(crate) fn apply_trigger(&mut self, trigger: CompactionTrigger, threshold: f64) {
        self.auto_compaction_trigger = trigger;
        match trigger {
            CompactionTrigger::SegmentCount => {
                self.max_segments_before_compaction = threshold.max(0.0) as usize;
            }
            CompactionTrigger::DeletedRowPercentage => {
                self.deleted_percentage_threshold = threshold;
            }
        }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.target_segment_size_bytes == 0 {
            return Err(crate::Error::invalid_argument("target_segment_size_bytes must be > 0"));
        }
        if self.max_segments_before_compaction < 2 {
            return Err(crate::Error::invalid_argument(
                "max_segments_before_compaction must be >= 2",
            ));
        }
        if !(0.0..=100.0).contains(&self.deleted_percentage_threshold) {
            return Err(crate::Error::invalid_argument(
                "deleted_percentage_threshold must be between 0 and 100",
            ));
        }
        if self.background_compaction_interval.is_zero() {
            return Err(crate::Error::invalid_argument(
                "background_compaction_interval must be > 0",
            ));
        }
        if let Some(pk) = &self.primary_key_column {
            if pk.is_empty() {
                return Err(crate::Error::invalid_argument("primary_key_column must not be empty"));
            }
        }
        Ok(())
    }
}
