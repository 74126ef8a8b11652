//! Immutable columnar segments.
//!
//! A segment is a sealed batch of rows written once and never modified. Rows are
//! stored column by column, each column being a type tag, a null bitmap and the
//! packed values. The body may be compressed; the checksum always covers the
//! body exactly as stored.
//!
//! ## File Format (version 1, little endian)
//!
//! ```text
//! [magic "VSEG": u32][format version: u16][codec: u8][reserved: u8]
//! [segment id: u64][row count: u32][column count: u16]
//! [body length: u64]
//! [body: body length bytes]
//! [crc32 of body: u32]
//!
//! body := [ordinal: u64] * row count
//!         then per column: [type tag: u8][null bitmap: ceil(rows / 8)][values]
//! ```
//!
//! Values are `i32` for Integer, `i64` for Long and DateTime, `f64` for Float and
//! Decimal, one byte for Boolean and a `u32` length plus UTF-8 bytes for String.
//! Null slots hold zero or the empty string.

pub mod buffer;
pub mod builder;
pub mod cache;
pub mod reader;

pub use buffer::WriteBuffer;
pub use builder::SegmentBuilder;
pub use cache::{CacheStats, SegmentCache};
pub use reader::SegmentData;

use crate::config::CompressionType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic number at the start of every segment file ("VSEG").
pub const MAGIC_NUMBER: u32 = 0x5653_4547;

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed header size in bytes, up to and including the body length.
pub const HEADER_SIZE: usize = 30;

/// Trailing checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Descriptor of a sealed segment, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Segment id, also its file name.
    pub id: u64,
    /// Number of physical rows (live or tombstoned).
    pub row_count: u32,
    /// Smallest row ordinal in the segment.
    pub min_ordinal: u64,
    /// Largest row ordinal in the segment.
    pub max_ordinal: u64,
    /// File size in bytes.
    pub byte_len: u64,
    /// Approximate decoded size of the rows, comparable to the target segment size.
    pub data_size: u64,
    /// Codec applied to the body.
    pub codec: CompressionType,
    /// CRC32 of the stored body.
    pub checksum: u32,
}

/// File name of a segment.
pub fn segment_file_name(id: u64) -> String {
    format!("{:06}.seg", id)
}

/// Parses a segment id out of a file name produced by [`segment_file_name`].
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".seg")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Compresses a segment body.
pub(crate) fn compress(codec: CompressionType, raw: &[u8]) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(raw.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(raw)
            .map_err(|e| Error::internal(format!("Compression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => lz4::block::compress(raw, None, true)
            .map_err(|e| Error::internal(format!("Compression failed: {}", e))),
    }
}

/// Reverses [`compress`]. Failures are reported against the owning segment.
pub(crate) fn decompress(codec: CompressionType, stored: &[u8], segment_id: u64) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(stored.to_vec()),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(stored)
            .map_err(|e| Error::corrupt_segment(segment_id, format!("decompression failed: {}", e))),
        #[cfg(feature = "lz4-compression")]
        CompressionType::Lz4 => lz4::block::decompress(stored, None)
            .map_err(|e| Error::corrupt_segment(segment_id, format!("decompression failed: {}", e))),
    }
}
