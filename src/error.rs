//! Error types for the Velocity storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout Velocity.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for Velocity operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred while reading or writing storage files.
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store is not configured for the requested operation
    /// (for example a key-based operation without a primary key).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A batch or row does not match the store schema.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A segment failed its checksum or could not be decoded.
    #[error("Corrupt segment {segment_id}: {reason}")]
    CorruptSegment {
        /// The id of the damaged segment.
        segment_id: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Manifest or checkpoint level corruption.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// An update or delete referenced a key that is not present.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// An append would introduce a second live row for a primary key.
    #[error("Duplicate primary key: {0}")]
    DuplicateKey(String),

    /// A row handle from before the last compaction was used.
    #[error("Stale row id: {0}")]
    StaleRowId(String),

    /// A row handle or position does not resolve to a live row.
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A referenced column does not exist.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// A Compute expression is malformed.
    #[error("Expression error: {0}")]
    Expression(String),

    /// A compaction was requested while another one is running.
    #[error("A compaction is already in progress")]
    ConcurrentCompaction,

    /// The operation observed a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a corruption error scoped to one segment.
    pub fn corrupt_segment(segment_id: u64, reason: impl Into<String>) -> Self {
        Error::CorruptSegment { segment_id, reason: reason.into() }
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new schema mismatch error.
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Error::SchemaMismatch(msg.into())
    }

    /// Creates a new configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Creates a new expression error.
    pub fn expression(msg: impl Into<String>) -> Self {
        Error::Expression(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad manifest");
        assert_eq!(err.to_string(), "Data corruption: bad manifest");

        let err = Error::corrupt_segment(7, "checksum mismatch");
        assert!(err.to_string().contains("segment 7"));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
