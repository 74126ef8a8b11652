//! Storage statistics and store summaries.

use crate::schema::DataType;
use std::fmt;
use std::path::PathBuf;

/// Row and file statistics of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    /// Physical rows, live or tombstoned.
    pub total_rows: u64,
    /// Rows visible to readers.
    pub active_rows: u64,
    /// Tombstoned rows not yet reclaimed.
    pub deleted_rows: u64,
    /// `deleted_rows` as a percentage of `total_rows`.
    pub deleted_percentage: f64,
    /// Sealed segment files.
    pub storage_files: usize,
    /// Segment bytes on disk plus the buffered rows.
    pub estimated_size_bytes: u64,
    /// Whether the configured compaction trigger currently holds.
    pub can_compact: bool,
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows ({} active, {} deleted, {:.1}%), {} files, {} bytes{}",
            self.total_rows,
            self.active_rows,
            self.deleted_rows,
            self.deleted_percentage,
            self.storage_files,
            self.estimated_size_bytes,
            if self.can_compact { ", compaction recommended" } else { "" }
        )
    }
}

/// Per-column summary returned by `info()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub data_type: DataType,
    /// Whether nulls are accepted.
    pub nullable: bool,
    /// Live rows holding null in this column.
    pub null_count: usize,
}

/// Schema and size summary of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Store directory.
    pub path: PathBuf,
    /// Live rows.
    pub row_count: usize,
    /// Primary key column, if configured.
    pub primary_key: Option<String>,
    /// Sealed segments.
    pub segments: usize,
    /// Columns in schema order.
    pub columns: Vec<ColumnInfo>,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Velocity store {}", self.path.display())?;
        writeln!(f, "  rows: {}, segments: {}", self.row_count, self.segments)?;
        if let Some(pk) = &self.primary_key {
            writeln!(f, "  primary key: {}", pk)?;
        }
        for column in &self.columns {
            writeln!(
                f,
                "  {:<24} {:<10} {:<9} nulls: {}",
                column.name,
                column.data_type.to_string(),
                if column.nullable { "nullable" } else { "not null" },
                column.null_count
            )?;
        }
        Ok(())
    }
}
