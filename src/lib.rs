//! # Velocity - A Segmented Columnar Storage Engine
//!
//! Velocity is a persistent, typed, tabular store. Rows are buffered in memory,
//! sealed into immutable columnar segment files and addressed by stable row
//! handles. Updates and deletes are log-structured: the old row is tombstoned and
//! the new version appended, and compaction later reclaims the dead rows.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **Write Buffer**: Appended rows, readable before they are sealed
//! - **Segments**: Immutable, checksummed, optionally compressed column files
//! - **Manifest**: The atomically replaced record of what is committed
//! - **Primary-Key Index**: Key to row handle map with an on-disk checkpoint
//! - **Compaction**: Rewrites fragmented segments, inline or in the background
//! - **Query Plans**: Deferred, immutable operator chains over the store
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use velocity::{row, DataType, Schema, VelocityBlock, VelocityOptions};
//!
//! # fn main() -> Result<(), velocity::Error> {
//! let schema = Schema::new()
//!     .with_column("Id", DataType::Integer)
//!     .with_column("Name", DataType::String);
//! let options = VelocityOptions::default().primary_key("Id");
//! let store = VelocityBlock::create_with_schema("./people", schema, options)?;
//!
//! // Write operations
//! store.add_row(row![1, "Ada"])?;
//! store.add_row(row![2, "Grace"])?;
//! store.update_row_by_key(2, row![2, "Grace Hopper"])?;
//! store.delete_row_by_key(1)?;
//! store.flush()?;
//!
//! // Read operations
//! let rows = store.where_eq("Id", 2).select(&["Name"]).execute()?;
//! println!("Found: {:?}", rows.value(0, "Name"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod batch;
pub mod cancel;
pub mod compaction;
pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod query;
pub mod rowid;
pub mod schema;
pub mod segment;
pub mod stats;
mod store;
pub mod tombstone;
pub mod value;

// Re-exports
pub use batch::{BatchChunks, BatchSink, BatchSource, RowBatch, RowCursor};
pub use cancel::CancellationToken;
pub use compaction::CompactionReport;
pub use config::{CompactionStrategy, CompactionTrigger, CompressionType, VelocityOptions};
pub use error::{Error, Result};
pub use index::IndexStats;
pub use query::{
    Aggregation, ComparisonOperator, DropNullMode, ExpressionCheck, FillMethod, KeepDuplicateMode, MergeMode,
    Predicate, QueryPlan, SortDirection, WindowFunction, WindowSpec,
};
pub use rowid::RowId;
pub use schema::{Column, DataType, Schema};
pub use stats::{BlockInfo, ColumnInfo, StorageStats};
pub use value::Value;

use compaction::BackgroundCompactor;
use index::PrimaryKeyIndex;
use manifest::{Manifest, MANIFEST_FILE};
use query::predicate::RowFilter;
use query::TableSource;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::StoreInner;

/// The main store handle.
///
/// `VelocityBlock` is cheap to clone; clones share the same store. It is
/// `Send + Sync`: writers are serialized internally, and queries run against
/// snapshots, concurrently with appends and compaction.
///
/// Appended rows are visible in-process immediately. They reach disk when the
/// write buffer fills up or on [`flush`](Self::flush), and a store reopened with
/// [`open`](Self::open) sees exactly what the last flush committed.
#[derive(Debug, Clone)]
pub struct VelocityBlock {
    inner: Arc<StoreInner>,
}

impl VelocityBlock {
    /// Creates a new, empty store at `path` with no columns.
    ///
    /// Columns are added with [`add_column`](Self::add_column) or adopted from the
    /// first batch passed to [`append_batch`](Self::append_batch).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - A store already exists at `path`
    /// - The directory cannot be created or written
    pub fn create<P: AsRef<Path>>(path: P, options: VelocityOptions) -> Result<Self> {
        Self::create_with_schema(path, Schema::new(), options)
    }

    /// Creates a new, empty store at `path` with the given schema.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use velocity::{DataType, Schema, VelocityBlock, VelocityOptions};
    ///
    /// # fn main() -> Result<(), velocity::Error> {
    /// let schema = Schema::new().with_column("Price", DataType::Float);
    /// let store = VelocityBlock::create_with_schema("./prices", schema, VelocityOptions::default())?;
    /// assert_eq!(store.row_count(), 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_with_schema<P: AsRef<Path>>(path: P, schema: Schema, options: VelocityOptions) -> Result<Self> {
        options.validate()?;
        if let Some(pk) = &options.primary_key_column {
            if !schema.is_empty() && schema.index_of(pk).is_none() {
                return Err(Error::configuration(format!("primary key column '{}' is not in the schema", pk)));
            }
        }

        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        if dir.join(MANIFEST_FILE).exists() {
            return Err(Error::configuration(format!("a store already exists at {}", dir.display())));
        }

        let manifest = Manifest::empty(schema, options);
        manifest.commit(&dir)?;
        log::info!("Created Velocity store at {:?}", dir);
        Ok(Self::from_parts(dir, &manifest, PrimaryKeyIndex::new()))
    }

    /// Opens an existing store.
    ///
    /// Schema, rows, tombstones and the primary-key index are reconstructed from
    /// the manifest and the segment files alone. Segment and temp files the
    /// manifest does not reference (left by an interrupted flush or compaction) are
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No store exists at `path`
    /// - The manifest is damaged
    /// - Leftover files cannot be removed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();

        // Step 1: Load the committed manifest
        let manifest = Manifest::load(&dir)?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no Velocity store at {}", dir.display()),
            ))
        })?;
        manifest.options.validate()?;

        // Step 2: Drop files from interrupted writes
        let removed = store::remove_orphans(&dir, &manifest)?;

        // Step 3: Reuse the index checkpoint when it matches this manifest
        let index = if manifest.index_checkpoint {
            PrimaryKeyIndex::load_checkpoint(&dir, manifest.version, manifest.generation)?.unwrap_or_default()
        } else {
            PrimaryKeyIndex::new()
        };

        log::info!(
            "Opened Velocity store at {:?}: manifest v{}, {} segments, {} orphans removed, index {}",
            dir,
            manifest.version,
            manifest.segments.len(),
            removed,
            if index.is_built() { "loaded" } else { "deferred" }
        );
        Ok(Self::from_parts(dir, &manifest, index))
    }

    /// Creates a store at `path` holding the rows of `batch`, flushed to disk.
    pub fn save<P: AsRef<Path>>(path: P, batch: &RowBatch, options: VelocityOptions) -> Result<Self> {
        let store = Self::create_with_schema(path, batch.schema().clone(), options)?;
        store.append_batch(batch)?;
        store.flush()?;
        Ok(store)
    }

    fn from_parts(dir: PathBuf, manifest: &Manifest, index: PrimaryKeyIndex) -> Self {
        Self { inner: Arc::new(StoreInner::new(dir, manifest, index)) }
    }

    /// Flushes pending writes and stops background compaction, waiting for a
    /// running cycle to finish.
    pub fn close(self) -> Result<()> {
        let background = self.inner.background.lock().take();
        if let Some(compactor) = background {
            compactor.stop_and_wait();
        }
        self.flush()
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    /// Current options, including compaction policy changes.
    pub fn options(&self) -> VelocityOptions {
        self.inner.state.read().options.clone()
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Current schema.
    pub fn schema(&self) -> Schema {
        self.inner.state.read().schema.clone()
    }

    /// Returns true if the schema has a column named `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.inner.state.read().schema.index_of(name).is_some()
    }

    /// Adds a column. Only allowed while the store holds no rows.
    pub fn add_column(&self, column: Column) -> Result<()> {
        let _write = self.inner.write_lock.lock();
        let mut state = self.inner.state.write();
        if state.total_rows() > 0 {
            return Err(Error::schema_mismatch(format!(
                "cannot add column '{}': columns can only be added while the store is empty",
                column.name
            )));
        }
        state.schema.add_column(column)?;
        state.dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Appends
    // ------------------------------------------------------------------

    /// Appends one row, returning its handle.
    ///
    /// The row is validated against the schema: arity, nullability and types
    /// (numbers widen losslessly, e.g. an integer into a Float column).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The row does not fit the schema (`SchemaMismatch`)
    /// - A primary key is configured and the key is null or already present
    pub fn add_row(&self, values: Vec<Value>) -> Result<RowId> {
        self.append_rows(vec![values])?
            .pop()
            .ok_or_else(|| Error::internal("append produced no row"))
    }

    /// Appends rows as one unit: either every row is accepted or none is.
    pub fn append_rows(&self, rows: Vec<Vec<Value>>) -> Result<Vec<RowId>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let _write = self.inner.write_lock.lock();
        self.inner.append_locked(rows)
    }

    /// Appends every row of `batch`.
    ///
    /// The batch must have the store's column names and types, in order. A store
    /// with no columns and no rows adopts the batch schema once its rows are accepted.
    pub fn append_batch(&self, batch: &RowBatch) -> Result<()> {
        let _write = self.inner.write_lock.lock();
        let mut adopted = None;
        {
            let mut state = self.inner.state.write();
            if state.schema.is_empty() && state.total_rows() == 0 {
                adopted = Some(state.dirty);
                state.schema = batch.schema().clone();
                state.dirty = true;
            } else if !same_shape(&state.schema, batch.schema()) {
                return Err(Error::schema_mismatch(format!(
                    "batch columns {:?} do not match store columns {:?}",
                    batch.schema().column_names(),
                    state.schema.column_names()
                )));
            }
        }
        if batch.is_empty() {
            return Ok(());
        }
        let result = self.inner.append_locked(batch.rows().collect());
        if let (Err(e), Some(was_dirty)) = (&result, adopted) {
            let mut state = self.inner.state.write();
            if state.total_rows() == 0 {
                log::debug!("Batch rejected ({}), store keeps no columns", e);
                state.schema = Schema::new();
                state.dirty = was_dirty;
            }
        }
        result.map(|_| ())
    }

    /// Streams `source` into the store, `batch_size` rows at a time. Returns the
    /// number of rows ingested.
    pub fn ingest<S: BatchSource + ?Sized>(&self, source: &mut S, batch_size: usize) -> Result<usize> {
        if batch_size == 0 {
            return Err(Error::invalid_argument("batch_size must be > 0"));
        }
        let mut total = 0;
        while let Some(batch) = source.read_batch(batch_size)? {
            self.append_batch(&batch)?;
            total += batch.row_count();
        }
        log::debug!("Ingested {} rows", total);
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Durability
    // ------------------------------------------------------------------

    /// Seals the write buffer and commits everything to the manifest.
    ///
    /// Idempotent and cheap when nothing is pending. When auto-compaction is on and
    /// the compaction trigger holds, a Standard compaction runs afterwards; its
    /// failure is logged and does not fail the flush.
    ///
    /// # Errors
    ///
    /// A failed flush leaves the previously committed state on disk intact.
    pub fn flush(&self) -> Result<()> {
        self.flush_with_cancel(&CancellationToken::new())
    }

    /// [`flush`](Self::flush) observing a cancellation token.
    pub fn flush_with_cancel(&self, token: &CancellationToken) -> Result<()> {
        {
            let _write = self.inner.write_lock.lock();
            self.inner.flush_locked(token)?;
        }
        self.inner.auto_compact();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Row access
    // ------------------------------------------------------------------

    /// Number of live rows.
    pub fn row_count(&self) -> usize {
        let state = self.inner.state.read();
        state.total_rows().saturating_sub(state.deleted_rows()) as usize
    }

    /// Reads a row by handle, from a segment or the write buffer.
    pub fn read_row(&self, row_id: RowId) -> Result<Vec<Value>> {
        let view = self.inner.view();
        let (source, offset) = self.inner.resolve(&view, row_id)?;
        source.row(offset).ok_or_else(|| Error::RowNotFound(row_id.to_string()))
    }

    /// Value of `column` in the live row at logical position `row`.
    pub fn get_value(&self, row: usize, column: &str) -> Result<Value> {
        let (view, row_id) = self.inner.row_at(row)?;
        self.value_in(&view, row_id, column)
    }

    /// Value of `column` in the row `row_id`.
    pub fn get_value_by_id(&self, row_id: RowId, column: &str) -> Result<Value> {
        let view = self.inner.view();
        self.value_in(&view, row_id, column)
    }

    fn value_in(&self, view: &store::ReadView, row_id: RowId, column: &str) -> Result<Value> {
        let column = view.schema.require(column)?;
        let (source, offset) = self.inner.resolve(view, row_id)?;
        Ok(source.value(offset, column).cloned().unwrap_or_default())
    }

    /// Handle of the live row at logical position `row`.
    pub fn row_id_at(&self, row: usize) -> Result<RowId> {
        self.inner.row_at(row).map(|(_, row_id)| row_id)
    }

    /// Replaces the live row at logical position `row`; it keeps its position.
    pub fn update_row(&self, row: usize, values: Vec<Value>) -> Result<RowId> {
        let _write = self.inner.write_lock.lock();
        let (_, row_id) = self.inner.row_at(row)?;
        self.inner.update_by_id_locked(row_id, values)
    }

    /// Deletes the live row at logical position `row`.
    pub fn remove_row(&self, row: usize) -> Result<()> {
        let _write = self.inner.write_lock.lock();
        let (_, row_id) = self.inner.row_at(row)?;
        self.inner.delete_by_id_locked(row_id)
    }

    /// All live rows, in logical order.
    pub fn to_batch(&self) -> Result<RowBatch> {
        self.inner.scan(&RowFilter::default(), None)
    }

    /// A cursor over the live rows, limited to `columns` (every column when empty).
    pub fn row_cursor(&self, columns: &[&str]) -> Result<RowCursor> {
        self.to_batch()?.cursor(columns)
    }

    // ------------------------------------------------------------------
    // Primary key operations
    // ------------------------------------------------------------------

    /// Current handle of the row with primary key `key`.
    ///
    /// The index is built on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no primary key is configured.
    pub fn find_row_id(&self, key: impl Into<Value>) -> Result<Option<RowId>> {
        self.inner.view().require_key()?;
        self.inner.index()?.lookup(&key.into())
    }

    /// Replaces the row with primary key `key`. The old version is tombstoned and
    /// the new one keeps its logical position.
    pub fn update_row_by_key(&self, key: impl Into<Value>, values: Vec<Value>) -> Result<RowId> {
        self.update_rows(vec![(key.into(), values)])?
            .pop()
            .ok_or_else(|| Error::internal("update produced no row"))
    }

    /// Replaces the row `row_id`.
    pub fn update_row_by_id(&self, row_id: RowId, values: Vec<Value>) -> Result<RowId> {
        let _write = self.inner.write_lock.lock();
        self.inner.update_by_id_locked(row_id, values)
    }

    /// Deletes the row with primary key `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyNotFound` if no live row has that key.
    pub fn delete_row_by_key(&self, key: impl Into<Value>) -> Result<()> {
        self.delete_rows(&[key.into()]).map(|_| ())
    }

    /// Deletes the row `row_id`.
    pub fn delete_row_by_id(&self, row_id: RowId) -> Result<()> {
        let _write = self.inner.write_lock.lock();
        self.inner.delete_by_id_locked(row_id)
    }

    /// Returns true if `row_id` has been deleted or replaced.
    pub fn is_row_deleted(&self, row_id: RowId) -> Result<bool> {
        let view = self.inner.view();
        self.inner.is_deleted(&view, row_id)
    }

    /// Replaces several rows by key as one unit.
    ///
    /// Every update is validated first; if any key is missing or any row is
    /// invalid, nothing changes.
    pub fn update_rows(&self, updates: Vec<(Value, Vec<Value>)>) -> Result<Vec<RowId>> {
        let _write = self.inner.write_lock.lock();
        self.inner.update_by_keys_locked(updates)
    }

    /// Deletes several rows by key as one unit. Returns the number deleted.
    pub fn delete_rows(&self, keys: &[Value]) -> Result<usize> {
        let _write = self.inner.write_lock.lock();
        self.inner.delete_by_keys_locked(keys)
    }

    /// Index summary. Does not build the index.
    pub fn primary_key_index_stats(&self) -> IndexStats {
        let state = self.inner.state.read();
        IndexStats {
            indexed_keys: state.index.len(),
            built: state.index.is_built(),
            segments: state.segments.len(),
            unreadable_segments: state.index.unindexed_segments().count(),
        }
    }

    // ------------------------------------------------------------------
    // Compaction
    // ------------------------------------------------------------------

    /// Rewrites segments picked by `strategy`, dropping deleted rows.
    ///
    /// Row handles issued before the compaction become stale.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConcurrentCompaction` if another compaction is running. A
    /// failed compaction leaves the committed state unchanged.
    pub fn compact(&self, strategy: CompactionStrategy) -> Result<CompactionReport> {
        self.compact_with_cancel(strategy, &CancellationToken::new())
    }

    /// [`compact`](Self::compact) observing a cancellation token.
    pub fn compact_with_cancel(&self, strategy: CompactionStrategy, token: &CancellationToken) -> Result<CompactionReport> {
        self.inner.compact(strategy, token)
    }

    /// Returns true when the configured compaction trigger holds.
    pub fn can_compact(&self) -> bool {
        self.inner.state.read().can_compact()
    }

    /// Changes the compaction policy. `threshold` is a segment count for
    /// `SegmentCount` and a percentage for `DeletedRowPercentage`.
    ///
    /// The change is persisted with the next flush.
    pub fn configure_auto_compaction(&self, enabled: bool, trigger: CompactionTrigger, threshold: f64) -> Result<()> {
        let mut state = self.inner.state.write();
        let mut options = state.options.clone();
        options.auto_compaction_enabled = enabled;
        options.apply_trigger(trigger, threshold);
        options.validate()?;
        state.options = options;
        state.dirty = true;
        Ok(())
    }

    /// Starts or stops the background compaction thread.
    ///
    /// While running, the thread wakes every `background_compaction_interval` and
    /// runs a Standard compaction if the trigger holds. Stopping lets a cycle that
    /// is already running finish.
    pub fn enable_background_compaction(&self, enabled: bool) -> Result<()> {
        let mut slot = self.inner.background.lock();
        if !enabled {
            if let Some(compactor) = slot.take() {
                compactor.stop();
            }
            return Ok(());
        }
        if slot.as_ref().is_some_and(BackgroundCompactor::is_running) {
            return Ok(());
        }
        let interval = self.inner.state.read().options.background_compaction_interval;
        let store = Arc::downgrade(&self.inner);
        *slot = Some(BackgroundCompactor::start(interval, move || match store.upgrade() {
            Some(inner) => {
                inner.background_cycle();
                true
            }
            None => false,
        })?);
        Ok(())
    }

    /// Returns true while the background compaction thread runs.
    pub fn is_background_compaction_running(&self) -> bool {
        self.inner.background.lock().as_ref().is_some_and(BackgroundCompactor::is_running)
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Row and file statistics.
    pub fn storage_stats(&self) -> StorageStats {
        let state = self.inner.state.read();
        let total_rows = state.total_rows();
        let deleted_rows = state.deleted_rows();
        let segment_bytes: u64 = state.segments.values().map(|s| s.byte_len).sum();
        StorageStats {
            total_rows,
            active_rows: total_rows.saturating_sub(deleted_rows),
            deleted_rows,
            deleted_percentage: state.deleted_percentage(),
            storage_files: state.segments.len(),
            estimated_size_bytes: segment_bytes + state.buffered_bytes() as u64,
            can_compact: state.can_compact(),
        }
    }

    /// Schema summary with per-column null counts.
    pub fn info(&self) -> Result<BlockInfo> {
        let batch = self.to_batch()?;
        let columns = batch
            .schema()
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| ColumnInfo {
                name: column.name.clone(),
                data_type: column.data_type,
                nullable: column.nullable,
                null_count: batch.column_at(i).map_or(0, |cells| cells.iter().filter(|v| v.is_null()).count()),
            })
            .collect();
        let state = self.inner.state.read();
        Ok(BlockInfo {
            path: self.inner.dir.clone(),
            row_count: batch.row_count(),
            primary_key: state.options.primary_key_column.clone(),
            segments: state.segments.len(),
            columns,
        })
    }

    /// Checks an expression's syntax and column references against the schema.
    pub fn validate_expression(&self, expression: &str) -> ExpressionCheck {
        query::validate_expression(expression, &self.inner.state.read().schema)
    }
}

/// Deferred queries over the store. Each call starts a new [`QueryPlan`]; nothing
/// is read until [`QueryPlan::execute`].
impl VelocityBlock {
    /// An empty plan reading every live row.
    pub fn query(&self) -> QueryPlan {
        QueryPlan::new(Arc::new(self.clone()))
    }

    /// Runs the empty plan: every live row, in logical order.
    pub fn execute(&self) -> Result<RowBatch> {
        self.query().execute()
    }

    /// See [`QueryPlan::filter`].
    pub fn filter(&self, predicate: Predicate) -> QueryPlan {
        self.query().filter(predicate)
    }

    /// See [`QueryPlan::where_eq`].
    pub fn where_eq(&self, column: &str, value: impl Into<Value>) -> QueryPlan {
        self.query().where_eq(column, value)
    }

    /// See [`QueryPlan::where_cmp`].
    pub fn where_cmp(&self, column: &str, value: impl Into<Value>, op: ComparisonOperator) -> QueryPlan {
        self.query().where_cmp(column, value, op)
    }

    /// See [`QueryPlan::where_contains`].
    pub fn where_contains(&self, column: &str, pattern: &str) -> QueryPlan {
        self.query().where_contains(column, pattern)
    }

    /// See [`QueryPlan::where_starts_with`].
    pub fn where_starts_with(&self, column: &str, pattern: &str) -> QueryPlan {
        self.query().where_starts_with(column, pattern)
    }

    /// See [`QueryPlan::where_ends_with`].
    pub fn where_ends_with(&self, column: &str, pattern: &str) -> QueryPlan {
        self.query().where_ends_with(column, pattern)
    }

    /// See [`QueryPlan::where_expr`].
    pub fn where_expr(&self, expression: &str) -> QueryPlan {
        self.query().where_expr(expression)
    }

    /// See [`QueryPlan::select`].
    pub fn select(&self, columns: &[&str]) -> QueryPlan {
        self.query().select(columns)
    }

    /// See [`QueryPlan::sort`].
    pub fn sort(&self, direction: SortDirection, columns: &[&str]) -> QueryPlan {
        self.query().sort(direction, columns)
    }

    /// See [`QueryPlan::head`].
    pub fn head(&self, n: usize) -> QueryPlan {
        self.query().head(n)
    }

    /// See [`QueryPlan::tail`].
    pub fn tail(&self, n: usize) -> QueryPlan {
        self.query().tail(n)
    }

    /// See [`QueryPlan::sample`].
    pub fn sample(&self, n: usize, seed: Option<u64>) -> QueryPlan {
        self.query().sample(n, seed)
    }

    /// See [`QueryPlan::group_by_aggregate`].
    pub fn group_by_aggregate(
        &self,
        group_columns: &[&str],
        value_column: &str,
        aggregation: Aggregation,
        result_name: &str,
    ) -> QueryPlan {
        self.query().group_by_aggregate(group_columns, value_column, aggregation, result_name)
    }

    /// See [`QueryPlan::group_by_aggregations`].
    pub fn group_by_aggregations(&self, group_columns: &[&str], aggregations: &[(&str, Aggregation)]) -> QueryPlan {
        self.query().group_by_aggregations(group_columns, aggregations)
    }

    /// See [`QueryPlan::pivot`].
    pub fn pivot(
        &self,
        index_columns: &[&str],
        pivot_column: &str,
        value_column: &str,
        aggregation: Aggregation,
    ) -> QueryPlan {
        self.query().pivot(index_columns, pivot_column, value_column, aggregation)
    }

    /// See [`QueryPlan::window`].
    pub fn window(
        &self,
        column: &str,
        function: WindowFunction,
        window_size: Option<usize>,
        result_column: &str,
    ) -> QueryPlan {
        self.query().window(column, function, window_size, result_column)
    }

    /// See [`QueryPlan::window_spec`].
    pub fn window_spec(&self, spec: WindowSpec) -> QueryPlan {
        self.query().window_spec(spec)
    }

    /// See [`QueryPlan::compute`].
    pub fn compute(&self, name: &str, expression: &str) -> QueryPlan {
        self.query().compute(name, expression)
    }

    /// See [`QueryPlan::drop_nulls`].
    pub fn drop_nulls(&self, mode: DropNullMode, columns: &[&str]) -> QueryPlan {
        self.query().drop_nulls(mode, columns)
    }

    /// See [`QueryPlan::drop_duplicates`].
    pub fn drop_duplicates(&self, keep: KeepDuplicateMode, columns: &[&str]) -> QueryPlan {
        self.query().drop_duplicates(keep, columns)
    }

    /// See [`QueryPlan::fill_nulls`].
    pub fn fill_nulls(&self, method: FillMethod, columns: &[&str]) -> QueryPlan {
        self.query().fill_nulls(method, columns)
    }

    /// See [`QueryPlan::merge`].
    pub fn merge(&self, other: &RowBatch, left_key: &str, right_key: &str, mode: MergeMode) -> QueryPlan {
        self.query().merge(other, left_key, right_key, mode)
    }

    /// See [`QueryPlan::melt`].
    pub fn melt(&self, fixed_columns: &[&str], name_column: &str, value_column: &str) -> QueryPlan {
        self.query().melt(fixed_columns, name_column, value_column)
    }
}

impl TableSource for VelocityBlock {
    fn schema(&self) -> Schema {
        VelocityBlock::schema(self)
    }

    fn scan(&self, filter: &RowFilter, columns: Option<&[usize]>) -> Result<RowBatch> {
        self.inner.scan(filter, columns)
    }

    fn lookup(&self, column: &str, key: &Value) -> Result<Option<RowBatch>> {
        self.inner.lookup(column, key)
    }
}

impl BatchSink for VelocityBlock {
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        self.append_batch(batch)
    }
}

/// Same column names and types, in order. Nullability is checked per row.
fn same_shape(store: &Schema, batch: &Schema) -> bool {
    store.len() == batch.len()
        && store
            .columns()
            .iter()
            .zip(batch.columns())
            .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
}
