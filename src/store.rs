//! Shared store internals behind [`crate::VelocityBlock`].
//!
//! Lock order is always `write_lock` then `state`. `write_lock` serializes every
//! mutation (appends, updates, deletes, flush, the compaction commit) and may be
//! held across I/O. `state` is only ever held for short, non-blocking sections;
//! readers clone the `Arc`s they need out of it and work on that snapshot.

use crate::batch::RowBatch;
use crate::cancel::CancellationToken;
use crate::compaction::{
    BackgroundCompactor, CompactionInput, CompactionJob, CompactionPicker, CompactionReport, SegmentStats,
};
use crate::config::{CompactionStrategy, CompactionTrigger, VelocityOptions};
use crate::error::{Error, Result};
use crate::index::PrimaryKeyIndex;
use crate::manifest::{Manifest, MANIFEST_FORMAT_VERSION};
use crate::query::predicate::{RowFilter, RowView};
use crate::rowid::RowId;
use crate::schema::Schema;
use crate::segment::{segment_file_name, SegmentCache, SegmentData, SegmentMeta, WriteBuffer};
use crate::tombstone::TombstoneTracker;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Times a read retakes its snapshot after losing a segment to compaction.
const SNAPSHOT_RETRIES: usize = 3;

/// Live rows in logical order: `(ordinal, handle)`, ascending by ordinal.
pub(crate) type RowOrder = Vec<(u64, RowId)>;

/// Mutable store state, guarded by `StoreInner::state`.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub schema: Schema,
    pub options: VelocityOptions,
    /// Sealed segments by id.
    pub segments: BTreeMap<u64, SegmentMeta>,
    /// Frozen buffers whose segment file is being written.
    pub sealing: Vec<Arc<WriteBuffer>>,
    /// Open write buffer (copy-on-write against reader snapshots).
    pub buffer: Arc<WriteBuffer>,
    pub tombstones: Arc<TombstoneTracker>,
    pub index: Arc<PrimaryKeyIndex>,
    /// Cached logical order, dropped by compaction and rebuilt on demand.
    pub row_order: Option<Arc<RowOrder>>,
    pub generation: u64,
    pub next_ordinal: u64,
    /// Version of the last committed manifest.
    pub manifest_version: u64,
    /// Bumped by every row mutation.
    pub mutation_seq: u64,
    /// Changes not yet in the committed manifest.
    pub dirty: bool,
}

impl StoreState {
    pub(crate) fn from_manifest(manifest: &Manifest, buffer_id: u64, index: PrimaryKeyIndex) -> Self {
        Self {
            schema: manifest.schema.clone(),
            options: manifest.options.clone(),
            segments: manifest.segments.iter().map(|s| (s.id, s.clone())).collect(),
            sealing: Vec::new(),
            buffer: Arc::new(WriteBuffer::new(buffer_id)),
            tombstones: Arc::new(TombstoneTracker::from_manifest(&manifest.tombstones)),
            index: Arc::new(index),
            row_order: None,
            generation: manifest.generation,
            next_ordinal: manifest.next_ordinal,
            manifest_version: manifest.version,
            mutation_seq: 0,
            dirty: false,
        }
    }

    /// Physical rows, live or tombstoned.
    pub(crate) fn total_rows(&self) -> u64 {
        let sealed: u64 = self.segments.values().map(|s| u64::from(s.row_count)).sum();
        let buffered: usize = self.sealing.iter().map(|b| b.len()).sum::<usize>() + self.buffer.len();
        sealed + buffered as u64
    }

    pub(crate) fn deleted_rows(&self) -> u64 {
        self.tombstones.total()
    }

    pub(crate) fn deleted_percentage(&self) -> f64 {
        let total = self.total_rows();
        if total == 0 {
            0.0
        } else {
            self.deleted_rows() as f64 * 100.0 / total as f64
        }
    }

    /// Only the configured trigger is consulted.
    pub(crate) fn can_compact(&self) -> bool {
        match self.options.auto_compaction_trigger {
            CompactionTrigger::DeletedRowPercentage => {
                self.deleted_rows() > 0
                    && self.deleted_percentage() >= self.options.deleted_percentage_threshold
            }
            CompactionTrigger::SegmentCount => {
                self.segments.len() >= 2
                    && self.segments.len() >= self.options.max_segments_before_compaction
            }
        }
    }

    pub(crate) fn buffered_bytes(&self) -> usize {
        self.sealing.iter().map(|b| b.approximate_size()).sum::<usize>() + self.buffer.approximate_size()
    }

    pub(crate) fn view(&self) -> ReadView {
        let mut buffers: Vec<Arc<WriteBuffer>> = self.sealing.clone();
        buffers.push(Arc::clone(&self.buffer));
        ReadView {
            schema: self.schema.clone(),
            primary_key: self.options.primary_key_column.clone(),
            segments: self.segments.values().cloned().collect(),
            buffers,
            tombstones: Arc::clone(&self.tombstones),
            row_order: self.row_order.clone(),
            generation: self.generation,
            mutation_seq: self.mutation_seq,
        }
    }
}

/// A consistent snapshot of everything a reader needs.
#[derive(Debug, Clone)]
pub(crate) struct ReadView {
    pub schema: Schema,
    pub primary_key: Option<String>,
    pub segments: Vec<SegmentMeta>,
    pub buffers: Vec<Arc<WriteBuffer>>,
    pub tombstones: Arc<TombstoneTracker>,
    pub row_order: Option<Arc<RowOrder>>,
    pub generation: u64,
    pub mutation_seq: u64,
}

impl ReadView {
    /// Position of the primary key column; `None` when no key is configured.
    pub(crate) fn key_position(&self) -> Result<Option<usize>> {
        match &self.primary_key {
            None => Ok(None),
            Some(name) => self.schema.index_of(name).map(Some).ok_or_else(|| {
                Error::configuration(format!("primary key column '{}' is not in the schema", name))
            }),
        }
    }

    pub(crate) fn require_key(&self) -> Result<usize> {
        self.key_position()?
            .ok_or_else(|| Error::configuration("no primary key column is configured"))
    }

    pub(crate) fn check_generation(&self, row_id: RowId) -> Result<()> {
        if row_id.generation != self.generation {
            return Err(Error::StaleRowId(format!(
                "{} was issued before compaction (current generation {})",
                row_id, self.generation
            )));
        }
        Ok(())
    }
}

/// Rows of one segment, sealed or still buffered.
#[derive(Debug, Clone)]
pub(crate) enum RowSource {
    Sealed(Arc<SegmentData>),
    Open(Arc<WriteBuffer>),
}

impl RowSource {
    pub(crate) fn len(&self) -> usize {
        match self {
            RowSource::Sealed(data) => data.row_count(),
            RowSource::Open(buffer) => buffer.len(),
        }
    }

    pub(crate) fn ordinals(&self) -> &[u64] {
        match self {
            RowSource::Sealed(data) => data.ordinals(),
            RowSource::Open(buffer) => buffer.ordinals(),
        }
    }

    pub(crate) fn value(&self, offset: u32, column: usize) -> Option<&Value> {
        match self {
            RowSource::Sealed(data) => data.value(offset as usize, column),
            RowSource::Open(buffer) => buffer.row(offset).and_then(|row| row.get(column)),
        }
    }

    pub(crate) fn row(&self, offset: u32) -> Option<Vec<Value>> {
        match self {
            RowSource::Sealed(data) => data.row(offset as usize),
            RowSource::Open(buffer) => buffer.row(offset).map(<[Value]>::to_vec),
        }
    }
}

/// A segment of a view whose file could not be decoded.
#[derive(Debug, Clone)]
pub(crate) struct Unreadable {
    pub segment_id: u64,
    pub min_ordinal: u64,
    pub reason: String,
}

impl Unreadable {
    pub(crate) fn error(&self) -> Error {
        Error::corrupt_segment(self.segment_id, self.reason.clone())
    }
}

/// The rows of a view by segment id. Segments that fail to decode are set aside,
/// so reads that never touch them still succeed.
#[derive(Debug, Default)]
pub(crate) struct Sources {
    pub loaded: HashMap<u64, RowSource>,
    pub unreadable: Vec<Unreadable>,
}

impl Sources {
    pub(crate) fn get(&self, segment_id: u64) -> Option<&RowSource> {
        self.loaded.get(&segment_id)
    }

    /// Fails with the first unreadable segment.
    pub(crate) fn require_all(&self) -> Result<()> {
        match self.unreadable.first() {
            Some(unreadable) => Err(unreadable.error()),
            None => Ok(()),
        }
    }

    /// The unreadable segment with the smallest ordinals. Live rows ordered before
    /// its first ordinal keep exact logical positions.
    pub(crate) fn horizon(&self) -> Option<&Unreadable> {
        self.unreadable.iter().min_by_key(|u| u.min_ordinal)
    }
}

/// One row of a [`RowSource`], evaluated in place by filters.
pub(crate) struct SourceRow<'a> {
    pub source: &'a RowSource,
    pub offset: u32,
}

impl RowView for SourceRow<'_> {
    fn cell(&self, column: usize) -> &Value {
        self.source.value(self.offset, column).unwrap_or(&Value::Null)
    }
}

/// A row change, fully validated before any of a batch is applied.
#[derive(Debug)]
pub(crate) enum Mutation {
    Append { row: Vec<Value>, key: Option<Value> },
    Replace { old: RowId, ordinal: u64, row: Vec<Value>, old_key: Option<Value>, new_key: Option<Value> },
    Delete { old: RowId, ordinal: u64, key: Option<Value> },
}

/// Resets the single-flight flag when the compaction ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ConcurrentCompaction)?;
        Ok(Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State shared by every clone of a store handle.
#[derive(Debug)]
pub(crate) struct StoreInner {
    pub dir: PathBuf,
    pub write_lock: Mutex<()>,
    pub state: RwLock<StoreState>,
    pub next_segment_id: AtomicU64,
    pub cache: Arc<SegmentCache>,
    pub compacting: AtomicBool,
    pub background: Mutex<Option<BackgroundCompactor>>,
}

impl StoreInner {
    pub(crate) fn new(dir: PathBuf, manifest: &Manifest, index: PrimaryKeyIndex) -> Self {
        let next_segment_id = AtomicU64::new(manifest.next_segment_id);
        let buffer_id = next_segment_id.fetch_add(1, Ordering::SeqCst);
        Self {
            cache: Arc::new(SegmentCache::new(manifest.options.segment_cache_size)),
            state: RwLock::new(StoreState::from_manifest(manifest, buffer_id, index)),
            write_lock: Mutex::new(()),
            next_segment_id,
            compacting: AtomicBool::new(false),
            background: Mutex::new(None),
            dir,
        }
    }

    pub(crate) fn allocate_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn view(&self) -> ReadView {
        self.state.read().view()
    }

    fn segment_path(&self, id: u64) -> PathBuf {
        self.dir.join(segment_file_name(id))
    }

    pub(crate) fn load_segment(&self, id: u64) -> Result<Arc<SegmentData>> {
        let path = self.segment_path(id);
        self.cache.get_or_load(id, || SegmentData::read(&path, id))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Every segment of the view, loaded where it decodes.
    pub(crate) fn sources(&self, view: &ReadView) -> Result<Sources> {
        let mut sources = Sources {
            loaded: HashMap::with_capacity(view.segments.len() + view.buffers.len()),
            unreadable: Vec::new(),
        };
        for meta in &view.segments {
            match self.load_segment(meta.id) {
                Ok(data) => {
                    sources.loaded.insert(meta.id, RowSource::Sealed(data));
                }
                Err(Error::CorruptSegment { reason, .. }) => {
                    log::debug!("Segment {} is unreadable: {}", meta.id, reason);
                    sources.unreadable.push(Unreadable { segment_id: meta.id, min_ordinal: meta.min_ordinal, reason });
                }
                Err(e) => return Err(e),
            }
        }
        for buffer in &view.buffers {
            sources.loaded.insert(buffer.segment_id(), RowSource::Open(Arc::clone(buffer)));
        }
        Ok(sources)
    }

    fn source_of(&self, view: &ReadView, segment_id: u64) -> Result<Option<RowSource>> {
        if let Some(buffer) = view.buffers.iter().find(|b| b.segment_id() == segment_id) {
            return Ok(Some(RowSource::Open(Arc::clone(buffer))));
        }
        if !view.segments.iter().any(|s| s.id == segment_id) {
            return Ok(None);
        }
        match self.load_segment(segment_id) {
            Ok(data) => Ok(Some(RowSource::Sealed(data))),
            // A compaction committed and removed the file after the view was taken.
            Err(Error::CorruptSegment { .. }) if !self.state.read().segments.contains_key(&segment_id) => {
                Err(Error::StaleRowId(format!("segment {} was compacted away during the read", segment_id)))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves a live row handle to its segment and offset.
    pub(crate) fn resolve(&self, view: &ReadView, row_id: RowId) -> Result<(RowSource, u32)> {
        view.check_generation(row_id)?;
        if view.tombstones.is_deleted(row_id.segment_id, row_id.offset) {
            return Err(Error::RowNotFound(format!("{} is deleted", row_id)));
        }
        match self.source_of(view, row_id.segment_id)? {
            Some(source) if (row_id.offset as usize) < source.len() => Ok((source, row_id.offset)),
            _ => Err(Error::RowNotFound(row_id.to_string())),
        }
    }

    pub(crate) fn is_deleted(&self, view: &ReadView, row_id: RowId) -> Result<bool> {
        view.check_generation(row_id)?;
        if view.tombstones.is_deleted(row_id.segment_id, row_id.offset) {
            return Ok(true);
        }
        match self.source_of(view, row_id.segment_id)? {
            Some(source) if (row_id.offset as usize) < source.len() => Ok(false),
            _ => Err(Error::RowNotFound(row_id.to_string())),
        }
    }

    /// A view with its segments loaded.
    ///
    /// A compaction may delete a segment file between taking the view and loading
    /// it; the snapshot is then retaken against the new segment set.
    pub(crate) fn snapshot(&self) -> Result<(ReadView, Sources)> {
        let mut retries = 0;
        loop {
            let view = self.view();
            let sources = self.sources(&view)?;
            let vanished = {
                let state = self.state.read();
                sources.unreadable.iter().find(|u| !state.segments.contains_key(&u.segment_id)).map(|u| u.segment_id)
            };
            match vanished {
                Some(segment_id) if retries < SNAPSHOT_RETRIES => {
                    log::debug!("Segment {} was compacted away during a read, retaking snapshot", segment_id);
                    retries += 1;
                }
                _ => return Ok((view, sources)),
            }
        }
    }

    /// Logical order of the live rows of `view` held by readable segments. Cached in
    /// the state when complete and still current.
    pub(crate) fn order(&self, view: &ReadView, sources: &Sources) -> Arc<RowOrder> {
        if let Some(order) = &view.row_order {
            return Arc::clone(order);
        }
        let mut order: RowOrder = Vec::new();
        for (segment_id, source) in &sources.loaded {
            for (offset, ordinal) in source.ordinals().iter().enumerate() {
                let offset = offset as u32;
                if !view.tombstones.is_deleted(*segment_id, offset) {
                    order.push((*ordinal, RowId::new(*segment_id, offset, view.generation)));
                }
            }
        }
        order.sort_unstable_by_key(|(ordinal, _)| *ordinal);
        let order = Arc::new(order);

        if sources.unreadable.is_empty() {
            let mut state = self.state.write();
            if state.mutation_seq == view.mutation_seq && state.generation == view.generation {
                state.row_order = Some(Arc::clone(&order));
            }
        }
        order
    }

    /// A view together with its logical order, and the unreadable segment past
    /// which positions are unknown.
    pub(crate) fn ordered_view(&self) -> Result<(ReadView, Arc<RowOrder>, Option<Unreadable>)> {
        let view = self.view();
        if let Some(order) = view.row_order.clone() {
            return Ok((view, order, None));
        }
        let (view, sources) = self.snapshot()?;
        let order = self.order(&view, &sources);
        let horizon = sources.horizon().cloned();
        Ok((view, order, horizon))
    }

    /// Handle of the live row at logical position `row`, with the view it belongs to.
    pub(crate) fn row_at(&self, row: usize) -> Result<(ReadView, RowId)> {
        let (view, order, horizon) = self.ordered_view()?;
        match (order.get(row), horizon) {
            (Some(&(_, row_id)), None) => Ok((view, row_id)),
            (Some(&(ordinal, row_id)), Some(horizon)) if ordinal < horizon.min_ordinal => Ok((view, row_id)),
            (_, Some(horizon)) => Err(horizon.error()),
            (None, None) => Err(Error::RowNotFound(format!("row {} is out of range ({} rows)", row, order.len()))),
        }
    }

    fn ordinal_of(&self, view: &ReadView, row_id: RowId) -> Result<u64> {
        let (source, offset) = self.resolve(view, row_id)?;
        source
            .ordinals()
            .get(offset as usize)
            .copied()
            .ok_or_else(|| Error::RowNotFound(row_id.to_string()))
    }

    /// Reads the live rows passing `filter` in logical order.
    pub(crate) fn scan(&self, filter: &RowFilter, columns: Option<&[usize]>) -> Result<RowBatch> {
        let (view, sources) = self.snapshot()?;
        sources.require_all()?;
        let order = self.order(&view, &sources);
        let keep: Vec<usize> = match columns {
            Some(columns) => columns.to_vec(),
            None => (0..view.schema.len()).collect(),
        };

        let mut out: Vec<Vec<Value>> = vec![Vec::new(); keep.len()];
        let mut rows = 0;
        for (_, row_id) in order.iter() {
            let source = sources
                .get(row_id.segment_id)
                .ok_or_else(|| Error::internal(format!("row {} has no segment", row_id)))?;
            let row = SourceRow { source, offset: row_id.offset };
            if !filter.matches(&row)? {
                continue;
            }
            for (slot, &column) in keep.iter().enumerate() {
                out[slot].push(row.cell(column).clone());
            }
            rows += 1;
        }

        let defs = keep
            .iter()
            .map(|&c| {
                view.schema
                    .column(c)
                    .cloned()
                    .ok_or_else(|| Error::internal(format!("column {} out of range", c)))
            })
            .collect::<Result<Vec<_>>>()?;
        let schema = Schema::from_columns(defs)?;
        Ok(RowBatch::from_parts(schema, out.into_iter().map(Arc::new).collect(), rows))
    }

    /// Point lookup through the primary key index; `None` for other columns.
    pub(crate) fn lookup(&self, column: &str, key: &Value) -> Result<Option<RowBatch>> {
        let keyed = self.state.read().options.primary_key_column.as_deref() == Some(column);
        if !keyed {
            return Ok(None);
        }
        self.index()?;
        let (view, index) = {
            let state = self.state.read();
            (state.view(), Arc::clone(&state.index))
        };
        let mut batch = RowBatch::new(view.schema.clone());
        if let Some(row_id) = index.lookup(key)? {
            let (source, offset) = self.resolve(&view, row_id)?;
            if let Some(row) = source.row(offset) {
                batch.push_row(row)?;
            }
        }
        Ok(Some(batch))
    }

    // ------------------------------------------------------------------
    // Primary key index
    // ------------------------------------------------------------------

    /// The built index, building it first if needed.
    pub(crate) fn index(&self) -> Result<Arc<PrimaryKeyIndex>> {
        {
            let state = self.state.read();
            if state.index.is_built() {
                return Ok(Arc::clone(&state.index));
            }
        }
        let _write = self.write_lock.lock();
        self.ensure_index_locked()
    }

    /// Builds the index if needed. Caller holds `write_lock`.
    ///
    /// Keys of unreadable segments are left out; the index then fails lookups of
    /// keys it does not hold instead of reporting them absent.
    pub(crate) fn ensure_index_locked(&self) -> Result<Arc<PrimaryKeyIndex>> {
        let view = {
            let state = self.state.read();
            if state.index.is_built() {
                return Ok(Arc::clone(&state.index));
            }
            state.view()
        };
        let pk = view.require_key()?;

        let sources = self.sources(&view)?;
        let order = self.order(&view, &sources);
        let mut map: HashMap<Value, RowId> = HashMap::with_capacity(order.len());
        for (_, row_id) in order.iter() {
            let key = sources
                .get(row_id.segment_id)
                .and_then(|s| s.value(row_id.offset, pk))
                .cloned()
                .unwrap_or_default();
            if key.is_null() {
                continue;
            }
            if let Some(previous) = map.insert(key.clone(), *row_id) {
                log::warn!("Primary key {} is live at both {} and {}", key, previous, row_id);
            }
        }
        let unindexed: BTreeSet<u64> = sources.unreadable.iter().map(|u| u.segment_id).collect();
        if unindexed.is_empty() {
            log::info!("Built primary key index: {} keys", map.len());
        } else {
            log::warn!("Built primary key index: {} keys, unreadable segments {:?} left out", map.len(), unindexed);
        }

        let index = Arc::new(PrimaryKeyIndex::from_partial(map, unindexed));
        self.state.write().index = Arc::clone(&index);
        Ok(index)
    }

    // ------------------------------------------------------------------
    // Mutations (caller holds `write_lock`)
    // ------------------------------------------------------------------

    pub(crate) fn append_locked(&self, rows: Vec<Vec<Value>>) -> Result<Vec<RowId>> {
        // Step 1: Validate every row against the schema
        let view = self.view();
        if view.schema.is_empty() {
            return Err(Error::schema_mismatch("the store has no columns"));
        }
        let rows = rows.iter().map(|r| view.schema.validate_row(r)).collect::<Result<Vec<_>>>()?;

        // Step 2: Check keys against the index and each other
        let mut mutations = Vec::with_capacity(rows.len());
        match view.key_position()? {
            Some(pk) => {
                let index = self.ensure_index_locked()?;
                let mut seen = HashSet::with_capacity(rows.len());
                for row in rows {
                    let key = checked_key(&row, pk, &view)?;
                    if index.lookup(&key)?.is_some() || !seen.insert(key.clone()) {
                        return Err(Error::DuplicateKey(key.to_string()));
                    }
                    mutations.push(Mutation::Append { row, key: Some(key) });
                }
            }
            None => mutations.extend(rows.into_iter().map(|row| Mutation::Append { row, key: None })),
        }
        drop(view);

        // Step 3: Apply and seal a full buffer
        let ids = self.apply(mutations);
        self.seal_if_full()?;
        Ok(ids)
    }

    pub(crate) fn update_by_keys_locked(&self, updates: Vec<(Value, Vec<Value>)>) -> Result<Vec<RowId>> {
        let view = self.view();
        let pk = view.require_key()?;
        let index = self.ensure_index_locked()?;

        let mut touched = HashSet::with_capacity(updates.len());
        let mut claimed = HashSet::new();
        let mut mutations = Vec::with_capacity(updates.len());
        for (key, values) in updates {
            let row = view.schema.validate_row(&values)?;
            let old = index.lookup(&key)?.ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
            if !touched.insert(key.clone()) {
                return Err(Error::invalid_argument(format!("key {} is updated twice in one batch", key)));
            }
            let new_key = checked_key(&row, pk, &view)?;
            if new_key != key && (index.lookup(&new_key)?.is_some() || !claimed.insert(new_key.clone())) {
                return Err(Error::DuplicateKey(new_key.to_string()));
            }
            let ordinal = self.ordinal_of(&view, old)?;
            mutations.push(Mutation::Replace { old, ordinal, row, old_key: Some(key), new_key: Some(new_key) });
        }
        // Snapshots must be released so the state is updated in place.
        drop((view, index));
        let ids = self.apply(mutations);
        self.seal_if_full()?;
        Ok(ids)
    }

    pub(crate) fn update_by_id_locked(&self, row_id: RowId, values: Vec<Value>) -> Result<RowId> {
        let view = self.view();
        let (source, offset) = self.resolve(&view, row_id)?;
        let row = view.schema.validate_row(&values)?;
        let ordinal = self.ordinal_of(&view, row_id)?;

        let (old_key, new_key) = match view.key_position()? {
            Some(pk) => {
                let index = self.ensure_index_locked()?;
                let old_key = source.value(offset, pk).cloned().unwrap_or_default();
                let new_key = checked_key(&row, pk, &view)?;
                if new_key != old_key && index.lookup(&new_key)?.is_some() {
                    return Err(Error::DuplicateKey(new_key.to_string()));
                }
                (Some(old_key), Some(new_key))
            }
            None => (None, None),
        };
        drop((view, source));

        let ids = self.apply(vec![Mutation::Replace { old: row_id, ordinal, row, old_key, new_key }]);
        self.seal_if_full()?;
        ids.into_iter().next().ok_or_else(|| Error::internal("update produced no row"))
    }

    pub(crate) fn delete_by_keys_locked(&self, keys: &[Value]) -> Result<usize> {
        let view = self.view();
        view.require_key()?;
        let index = self.ensure_index_locked()?;

        let mut touched = HashSet::with_capacity(keys.len());
        let mut mutations = Vec::with_capacity(keys.len());
        for key in keys {
            let old = index.lookup(key)?.ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
            if !touched.insert(key) {
                return Err(Error::invalid_argument(format!("key {} is deleted twice in one batch", key)));
            }
            let ordinal = self.ordinal_of(&view, old)?;
            mutations.push(Mutation::Delete { old, ordinal, key: Some(key.clone()) });
        }
        drop((view, index));
        let count = mutations.len();
        self.apply(mutations);
        Ok(count)
    }

    pub(crate) fn delete_by_id_locked(&self, row_id: RowId) -> Result<()> {
        let view = self.view();
        let (source, offset) = self.resolve(&view, row_id)?;
        let ordinal = self.ordinal_of(&view, row_id)?;
        let key = match view.key_position()? {
            Some(pk) => source.value(offset, pk).cloned(),
            None => None,
        };
        drop((view, source));
        self.apply(vec![Mutation::Delete { old: row_id, ordinal, key }]);
        Ok(())
    }

    /// Applies validated mutations in one critical section.
    fn apply(&self, mutations: Vec<Mutation>) -> Vec<RowId> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let generation = state.generation;
        let buffer = Arc::make_mut(&mut state.buffer);
        let tombstones = Arc::make_mut(&mut state.tombstones);
        let index = Arc::make_mut(&mut state.index);
        let mut order = state.row_order.as_mut().map(Arc::make_mut);

        let mut ids = Vec::new();
        for mutation in mutations {
            match mutation {
                Mutation::Append { row, key } => {
                    let ordinal = state.next_ordinal;
                    state.next_ordinal += 1;
                    let row_id = RowId::new(buffer.segment_id(), buffer.push(ordinal, row), generation);
                    if let Some(key) = key {
                        index.upsert(key, row_id);
                    }
                    if let Some(order) = order.as_deref_mut() {
                        order.push((ordinal, row_id));
                    }
                    ids.push(row_id);
                }
                Mutation::Replace { old, ordinal, row, old_key, new_key } => {
                    tombstones.mark(old.segment_id, old.offset);
                    let row_id = RowId::new(buffer.segment_id(), buffer.push(ordinal, row), generation);
                    if let Some(key) = old_key {
                        index.remove_row(&key, old);
                    }
                    if let Some(key) = new_key {
                        index.upsert(key, row_id);
                    }
                    if let Some(order) = order.as_deref_mut() {
                        if let Ok(pos) = order.binary_search_by_key(&ordinal, |(o, _)| *o) {
                            order[pos].1 = row_id;
                        }
                    }
                    ids.push(row_id);
                }
                Mutation::Delete { old, ordinal, key } => {
                    tombstones.mark(old.segment_id, old.offset);
                    if let Some(key) = key {
                        index.remove_row(&key, old);
                    }
                    if let Some(order) = order.as_deref_mut() {
                        if let Ok(pos) = order.binary_search_by_key(&ordinal, |(o, _)| *o) {
                            order.remove(pos);
                        }
                    }
                }
            }
        }
        state.mutation_seq += 1;
        state.dirty = true;
        ids
    }

    // ------------------------------------------------------------------
    // Sealing and flush (caller holds `write_lock`)
    // ------------------------------------------------------------------

    fn seal_if_full(&self) -> Result<()> {
        let full = {
            let state = self.state.read();
            state.buffer.approximate_size() >= state.options.target_segment_size_bytes
        };
        if full {
            self.seal_buffer_locked()?;
        }
        Ok(())
    }

    /// Seals the open buffer into a segment file. The segment is visible in-process
    /// right away and becomes durable with the next manifest commit.
    pub(crate) fn seal_buffer_locked(&self) -> Result<Option<SegmentMeta>> {
        let (frozen, schema, codec, auto_compression) = {
            let mut state = self.state.write();
            if state.buffer.is_empty() {
                return Ok(None);
            }
            let fresh = Arc::new(WriteBuffer::new(self.allocate_segment_id()));
            let frozen = std::mem::replace(&mut state.buffer, fresh);
            state.sealing.push(Arc::clone(&frozen));
            (
                frozen,
                state.schema.clone(),
                state.options.default_compression,
                state.options.enable_auto_compression,
            )
        };
        log::info!("Write buffer frozen: segment {} ({} rows)", frozen.segment_id(), frozen.len());

        let sealed = frozen.seal(&self.dir, &schema, codec, auto_compression);
        let mut state = self.state.write();
        state.sealing.retain(|b| !Arc::ptr_eq(b, &frozen));
        match sealed {
            Ok(meta) => {
                log::info!(
                    "Sealed segment {}: {} rows, {} bytes ({:?})",
                    meta.id,
                    meta.row_count,
                    meta.byte_len,
                    meta.codec
                );
                state.segments.insert(meta.id, meta.clone());
                state.dirty = true;
                Ok(Some(meta))
            }
            Err(e) => {
                // No writer ran meanwhile, so the fresh buffer is still empty.
                state.buffer = frozen;
                Err(e)
            }
        }
    }

    /// Manifest describing `state`. Rows still buffered are not part of it.
    pub(crate) fn manifest_for(&self, state: &StoreState, version: u64, with_checkpoint: bool) -> Manifest {
        let tombstones: BTreeMap<u64, Vec<u32>> = state
            .tombstones
            .to_manifest()
            .into_iter()
            .filter(|(id, _)| state.segments.contains_key(id))
            .collect();
        let index_checkpoint = with_checkpoint
            && state.index.is_complete()
            && state.buffer.is_empty()
            && state.sealing.is_empty();
        Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            version,
            schema: state.schema.clone(),
            options: state.options.clone(),
            generation: state.generation,
            next_segment_id: self.next_segment_id.load(Ordering::SeqCst),
            next_ordinal: state.next_ordinal,
            segments: state.segments.values().cloned().collect(),
            tombstones,
            index_checkpoint,
        }
    }

    /// Seals the buffer and commits the manifest. Returns false when nothing changed.
    pub(crate) fn flush_locked(&self, token: &CancellationToken) -> Result<bool> {
        // Step 1: Seal any partial buffer
        token.check()?;
        self.seal_buffer_locked()?;
        token.check()?;

        // Step 2: Build the manifest for the next version
        let (manifest, index) = {
            let state = self.state.read();
            if !state.dirty {
                return Ok(false);
            }
            (self.manifest_for(&state, state.manifest_version + 1, true), Arc::clone(&state.index))
        };

        // Step 3: Checkpoint the index, then replace the manifest
        if manifest.index_checkpoint {
            index.write_checkpoint(&self.dir, manifest.version)?;
        }
        manifest.commit(&self.dir)?;

        let mut state = self.state.write();
        state.manifest_version = manifest.version;
        state.dirty = state.options != manifest.options || state.schema != manifest.schema;
        log::info!(
            "Flushed store: manifest v{}, {} segments, {} rows",
            manifest.version,
            manifest.segments.len(),
            state.total_rows()
        );
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Compaction
    // ------------------------------------------------------------------

    pub(crate) fn compact(&self, strategy: CompactionStrategy, token: &CancellationToken) -> Result<CompactionReport> {
        let _flight = FlightGuard::acquire(&self.compacting)?;

        // Step 1: Snapshot the chosen segments and their tombstones
        let job = {
            let state = self.state.read();
            let stats: Vec<SegmentStats> = state
                .segments
                .values()
                .map(|meta| SegmentStats {
                    id: meta.id,
                    row_count: meta.row_count,
                    deleted: state.tombstones.count_in(meta.id),
                    data_size: meta.data_size,
                })
                .collect();
            let picker = CompactionPicker::new(
                state.options.deleted_percentage_threshold,
                state.options.target_segment_size_bytes as u64,
            );
            let Some(task) = picker.pick(strategy, &stats) else {
                log::debug!("{:?} compaction found nothing to do", strategy);
                return Ok(CompactionReport::empty(strategy));
            };
            let inputs = task
                .segment_ids
                .iter()
                .filter_map(|id| state.segments.get(id))
                .map(|meta| CompactionInput {
                    meta: meta.clone(),
                    deleted: state.tombstones.deleted_in(meta.id).cloned().unwrap_or_default(),
                })
                .collect();
            CompactionJob {
                inputs,
                dir: self.dir.clone(),
                schema: state.schema.clone(),
                target_size: state.options.target_segment_size_bytes,
                codec: state.options.default_compression,
                auto_compression: state.options.enable_auto_compression,
                cache: Arc::clone(&self.cache),
            }
        };

        // Step 2: Rewrite live rows without holding any store lock
        let output = job.run(|| self.allocate_segment_id(), token)?;
        let compacted: Vec<u64> = job.inputs.iter().map(|i| i.meta.id).collect();

        // Step 3: Commit in a short critical section
        {
            let _write = self.write_lock.lock();
            // The manifest must not persist tombstones of rows whose replacements are
            // still buffered, so pending writes are sealed into this commit.
            if let Err(e) = token.check().and_then(|_| self.seal_buffer_locked()) {
                output.discard(&self.dir);
                return Err(e);
            }
            let next = {
                let state = self.state.read();
                let mut next = state.clone();

                let mut tombstones = (*state.tombstones).clone();
                for input in &job.inputs {
                    let id = input.meta.id;
                    let late: Vec<u32> = tombstones
                        .deleted_in(id)
                        .map(|set| set.iter().filter(|o| !input.deleted.contains(o)).copied().collect())
                        .unwrap_or_default();
                    tombstones.remove_segment(id);
                    for offset in late {
                        if let Some(&(segment_id, new_offset)) = output.moved.get(&(id, offset)) {
                            tombstones.mark(segment_id, new_offset);
                        }
                    }
                }
                next.tombstones = Arc::new(tombstones);

                for id in &compacted {
                    next.segments.remove(id);
                }
                for meta in &output.segments {
                    next.segments.insert(meta.id, meta.clone());
                }
                next.generation = state.generation + 1;
                next.index = Arc::new(if state.index.is_built() {
                    state.index.remap(&output.moved, &compacted, next.generation)
                } else {
                    PrimaryKeyIndex::new()
                });
                next
            };

            let manifest = self.manifest_for(&next, next.manifest_version + 1, false);
            if let Err(e) = manifest.commit(&self.dir) {
                log::error!("Compaction commit failed: {}", e);
                output.discard(&self.dir);
                return Err(e);
            }

            let mut state = self.state.write();
            state.segments = next.segments;
            state.tombstones = next.tombstones;
            state.index = next.index;
            state.generation = next.generation;
            state.manifest_version = manifest.version;
            state.row_order = None;
            state.dirty = state.options != manifest.options || state.schema != manifest.schema;
        }

        // Step 4: Remove the old segment files
        for id in &compacted {
            self.cache.invalidate(*id);
            if let Err(e) = fs::remove_file(self.segment_path(*id)) {
                log::warn!("Failed to remove compacted segment {}: {}", id, e);
            }
        }

        let bytes_in: u64 = job.inputs.iter().map(|i| i.meta.byte_len).sum();
        let bytes_out: u64 = output.segments.iter().map(|s| s.byte_len).sum();
        let report = CompactionReport {
            strategy,
            segments_in: compacted.len(),
            segments_out: output.segments.len(),
            rows_written: output.rows_written,
            rows_dropped: output.rows_dropped,
            bytes_reclaimed: bytes_in.saturating_sub(bytes_out),
        };
        log::info!(
            "{:?} compaction: {} -> {} segments, {} rows dropped, {} bytes reclaimed",
            strategy,
            report.segments_in,
            report.segments_out,
            report.rows_dropped,
            report.bytes_reclaimed
        );
        Ok(report)
    }

    /// Standard compaction after a flush, when enabled and the trigger holds.
    ///
    /// The flush has already committed, so a failure here is logged and the
    /// previous segments stay in place.
    pub(crate) fn auto_compact(&self) {
        let due = {
            let state = self.state.read();
            state.options.auto_compaction_enabled && state.can_compact()
        };
        if !due {
            return;
        }
        match self.compact(CompactionStrategy::Standard, &CancellationToken::new()) {
            Ok(_) | Err(Error::ConcurrentCompaction) => {}
            Err(e) => log::error!("Auto compaction after flush failed: {}", e),
        }
    }

    /// One scheduler cycle.
    pub(crate) fn background_cycle(&self) {
        if !self.state.read().can_compact() {
            return;
        }
        match self.compact(CompactionStrategy::Standard, &CancellationToken::new()) {
            Ok(report) => log::debug!("Background compaction rewrote {} segments", report.segments_in),
            Err(Error::ConcurrentCompaction) => log::debug!("Background compaction skipped: already running"),
            Err(e) => log::error!("Background compaction failed: {}", e),
        }
    }
}

/// The non-null primary key of a validated row.
fn checked_key(row: &[Value], pk: usize, view: &ReadView) -> Result<Value> {
    match row.get(pk) {
        Some(key) if !key.is_null() => Ok(key.clone()),
        _ => Err(Error::invalid_argument(format!(
            "primary key '{}' must not be null",
            view.primary_key.as_deref().unwrap_or_default()
        ))),
    }
}

/// Removes segment and temp files the manifest does not reference.
pub(crate) fn remove_orphans(dir: &Path, manifest: &Manifest) -> Result<usize> {
    let live: HashSet<u64> = manifest.segments.iter().map(|s| s.id).collect();
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let orphan = match crate::segment::parse_segment_file_name(name) {
            Some(id) => !live.contains(&id),
            None => name.ends_with(".tmp"),
        };
        if orphan {
            log::warn!("Removing orphan file {}", name);
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    for id in &live {
        if !dir.join(segment_file_name(*id)).exists() {
            log::warn!("Segment {} is listed in the manifest but missing on disk", id);
        }
    }
    Ok(removed)
}
