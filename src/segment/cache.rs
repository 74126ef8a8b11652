//! LRU cache of decoded segments.
//!
//! Decoding a segment (checksum, decompression, column materialisation) is the
//! expensive part of every read, so decoded segments are kept behind `Arc` and
//! evicted least-recently-used first once the byte budget is exceeded.

use crate::error::Result;
use crate::segment::SegmentData;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<u64, Arc<SegmentData>>,
    /// Most recently used at the back.
    lru_queue: VecDeque<u64>,
    current_size: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn touch(&mut self, id: u64) {
        if let Some(pos) = self.lru_queue.iter().position(|k| *k == id) {
            self.lru_queue.remove(pos);
        }
        self.lru_queue.push_back(id);
    }

    fn remove(&mut self, id: u64) -> bool {
        match self.entries.remove(&id) {
            Some(data) => {
                self.current_size -= data.estimated_size();
                self.lru_queue.retain(|k| *k != id);
                true
            }
            None => false,
        }
    }

    fn evict_one(&mut self) -> bool {
        match self.lru_queue.pop_front() {
            Some(id) => {
                if let Some(data) = self.entries.remove(&id) {
                    self.current_size -= data.estimated_size();
                    self.stats.evictions += 1;
                }
                true
            }
            None => false,
        }
    }
}

/// Thread-safe LRU cache of decoded segments, keyed by segment id.
///
/// # Examples
///
/// ```
/// use velocity::segment::SegmentCache;
///
/// // A 64MB cache
/// let cache = SegmentCache::new(64 * 1024 * 1024);
/// assert!(cache.is_empty());
/// ```
#[derive(Debug)]
pub struct SegmentCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl SegmentCache {
    /// Create a cache holding at most `capacity` bytes of decoded data.
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(CacheInner::default()) }
    }

    /// Look up a segment, marking it most recently used.
    pub fn get(&self, id: u64) -> Option<Arc<SegmentData>> {
        let mut inner = self.inner.lock();
        inner.stats.lookups += 1;
        match inner.entries.get(&id).cloned() {
            Some(data) => {
                inner.stats.hits += 1;
                inner.touch(id);
                Some(data)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a decoded segment, evicting older entries to make room.
    ///
    /// Segments larger than the whole budget are not cached.
    pub fn insert(&self, data: Arc<SegmentData>) {
        let size = data.estimated_size();
        if self.capacity == 0 || size > self.capacity {
            return;
        }
        let mut inner = self.inner.lock();
        inner.remove(data.id());
        while inner.current_size + size > self.capacity {
            if !inner.evict_one() {
                break;
            }
        }
        inner.current_size += size;
        inner.lru_queue.push_back(data.id());
        inner.entries.insert(data.id(), data);
        inner.stats.insertions += 1;
    }

    /// Return the cached segment or decode it with `load` and cache the result.
    ///
    /// The loader runs without the cache lock held, so two threads missing on the
    /// same segment may both decode it; the second insert simply replaces the first.
    pub fn get_or_load<F>(&self, id: u64, load: F) -> Result<Arc<SegmentData>>
    where
        F: FnOnce() -> Result<SegmentData>,
    {
        if let Some(data) = self.get(id) {
            return Ok(data);
        }
        let data = Arc::new(load()?);
        self.insert(Arc::clone(&data));
        Ok(data)
    }

    /// Drop a segment from the cache (after compaction removed it).
    pub fn invalidate(&self, id: u64) {
        self.inner.lock().remove(id);
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru_queue.clear();
        inner.current_size = 0;
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Bytes of decoded data currently cached.
    pub fn size(&self) -> usize {
        self.inner.lock().current_size
    }

    /// Get the cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionType;
    use crate::schema::{DataType, Schema};
    use crate::segment::{segment_file_name, SegmentBuilder};
    use crate::value::Value;
    use tempfile::TempDir;

    fn decoded(dir: &TempDir, id: u64, rows: i32) -> SegmentData {
        let schema = Schema::new().with_column("Id", DataType::Integer);
        let mut builder = SegmentBuilder::new(id, &schema);
        for i in 0..rows {
            builder.add(i as u64, vec![Value::Integer(i)]).unwrap();
        }
        builder.finish(dir.path(), CompressionType::None, false).unwrap();
        SegmentData::read(dir.path().join(segment_file_name(id)), id).unwrap()
    }

    #[test]
    fn test_cache_basic_operations() {
        let dir = TempDir::new().unwrap();
        let cache = SegmentCache::new(1024 * 1024);

        assert!(cache.get(1).is_none());
        cache.insert(Arc::new(decoded(&dir, 1, 10)));
        assert_eq!(cache.get(1).unwrap().row_count(), 10);

        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let dir = TempDir::new().unwrap();
        let one = decoded(&dir, 1, 10);
        // Room for exactly three equally sized segments.
        let cache = SegmentCache::new(one.estimated_size() * 3);
        cache.insert(Arc::new(one));
        cache.insert(Arc::new(decoded(&dir, 2, 10)));
        cache.insert(Arc::new(decoded(&dir, 3, 10)));

        // Touch 1 so 2 becomes least recently used.
        assert!(cache.get(1).is_some());
        cache.insert(Arc::new(decoded(&dir, 4, 10)));

        assert_eq!(cache.len(), 3);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_or_load_caches() {
        let dir = TempDir::new().unwrap();
        let cache = SegmentCache::new(1024 * 1024);
        let data = decoded(&dir, 7, 3);

        let loaded = cache.get_or_load(7, || Ok(data)).unwrap();
        assert_eq!(loaded.row_count(), 3);
        let again = cache.get_or_load(7, || panic!("should be cached")).unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));

        cache.invalidate(7);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_cache_disabled_when_capacity_zero() {
        let dir = TempDir::new().unwrap();
        let cache = SegmentCache::new(0);
        cache.insert(Arc::new(decoded(&dir, 1, 5)));
        assert!(cache.get(1).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let dir = TempDir::new().unwrap();
        let cache = Arc::new(SegmentCache::new(1024 * 1024));
        let segments: Vec<_> = (0..8).map(|i| Arc::new(decoded(&dir, i, 4))).collect();

        let handles: Vec<_> = segments
            .into_iter()
            .map(|segment| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let id = segment.id();
                    cache.insert(segment);
                    assert!(cache.get(id).is_some());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
