//! # Database
//!
//! The durable half of the store: an ordered list of immutable segments plus
//! the in-memory record cache materialized from them.
//!
//! ## Segment ordering
//!
//! Segments are totally ordered by `min_version`; the transporter only ever
//! appends ranges newer than everything present, and the compactor swaps
//! adjacent runs for merged replacements covering the same range.  Readers
//! snapshot the list by reference (cheap `Arc` clones) and never block
//! writers.
//!
//! ## Read fan-out
//!
//! Materializing a record for a locator walks the segment list:
//!
//! 1. skip segments whose `min_version` exceeds the read timestamp,
//! 2. consult the relevant chunk's bloom filter and skip on a negative,
//! 3. seek the locator's byte range through the chunk manifest and stream
//!    the revisions into the record.
//!
//! Buffer revisions are merged in by the engine afterwards.
//!
//! ## Record cache
//!
//! Present-time materializations are cached per locator, tagged with the
//! segment-list **epoch** they were built at; any list mutation bumps the
//! epoch and stale entries rebuild on next use.  When a cache map fills up,
//! entries nobody else holds (`Arc` strong count of one) are evicted first.


use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunk::{
    ChunkError, Locator, corpus_composite, index_composite_key, table_composite_record,
};
use crate::record::{CorpusRecord, IndexRecord, TableRecord};
use crate::segment::{SEGMENT_EXTENSION, Segment, SegmentError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Sub-directory of the database dir holding sealed segments.
pub const SEGMENTS_DIR: &str = "segments";

/// Scratch sub-directory for in-flight compaction output.
pub const COMPACTION_DIR: &str = "compaction";

/// Per-shape record cache capacity.
const RECORD_CACHE_CAPACITY: usize = 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A segment file could not be loaded at startup.  Fatal for the
    /// environment; corruption is never silently ignored.
    #[error("failed to load segment {path}: {source}")]
    SegmentLoading {
        path: PathBuf,
        #[source]
        source: SegmentError,
    },

    /// Segment build or read failure.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Chunk seek failure.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A compaction swap did not line up with the live segment list.
    #[error("stale compaction swap: {0}")]
    StaleSwap(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Record cache
// ------------------------------------------------------------------------------------------------

struct CachedRecord<T> {
    built_epoch: u64,
    value: Arc<T>,
}

struct RecordCache<K, T> {
    map: Mutex<HashMap<K, CachedRecord<T>>>,
}

impl<K: std::hash::Hash + Eq + Clone, T> RecordCache<K, T> {
    fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K, epoch: u64) -> Option<Arc<T>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key)
            .filter(|entry| entry.built_epoch == epoch)
            .map(|entry| Arc::clone(&entry.value))
    }

    fn put(&self, key: K, epoch: u64, value: Arc<T>) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if map.len() >= RECORD_CACHE_CAPACITY {
            // Claim entries at refcount zero (only the cache holds them).
            map.retain(|_, entry| Arc::strong_count(&entry.value) > 1);
            if map.len() >= RECORD_CACHE_CAPACITY {
                map.clear();
            }
        }
        map.insert(
            key,
            CachedRecord {
                built_epoch: epoch,
                value,
            },
        );
    }
}

// ------------------------------------------------------------------------------------------------
// Database
// ------------------------------------------------------------------------------------------------

/// The ordered-segment store.  See the module docs.
pub struct Database {
    dir: PathBuf,
    segments: RwLock<Vec<Arc<Segment>>>,
    /// Bumped on every segment-list mutation; tags cache entries.
    epoch: AtomicU64,
    table_cache: RecordCache<u64, TableRecord>,
    index_cache: RecordCache<String, IndexRecord>,
    corpus_cache: RecordCache<(String, String), CorpusRecord>,
}

impl Database {
    /// Open the database rooted at `dir`, loading every segment in
    /// `dir/segments` (lexicographic order = version order).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let dir = dir.as_ref().to_path_buf();
        let segments_dir = dir.join(SEGMENTS_DIR);
        fs::create_dir_all(&segments_dir)?;
        fs::create_dir_all(dir.join(COMPACTION_DIR))?;

        let mut paths: Vec<PathBuf> = fs::read_dir(&segments_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(SEGMENT_EXTENSION))
            .collect();
        paths.sort();

        let mut segments = Vec::with_capacity(paths.len());
        for path in paths {
            let segment = Segment::open(&path).map_err(|source| {
                DatabaseError::SegmentLoading {
                    path: path.clone(),
                    source,
                }
            })?;
            segments.push(Arc::new(segment));
        }

        for pair in segments.windows(2) {
            if pair[0].max_version() >= pair[1].min_version() {
                warn!(
                    left = %pair[0].path().display(),
                    right = %pair[1].path().display(),
                    "segment version ranges overlap"
                );
            }
        }

        info!(dir = %dir.display(), segments = segments.len(), "database opened");

        Ok(Self {
            dir,
            segments: RwLock::new(segments),
            epoch: AtomicU64::new(1),
            table_cache: RecordCache::new(),
            index_cache: RecordCache::new(),
            corpus_cache: RecordCache::new(),
        })
    }

    /// Directory for sealed segments.
    pub fn segments_dir(&self) -> PathBuf {
        self.dir.join(SEGMENTS_DIR)
    }

    /// Scratch directory for compaction output.
    pub fn compaction_dir(&self) -> PathBuf {
        self.dir.join(COMPACTION_DIR)
    }

    /// Snapshot of the ordered segment list.
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.segments.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Largest version stored in any segment, or 0.
    pub fn max_version(&self) -> u64 {
        self.segments
            .read()
            .map(|s| s.iter().map(|seg| seg.max_version()).max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Current cache epoch.
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Append a freshly transported segment.  Its version range must come
    /// after everything already stored.
    pub fn add_segment(&self, segment: Arc<Segment>) -> Result<(), DatabaseError> {
        let mut segments = self
            .segments
            .write()
            .map_err(|_| DatabaseError::Internal("segment list lock poisoned".into()))?;
        if let Some(last) = segments.last() {
            if last.max_version() >= segment.min_version() {
                return Err(DatabaseError::Internal(format!(
                    "segment {} does not extend the version order (last max {}, new min {})",
                    segment.path().display(),
                    last.max_version(),
                    segment.min_version()
                )));
            }
        }
        debug!(path = %segment.path().display(), "segment appended");
        segments.push(segment);
        self.epoch.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Replace a contiguous run of segments with its merged replacement.
    /// Old files are deleted after the swap.
    pub fn replace_segments(
        &self,
        old: &[Arc<Segment>],
        merged: Arc<Segment>,
    ) -> Result<(), DatabaseError> {
        let mut segments = self
            .segments
            .write()
            .map_err(|_| DatabaseError::Internal("segment list lock poisoned".into()))?;

        let first = old
            .first()
            .ok_or_else(|| DatabaseError::StaleSwap("empty swap set".into()))?;
        let start = segments
            .iter()
            .position(|s| Arc::ptr_eq(s, first))
            .ok_or_else(|| DatabaseError::StaleSwap("segment no longer in the list".into()))?;

        for (offset, expected) in old.iter().enumerate() {
            match segments.get(start + offset) {
                Some(live) if Arc::ptr_eq(live, expected) => {}
                _ => {
                    return Err(DatabaseError::StaleSwap(
                        "swap set is not a contiguous live run".into(),
                    ));
                }
            }
        }

        let removed: Vec<Arc<Segment>> = segments
            .splice(start..start + old.len(), [Arc::clone(&merged)])
            .collect();
        self.epoch.fetch_add(1, Ordering::Release);
        drop(segments);

        for segment in removed {
            // A merged segment may reuse its oldest predecessor's file name
            // (both are named by min_version); never delete the live file.
            if segment.path() == merged.path() {
                continue;
            }
            if let Err(e) = fs::remove_file(segment.path()) {
                warn!(path = %segment.path().display(), error = %e,
                    "failed to delete compacted segment file");
            }
        }
        info!(merged = %merged.path().display(), replaced = old.len(), "segments swapped");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read fan-out
    // --------------------------------------------------------------------------------------------

    /// Materialize the table record for `record` from segments with
    /// `min_version <= at`.
    ///
    /// Present-time reads (`at == u64::MAX`) are answered from the record
    /// cache when the segment list has not changed since the entry was
    /// built.
    pub fn table_record(&self, record: u64, at: u64) -> Result<Arc<TableRecord>, DatabaseError> {
        let epoch = self.current_epoch();
        if at == u64::MAX {
            if let Some(cached) = self.table_cache.get(&record, epoch) {
                return Ok(cached);
            }
        }

        let mut materialized = TableRecord::new(record);
        let composite = table_composite_record(record);
        for segment in self.segments() {
            if segment.min_version() > at {
                continue;
            }
            if !segment.table.might_contain(&composite) {
                continue;
            }
            for write in segment.table.seek(&Locator::Record(record))? {
                materialized.append(write);
            }
        }

        let materialized = Arc::new(materialized);
        if at == u64::MAX {
            self.table_cache
                .put(record, epoch, Arc::clone(&materialized));
        }
        Ok(materialized)
    }

    /// Materialize the index record for `key` from segments with
    /// `min_version <= at`.
    pub fn index_record(&self, key: &str, at: u64) -> Result<Arc<IndexRecord>, DatabaseError> {
        let epoch = self.current_epoch();
        if at == u64::MAX {
            if let Some(cached) = self.index_cache.get(&key.to_string(), epoch) {
                return Ok(cached);
            }
        }

        let mut materialized = IndexRecord::new(key);
        let composite = index_composite_key(key);
        for segment in self.segments() {
            if segment.min_version() > at {
                continue;
            }
            if !segment.index.might_contain(&composite) {
                continue;
            }
            for write in segment.index.seek(&Locator::Key(key.to_string()))? {
                materialized.append(write);
            }
        }

        let materialized = Arc::new(materialized);
        if at == u64::MAX {
            self.index_cache
                .put(key.to_string(), epoch, Arc::clone(&materialized));
        }
        Ok(materialized)
    }

    /// Materialize the corpus record for `(key, token)` from segments with
    /// `min_version <= at`.
    pub fn corpus_record(
        &self,
        key: &str,
        token: &str,
        at: u64,
    ) -> Result<Arc<CorpusRecord>, DatabaseError> {
        let cache_key = (key.to_string(), token.to_string());
        let epoch = self.current_epoch();
        if at == u64::MAX {
            if let Some(cached) = self.corpus_cache.get(&cache_key, epoch) {
                return Ok(cached);
            }
        }

        let mut materialized = CorpusRecord::new(key, token);
        let composite = corpus_composite(key, token);
        let locator = Locator::Term {
            key: key.to_string(),
            token: token.to_string(),
        };
        for segment in self.segments() {
            if segment.min_version() > at {
                continue;
            }
            if !segment.corpus.might_contain(&composite) {
                continue;
            }
            for write in segment.corpus.seek(&locator)? {
                materialized.append(write);
            }
        }

        let materialized = Arc::new(materialized);
        if at == u64::MAX {
            self.corpus_cache
                .put(cache_key, epoch, Arc::clone(&materialized));
        }
        Ok(materialized)
    }

    /// Every record id that appears in any segment.  Used to rebuild the
    /// inventory after a crash.
    pub fn known_records(&self) -> Result<Vec<u64>, DatabaseError> {
        let mut out = std::collections::HashSet::new();
        for segment in self.segments() {
            for write in segment.writes()? {
                out.insert(write.record);
            }
        }
        let mut out: Vec<u64> = out.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }
}
