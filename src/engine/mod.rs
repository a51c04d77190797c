//! # Engine
//!
//! The orchestrator: owns the buffer, the database, the lock services, and
//! the monotonic clock, and exposes the full operation surface
//! (add/remove/set/reconcile, verify/fetch/select/describe/browse,
//! find/search, audit/revert, calculate, inventory, stage).
//!
//! ## Write path
//!
//! Every mutation becomes an immutable [`Write`] stamped by the engine
//! clock and appended to the buffer (WAL-first, sync-on-accept by default).
//! Parity is enforced at the edge: an ADD of a present triple and a REMOVE
//! of an absent triple are rejected, serialized per (record, key) through
//! the lock service.
//!
//! ## Read path
//!
//! Reads materialize a record for the locator: segment revisions through the
//! database fan-out, then buffered revisions merged on top.  A read at
//! version `t` sees exactly the writes with `version <= t`.
//!
//! ## Transport
//!
//! A background transporter promotes sealed buffer pages into segments —
//! one page per pass in streaming mode, several fused in batch mode.  The
//! swap (segment visible, pages gone) happens under a storage gate so no
//! reader observes a revision twice.  The transporter is hang-watched: if it
//! stops making progress past the configured threshold it is respawned.
//!
//! ## Recovery
//!
//! `open` replays, in order: segments (fatal on corruption), buffer pages
//! (dropping the already-transported prefix), the inventory, and any
//! transaction backups left by a crash mid-commit.

#[cfg(test)]
pub(crate) mod tests;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{Receiver, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{Buffer, BufferError};
use crate::chunk::tokenize;
use crate::database::{Database, DatabaseError};
use crate::lock::{LockService, RangeLockService, Token};
use crate::model::{Identifier, Key, ModelError, Value, Write};
use crate::query::{Operator, QueryError};
use crate::record::{CorpusRecord, IndexRecord, PRESENT, TableRecord};
use crate::segment::{Segment, SegmentConfig, SegmentError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Sub-directory of the database dir holding transaction backups.
pub const TRANSACTIONS_DIR: &str = "transactions";

/// Name of the schema version marker file.
pub const SCHEMA_VERSION_FILE: &str = "schema_version";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid client input (empty key, empty value, bad range, …).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid model input.
    #[error("invalid argument: {0}")]
    Argument(#[from] ModelError),

    /// Malformed query (bad arity, bad pattern, stack underflow).
    #[error("parse error: {0}")]
    Parse(#[from] QueryError),

    /// Buffer failure.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Database / segment-loading failure.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Segment build failure.
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Clock
// ------------------------------------------------------------------------------------------------

/// Strictly monotonic microsecond timestamps, serialized through one atomic
/// counter.  If the wall clock has not advanced past the last issued value,
/// the counter increments by one instead — version equality across distinct
/// writes is forbidden.
pub struct Clock {
    last: AtomicU64,
}

impl Clock {
    /// A clock that will never issue a value at or below `floor`.
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    fn wall_micros() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    /// Issue the next version.
    pub fn next(&self) -> u64 {
        loop {
            let last = self.last.load(Ordering::Acquire);
            let candidate = Self::wall_micros().max(last + 1);
            if self
                .last
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// The most recently issued version (0 if none).
    pub fn recent(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Ensure future versions exceed `floor` (recovery).
    pub fn advance_past(&self, floor: u64) {
        self.last.fetch_max(floor, Ordering::AcqRel);
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// How the transporter drains the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    /// One page per pass, concurrent with reads.
    Streaming,
    /// Fuse several pages into one segment during quiescent periods.
    Batch,
}

/// Configuration for an [`Engine`] instance.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Buffer page capacity in bytes.
    pub page_size: usize,

    /// Page count that triggers insert backpressure.
    pub high_water_pages: usize,

    /// Upper bound on one backpressure wait.
    pub backpressure_wait: Duration,

    /// Whether accepted writes are fsync'd immediately (`true`) or deferred
    /// to the next group sync (`false`).
    pub sync_on_accept: bool,

    /// Transporter drain policy.
    pub transport_mode: TransportMode,

    /// Pages fused per segment in batch mode.
    pub transport_batch_pages: usize,

    /// Idle tick between transporter passes.
    pub transport_interval: Duration,

    /// No-progress threshold after which the transporter is respawned.
    pub transport_hang_threshold: Duration,

    /// Bloom filter false-positive target for sealed chunks.
    pub bloom_fp_rate: f64,

    /// Corpus substring token length cap.
    pub max_token_length: usize,

    /// Adjacent segments merged per minor compaction pass.
    pub minor_compaction_run: usize,

    /// Adjacent segments merged per major compaction pass.
    pub major_compaction_run: usize,

    /// Idle tick between background compaction passes.  Minor passes run on
    /// every tick; a major pass replaces every sixth one.
    pub compaction_interval: Duration,

    /// Segment count below which background compaction stays idle.
    pub compaction_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: crate::buffer::DEFAULT_PAGE_SIZE,
            high_water_pages: crate::buffer::DEFAULT_HIGH_WATER_PAGES,
            backpressure_wait: Duration::from_millis(100),
            sync_on_accept: true,
            transport_mode: TransportMode::Streaming,
            transport_batch_pages: 4,
            transport_interval: Duration::from_millis(100),
            transport_hang_threshold: Duration::from_secs(30),
            bloom_fp_rate: crate::bloom::DEFAULT_FALSE_POSITIVE_RATE,
            max_token_length: crate::chunk::DEFAULT_MAX_TOKEN_LENGTH,
            minor_compaction_run: 2,
            major_compaction_run: 8,
            compaction_interval: Duration::from_secs(10),
            compaction_threshold: 4,
        }
    }
}

/// Aggregations served by [`Engine::calculate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Calculation {
    Average,
    Sum,
    Count,
    Min,
    Max,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    db_dir: PathBuf,
    pub(crate) buffer: Buffer,
    pub(crate) database: Database,
    pub(crate) clock: Clock,
    pub(crate) locks: LockService,
    pub(crate) ranges: RangeLockService,
    /// Readers share; the transport/compaction swap is exclusive.
    storage_gate: RwLock<()>,
    /// Monotonic ids for atomic operations and transactions.
    op_counter: AtomicU64,
    shutdown: AtomicBool,
    /// Set once the first transporter has been spawned; the hang watch is a
    /// no-op before that (recovery-time applies happen single-threaded).
    transporter_started: AtomicBool,
    transporter: Mutex<Option<JoinHandle<()>>>,
    transport_nudge: Sender<()>,
    transport_inbox: Receiver<()>,
    transport_progress: Mutex<Instant>,
    /// At most one transport pass runs at a time (a respawned transporter
    /// may briefly coexist with a stuck predecessor).
    transport_pass: Mutex<()>,
    compactor: Mutex<Option<JoinHandle<()>>>,
    compactor_nudge: Sender<()>,
    compactor_inbox: Receiver<()>,
}

/// The storage engine handle.  Cloneable; all clones share state.
pub struct Engine {
    pub(crate) shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Engine {
    /// Open (or create) an engine with its database under `db_dir` and its
    /// write log under `buffer_dir`.
    pub fn open(
        db_dir: impl AsRef<Path>,
        buffer_dir: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let db_dir = db_dir.as_ref().to_path_buf();
        fs::create_dir_all(&db_dir)?;
        fs::create_dir_all(db_dir.join(TRANSACTIONS_DIR))?;

        check_schema_version(&db_dir)?;

        // 1. Segments first: corruption here is fatal for the environment.
        let database = Database::open(&db_dir)?;

        // 2. Replay buffer pages, dropping the prefix segments already hold.
        let buffer = Buffer::open(
            buffer_dir,
            config.page_size,
            config.high_water_pages,
            config.backpressure_wait,
        )?;
        buffer.discard_through(database.max_version())?;

        // 3. The clock resumes strictly after everything durable.
        let buffered_ceiling = buffer.latest_version_where(|_| true)?;
        let clock = Clock::starting_after(database.max_version().max(buffered_ceiling));

        // 4. Segment replay can know records the inventory file missed.
        for record in database.known_records()? {
            buffer.inventory_add(record)?;
        }

        let (transport_nudge, transport_inbox) = unbounded();
        let (compactor_nudge, compactor_inbox) = unbounded();

        let engine = Self {
            shared: Arc::new(EngineShared {
                config,
                db_dir,
                buffer,
                database,
                clock,
                locks: LockService::new(),
                ranges: RangeLockService::new(),
                storage_gate: RwLock::new(()),
                op_counter: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
                transporter_started: AtomicBool::new(false),
                transporter: Mutex::new(None),
                transport_nudge,
                transport_inbox,
                transport_progress: Mutex::new(Instant::now()),
                transport_pass: Mutex::new(()),
                compactor: Mutex::new(None),
                compactor_nudge,
                compactor_inbox,
            }),
        };

        // 5. Finish any transaction that crashed between backup and apply.
        let replayed = crate::transaction::recover_backups(&engine)?;
        if replayed > 0 {
            info!(replayed, "transaction backups replayed");
        }

        engine.spawn_transporter();
        engine.spawn_compactor();
        info!("engine opened");
        Ok(engine)
    }

    /// Gracefully shut down: drain the buffer into segments, stop the
    /// transporter, and sync everything.
    pub fn close(&self) -> Result<(), EngineError> {
        self.stop_background();
        self.shared.buffer.seal_active()?;
        while self.transport_once()? {}
        self.shared.buffer.sync()?;
        info!("engine closed");
        Ok(())
    }

    /// Stop the background threads without draining anything.  `close`
    /// uses this before its final drain; crash-recovery tests use it to
    /// abandon an engine with state still in flight.
    pub(crate) fn stop_background(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.shared.transport_nudge.send(());
        let _ = self.shared.compactor_nudge.send(());
        if let Ok(mut slot) = self.shared.transporter.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut slot) = self.shared.compactor.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
    }

    /// The next strictly-monotonic version.
    pub fn time(&self) -> u64 {
        self.shared.clock.next()
    }

    /// Allocate an operation id (transactions, range claims).
    pub(crate) fn next_op_id(&self) -> u64 {
        self.shared.op_counter.fetch_add(1, Ordering::AcqRel)
    }

    // --------------------------------------------------------------------------------------------
    // Write surface
    // --------------------------------------------------------------------------------------------

    /// Assert `key = value` in `record`.
    ///
    /// Returns `false` (writing nothing) when the triple is already present.
    pub fn add(&self, key: &str, value: Value, record: Identifier) -> Result<bool, EngineError> {
        let key = validated_key(key)?;
        validated_value(&value)?;

        let handle = self
            .shared
            .locks
            .get_lock(Token::for_field(record, key.as_str()));
        let _guard = handle.write();

        if self.verify(key.as_str(), &value, record)? {
            return Ok(false);
        }
        let version = self.shared.clock.next();
        self.accept(
            Write::add(record, key, value, version),
            self.shared.config.sync_on_accept,
        )?;
        Ok(true)
    }

    /// Retract `key = value` from `record`.
    ///
    /// Returns `false` (writing nothing) when the triple is absent.
    pub fn remove(&self, key: &str, value: Value, record: Identifier) -> Result<bool, EngineError> {
        let key = validated_key(key)?;
        validated_value(&value)?;

        let handle = self
            .shared
            .locks
            .get_lock(Token::for_field(record, key.as_str()));
        let _guard = handle.write();

        if !self.verify(key.as_str(), &value, record)? {
            return Ok(false);
        }
        let version = self.shared.clock.next();
        self.accept(
            Write::remove(record, key, value, version),
            self.shared.config.sync_on_accept,
        )?;
        Ok(true)
    }

    /// Make `value` the only value under `(key, record)`.
    pub fn set(&self, key: &str, value: Value, record: Identifier) -> Result<(), EngineError> {
        let current = self.fetch(key, record)?;
        for existing in current {
            if existing != value {
                self.remove(key, existing, record)?;
            }
        }
        if !self.verify(key, &value, record)? {
            self.add(key, value, record)?;
        }
        Ok(())
    }

    /// Make the stored value set under `(key, record)` equal `values`
    /// (set semantics — duplicates in the input collapse).
    pub fn reconcile(
        &self,
        key: &str,
        record: Identifier,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<(), EngineError> {
        let desired: HashSet<Value> = values.into_iter().collect();
        let current = self.fetch(key, record)?;

        for value in current.difference(&desired) {
            self.remove(key, value.clone(), record)?;
        }
        for value in desired.difference(&current) {
            self.add(key, value.clone(), record)?;
        }
        Ok(())
    }

    /// Restore `(key, record)` to its state as of version `to` by applying
    /// inverse writes.
    pub fn revert(&self, key: &str, record: Identifier, to: u64) -> Result<(), EngineError> {
        let past = self.fetch_at(key, record, to)?;
        let current = self.fetch(key, record)?;

        for value in current.difference(&past) {
            self.remove(key, value.clone(), record)?;
        }
        for value in past.difference(&current) {
            self.add(key, value.clone(), record)?;
        }
        Ok(())
    }

    /// Append a stamped write to the buffer.  Parity checking is the
    /// caller's responsibility (`add`/`remove` enforce it; transaction
    /// replay reapplies validated writes verbatim).
    pub(crate) fn accept(&self, write: Write, sync: bool) -> Result<(), EngineError> {
        self.check_transporter();
        trace!(%write, "accept");
        self.shared.buffer.insert(&write, sync)?;
        let _ = self.shared.transport_nudge.try_send(());
        Ok(())
    }

    /// Flush deferred (group-sync) writes.
    pub fn sync(&self) -> Result<(), EngineError> {
        Ok(self.shared.buffer.sync()?)
    }

    // --------------------------------------------------------------------------------------------
    // Read surface
    // --------------------------------------------------------------------------------------------

    /// Whether `(key, value)` is present in `record`.
    pub fn verify(&self, key: &str, value: &Value, record: Identifier) -> Result<bool, EngineError> {
        self.verify_at(key, value, record, PRESENT)
    }

    /// [`Engine::verify`] bounded at version `at`.
    pub fn verify_at(
        &self,
        key: &str,
        value: &Value,
        record: Identifier,
        at: u64,
    ) -> Result<bool, EngineError> {
        Ok(self.table_record(record, at)?.verify(key, value, at))
    }

    /// Values present under `(key, record)`.
    pub fn fetch(&self, key: &str, record: Identifier) -> Result<HashSet<Value>, EngineError> {
        self.fetch_at(key, record, PRESENT)
    }

    /// [`Engine::fetch`] bounded at version `at`.
    pub fn fetch_at(
        &self,
        key: &str,
        record: Identifier,
        at: u64,
    ) -> Result<HashSet<Value>, EngineError> {
        Ok(self.table_record(record, at)?.fetch(key, at))
    }

    /// All `{key → values}` present in `record`.
    pub fn select(
        &self,
        record: Identifier,
    ) -> Result<BTreeMap<String, HashSet<Value>>, EngineError> {
        self.select_at(record, PRESENT)
    }

    /// [`Engine::select`] bounded at version `at`.
    pub fn select_at(
        &self,
        record: Identifier,
        at: u64,
    ) -> Result<BTreeMap<String, HashSet<Value>>, EngineError> {
        Ok(self.table_record(record, at)?.select(at))
    }

    /// Keys with at least one present value in `record`.
    pub fn describe(&self, record: Identifier) -> Result<std::collections::BTreeSet<String>, EngineError> {
        self.describe_at(record, PRESENT)
    }

    /// [`Engine::describe`] bounded at version `at`.
    pub fn describe_at(
        &self,
        record: Identifier,
        at: u64,
    ) -> Result<std::collections::BTreeSet<String>, EngineError> {
        Ok(self.table_record(record, at)?.describe(at))
    }

    /// Sorted `{value → records}` view of everything present under `key`.
    pub fn browse(
        &self,
        key: &str,
    ) -> Result<BTreeMap<Value, HashSet<Identifier>>, EngineError> {
        self.browse_at(key, PRESENT)
    }

    /// [`Engine::browse`] bounded at version `at`.
    pub fn browse_at(
        &self,
        key: &str,
        at: u64,
    ) -> Result<BTreeMap<Value, HashSet<Identifier>>, EngineError> {
        Ok(self.index_record(key, at)?.browse(at))
    }

    /// Records matching `key <operator> values`.
    pub fn find(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> Result<HashSet<Identifier>, EngineError> {
        self.find_at(key, operator, values, PRESENT)
    }

    /// [`Engine::find`] bounded at version `at`.
    pub fn find_at(
        &self,
        key: &str,
        operator: Operator,
        values: &[Value],
        at: u64,
    ) -> Result<HashSet<Identifier>, EngineError> {
        let index = self.index_record(key, at)?;
        Ok(crate::query::evaluate_leaf(&index, operator, values, at)?)
    }

    /// Records whose STRING values under `key` contain every token of
    /// `query`.
    pub fn search(&self, key: &str, query: &str) -> Result<HashSet<Identifier>, EngineError> {
        self.search_at(key, query, PRESENT)
    }

    /// [`Engine::search`] bounded at version `at`.
    pub fn search_at(
        &self,
        key: &str,
        query: &str,
        at: u64,
    ) -> Result<HashSet<Identifier>, EngineError> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(HashSet::new());
        }

        let mut result: Option<HashSet<Identifier>> = None;
        for token in tokens {
            if token.chars().count() > self.shared.config.max_token_length {
                // Tokens beyond the indexed cap can never match.
                return Ok(HashSet::new());
            }
            let records = self.corpus_record(key, &token, at)?.records(at);
            result = Some(match result {
                None => records,
                Some(acc) => acc.intersection(&records).copied().collect(),
            });
            if result.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }

    /// Version-ordered change history for `record`.
    pub fn audit_record(&self, record: Identifier) -> Result<Vec<(u64, String)>, EngineError> {
        Ok(self.table_record(record, PRESENT)?.audit(None))
    }

    /// Version-ordered change history for `(key, record)`.
    pub fn audit_field(
        &self,
        key: &str,
        record: Identifier,
    ) -> Result<Vec<(u64, String)>, EngineError> {
        Ok(self.table_record(record, PRESENT)?.audit(Some(key)))
    }

    /// Aggregate the values stored under `key` across all records.
    pub fn calculate(&self, calculation: Calculation, key: &str) -> Result<Option<Value>, EngineError> {
        let browse = self.browse(key)?;
        let pairs: Vec<Value> = browse
            .into_iter()
            .flat_map(|(value, records)| {
                std::iter::repeat_n(value, records.len())
            })
            .collect();
        aggregate(calculation, &pairs)
    }

    /// Aggregate the values stored under `(key, record)`.
    pub fn calculate_record(
        &self,
        calculation: Calculation,
        key: &str,
        record: Identifier,
    ) -> Result<Option<Value>, EngineError> {
        let values: Vec<Value> = self.fetch(key, record)?.into_iter().collect();
        aggregate(calculation, &values)
    }

    /// All record ids ever written, sorted.
    pub fn inventory(&self) -> Vec<Identifier> {
        self.shared.buffer.inventory()
    }

    /// Whether `record` has ever been written.
    pub fn contains(&self, record: Identifier) -> bool {
        self.shared.buffer.inventory_contains(record)
    }

    /// Begin a durable transaction over this engine.
    pub fn stage(&self) -> crate::transaction::Transaction {
        crate::transaction::Transaction::begin(self.clone())
    }

    // --------------------------------------------------------------------------------------------
    // Record materialization (segments + buffer)
    // --------------------------------------------------------------------------------------------

    /// Merged table record: segment fan-out plus buffered revisions.
    pub(crate) fn table_record(
        &self,
        record: Identifier,
        at: u64,
    ) -> Result<TableRecord, EngineError> {
        let _gate = self
            .shared
            .storage_gate
            .read()
            .map_err(|_| EngineError::Internal("storage gate poisoned".into()))?;
        let base = self.shared.database.table_record(record, at)?;
        let mut merged = (*base).clone();
        for write in self.shared.buffer.writes_for_record(record, at)? {
            merged.append(write);
        }
        Ok(merged)
    }

    /// Merged index record.
    pub(crate) fn index_record(&self, key: &str, at: u64) -> Result<IndexRecord, EngineError> {
        let _gate = self
            .shared
            .storage_gate
            .read()
            .map_err(|_| EngineError::Internal("storage gate poisoned".into()))?;
        let base = self.shared.database.index_record(key, at)?;
        let mut merged = (*base).clone();
        for write in self.shared.buffer.writes_for_key(key, at)? {
            merged.append(write);
        }
        Ok(merged)
    }

    /// Merged corpus record.
    pub(crate) fn corpus_record(
        &self,
        key: &str,
        token: &str,
        at: u64,
    ) -> Result<CorpusRecord, EngineError> {
        let _gate = self
            .shared
            .storage_gate
            .read()
            .map_err(|_| EngineError::Internal("storage gate poisoned".into()))?;
        let base = self.shared.database.corpus_record(key, token, at)?;
        let mut merged = (*base).clone();
        for write in self.shared.buffer.writes_for_term(
            key,
            token,
            at,
            self.shared.config.max_token_length,
        )? {
            merged.append(write);
        }
        Ok(merged)
    }

    /// Directory holding transaction backup files.
    pub(crate) fn transactions_dir(&self) -> PathBuf {
        self.shared.db_dir.join(TRANSACTIONS_DIR)
    }

    // --------------------------------------------------------------------------------------------
    // Transport
    // --------------------------------------------------------------------------------------------

    /// Promote the oldest sealed page(s) into a segment.  Returns `true`
    /// when a segment was produced.
    pub fn transport_once(&self) -> Result<bool, EngineError> {
        let _pass = self
            .shared
            .transport_pass
            .lock()
            .map_err(|_| EngineError::Internal("transport pass lock poisoned".into()))?;
        let max_pages = match self.shared.config.transport_mode {
            TransportMode::Streaming => 1,
            TransportMode::Batch => self.shared.config.transport_batch_pages.max(1),
        };
        let (writes, paths) = self.shared.buffer.peek_oldest(max_pages)?;
        if writes.is_empty() {
            return Ok(false);
        }

        let min_version = writes.iter().map(|w| w.version).min().unwrap_or(0);
        let path = self
            .shared
            .database
            .segments_dir()
            .join(Segment::file_name(min_version));
        let segment = Segment::build(
            &path,
            &writes,
            SegmentConfig {
                bloom_fp_rate: self.shared.config.bloom_fp_rate,
                max_token_length: self.shared.config.max_token_length,
            },
        )?;

        // The swap is exclusive: once the segment is visible, the pages are
        // gone, so no reader ever counts a revision twice.
        {
            let _gate = self
                .shared
                .storage_gate
                .write()
                .map_err(|_| EngineError::Internal("storage gate poisoned".into()))?;
            self.shared.database.add_segment(Arc::new(segment))?;
            self.shared.buffer.remove_pages(&paths)?;
        }

        if let Ok(mut progress) = self.shared.transport_progress.lock() {
            *progress = Instant::now();
        }
        debug!(writes = writes.len(), pages = paths.len(), "transport pass complete");
        Ok(true)
    }

    /// Seal the active page and drain the whole buffer into segments.
    /// Mostly a test and shutdown aid.
    pub fn force_transport(&self) -> Result<usize, EngineError> {
        self.shared.buffer.seal_active()?;
        let mut passes = 0;
        while self.transport_once()? {
            passes += 1;
        }
        Ok(passes)
    }

    /// Run one minor compaction pass (adjacent pair merge).
    pub fn compact_minor(&self) -> Result<bool, EngineError> {
        crate::compactor::run(self, self.shared.config.minor_compaction_run)
    }

    /// Run one major compaction pass (broader adjacent run merge).
    pub fn compact_major(&self) -> Result<bool, EngineError> {
        crate::compactor::run(self, self.shared.config.major_compaction_run)
    }

    /// Perform a compaction swap under the storage gate.
    pub(crate) fn swap_segments(
        &self,
        old: &[Arc<Segment>],
        merged: Arc<Segment>,
    ) -> Result<(), EngineError> {
        let _gate = self
            .shared
            .storage_gate
            .write()
            .map_err(|_| EngineError::Internal("storage gate poisoned".into()))?;
        Ok(self.shared.database.replace_segments(old, merged)?)
    }

    fn spawn_transporter(&self) {
        let engine = self.clone();
        let tick = self.shared.config.transport_interval;
        let handle = std::thread::Builder::new()
            .name("transporter".into())
            .spawn(move || {
                debug!("transporter started");
                loop {
                    if engine.shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    // Drain nudges; fall back to the idle tick.
                    let _ = engine.shared.transport_inbox.recv_timeout(tick);
                    while engine.shared.transport_inbox.try_recv().is_ok() {}

                    match engine.transport_once() {
                        Ok(true) => {
                            // Keep draining while there is a backlog.
                            while matches!(engine.transport_once(), Ok(true)) {}
                        }
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "transport pass failed"),
                    }

                    // An idle loop is still progress for the hang watch.
                    if let Ok(mut progress) = engine.shared.transport_progress.lock() {
                        *progress = Instant::now();
                    }
                }
                debug!("transporter stopped");
            });

        match handle {
            Ok(handle) => {
                self.shared.transporter_started.store(true, Ordering::Release);
                if let Ok(mut slot) = self.shared.transporter.lock() {
                    *slot = Some(handle);
                }
                if let Ok(mut progress) = self.shared.transport_progress.lock() {
                    *progress = Instant::now();
                }
            }
            Err(e) => error!(error = %e, "failed to spawn transporter"),
        }
    }

    fn spawn_compactor(&self) {
        let engine = self.clone();
        let tick = self.shared.config.compaction_interval;
        let threshold = self.shared.config.compaction_threshold;
        let handle = std::thread::Builder::new()
            .name("compactor".into())
            .spawn(move || {
                debug!("compactor started");
                let mut ticks = 0u64;
                loop {
                    let _ = engine.shared.compactor_inbox.recv_timeout(tick);
                    if engine.shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if engine.shared.database.segment_count() < threshold {
                        continue;
                    }
                    ticks += 1;
                    let pass = if ticks % 6 == 0 {
                        engine.compact_major()
                    } else {
                        engine.compact_minor()
                    };
                    if let Err(e) = pass {
                        error!(error = %e, "compaction pass failed");
                    }
                }
                debug!("compactor stopped");
            });

        match handle {
            Ok(handle) => {
                if let Ok(mut slot) = self.shared.compactor.lock() {
                    *slot = Some(handle);
                }
            }
            Err(e) => error!(error = %e, "failed to spawn compactor"),
        }
    }

    /// Hang watch: respawn the transporter when it has died, or when a
    /// backlog exists and no pass has completed within the threshold.
    fn check_transporter(&self) {
        if self.shared.shutdown.load(Ordering::Acquire)
            || !self.shared.transporter_started.load(Ordering::Acquire)
        {
            return;
        }
        let stalled = self
            .shared
            .transport_progress
            .lock()
            .map(|at| at.elapsed() > self.shared.config.transport_hang_threshold)
            .unwrap_or(false);
        let dead = self
            .shared
            .transporter
            .lock()
            .map(|slot| slot.as_ref().is_none_or(|h| h.is_finished()))
            .unwrap_or(false);

        if dead || (stalled && self.shared.buffer.can_transport()) {
            warn!(dead, stalled, "restarting transporter");
            self.spawn_transporter();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn validated_key(key: &str) -> Result<Key, EngineError> {
    Ok(Key::new(key)?)
}

fn validated_value(value: &Value) -> Result<(), EngineError> {
    if let Some(text) = value.as_text() {
        if text.is_empty() {
            return Err(EngineError::InvalidArgument(
                "text values must not be empty".into(),
            ));
        }
    }
    Ok(())
}

/// Check (or initialize) the schema version marker.
fn check_schema_version(db_dir: &Path) -> Result<(), EngineError> {
    let path = db_dir.join(SCHEMA_VERSION_FILE);
    if path.exists() {
        let text = fs::read_to_string(&path)?;
        let found: u32 = text
            .trim()
            .parse()
            .map_err(|_| EngineError::Internal(format!("unreadable schema version: {text:?}")))?;
        if found != SCHEMA_VERSION {
            return Err(EngineError::Internal(format!(
                "schema version {found} is not supported (expected {SCHEMA_VERSION})"
            )));
        }
    } else {
        fs::write(&path, format!("{SCHEMA_VERSION}\n"))?;
    }
    Ok(())
}

/// Aggregate a value multiset.  Numeric aggregations reject non-numeric
/// values; `Count`, `Min`, and `Max` accept anything.
fn aggregate(calculation: Calculation, values: &[Value]) -> Result<Option<Value>, EngineError> {
    match calculation {
        Calculation::Count => Ok(Some(Value::Int64(values.len() as i64))),
        Calculation::Min => Ok(values.iter().min().cloned()),
        Calculation::Max => Ok(values.iter().max().cloned()),
        Calculation::Sum | Calculation::Average => {
            if values.is_empty() {
                return Ok(None);
            }
            let mut int_sum: i64 = 0;
            let mut float_sum: f64 = 0.0;
            let mut all_int = true;
            for value in values {
                match value.as_i64() {
                    Some(i) => {
                        int_sum = int_sum.wrapping_add(i);
                        float_sum += i as f64;
                    }
                    None => match value.as_f64() {
                        Some(f) => {
                            all_int = false;
                            float_sum += f;
                        }
                        None => {
                            return Err(EngineError::InvalidArgument(format!(
                                "cannot aggregate non-numeric value of kind {}",
                                value.kind()
                            )));
                        }
                    },
                }
            }
            if calculation == Calculation::Sum {
                Ok(Some(if all_int {
                    Value::Int64(int_sum)
                } else {
                    Value::Float64(float_sum)
                }))
            } else if all_int {
                // Division follows the numeric type of the inputs: integer
                // inputs divide as integers.
                Ok(Some(Value::Int64(int_sum / values.len() as i64)))
            } else {
                Ok(Some(Value::Float64(float_sum / values.len() as f64)))
            }
        }
    }
}
