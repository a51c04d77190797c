//! # Atomic Operations & Transactions
//!
//! An [`AtomicOperation`] is a short-lived, in-memory unit of work layering
//! MVCC serializable isolation over the engine:
//!
//! 1. **Begin** snapshots the engine's version ceiling.
//! 2. **Reads** record an intent (a point or range lock scope), fail fast if
//!    the engine already moved past the snapshot for that scope, and return
//!    the engine's state as of the snapshot plus the operation's own queued
//!    writes.
//! 3. **Writes** are queued, never applied eagerly.
//! 4. **Commit** acquires every recorded lock in deterministic (sorted
//!    token) order, re-validates every intent against the snapshot, stamps
//!    the queued writes with fresh versions, and applies them to the buffer.
//!    Any conflict aborts the whole operation; no partial writes are ever
//!    visible.
//!
//! Phantom protection comes from the range lock service: readers register
//! interval claims, writers register points, and a point landing inside
//! another operation's interval is a conflict.  Repeatable reads come from
//! the intent re-validation; write skew is caught because *reads* are
//! validated at commit, not just writes.
//!
//! A [`Transaction`] is an atomic operation made durable: after validation
//! passes, the stamped writes are persisted to a backup file (CRC-framed)
//! and fsync'd **before** application begins.  A crash mid-apply is repaired
//! at startup by [`recover_backups`], which re-applies exactly the missing
//! writes (application is idempotent per revision version) and then deletes
//! the backup.
//!
//! Internal conflicts are [`AtomicStateError`]s; they never escape — the
//! public surface maps them to [`TransactionError::Conflict`].

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read as _, Write as IoWrite};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::encoding::{Decode, EncodingError, encode_to_vec};
use crate::engine::{Engine, EngineError};
use crate::lock::{Interval, LockHandle, Token};
use crate::model::{Action, Identifier, Key, Value, Write};
use crate::query::Operator;
use crate::record::{PRESENT, TableRecord};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Internal, strictly-local conflict states.  Callers of the public surface
/// only ever see [`TransactionError::Conflict`].
#[derive(Debug, Error)]
pub(crate) enum AtomicStateError {
    /// A locked scope changed after the snapshot was taken.
    #[error("a newer write intersects a locked scope")]
    VersionConflict,

    /// A queued write landed inside another operation's range claim.
    #[error("write point inside a foreign range claim")]
    RangeConflict,

    /// The operation was already committed or aborted.
    #[error("operation is closed")]
    Closed,
}

/// Errors surfaced by transactions and atomic operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Commit found a conflict, or a staged read saw a newer write.  The
    /// client should retry the whole transaction.
    #[error("transaction conflict")]
    Conflict,

    /// The transaction sat idle past its configured timeout.
    #[error("transaction idle timeout exceeded")]
    Expired,

    /// Engine failure while reading or applying.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Backup file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backup encoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

impl From<AtomicStateError> for TransactionError {
    fn from(_: AtomicStateError) -> Self {
        TransactionError::Conflict
    }
}

// ------------------------------------------------------------------------------------------------
// Intents
// ------------------------------------------------------------------------------------------------

/// A lock scope recorded by a read or write.
#[derive(Clone, Debug)]
enum Intent {
    /// One field of one record.
    Field { record: Identifier, key: String },
    /// One whole record.
    Record { record: Identifier },
    /// One key across all records.
    Key { key: String },
    /// A value interval under one key.
    Range { key: String, interval: Interval },
}

impl Intent {
    fn token(&self) -> Token {
        match self {
            Intent::Field { record, key } => Token::for_field(*record, key),
            Intent::Record { record } => Token::for_record(*record),
            Intent::Key { key } | Intent::Range { key, .. } => Token::for_key(key),
        }
    }
}

/// A queued (not yet stamped) mutation.
#[derive(Clone, Debug)]
struct QueuedWrite {
    record: Identifier,
    key: Key,
    value: Value,
    action: Action,
}

// ------------------------------------------------------------------------------------------------
// AtomicOperation
// ------------------------------------------------------------------------------------------------

/// A short-lived consistent unit of work.  See the module docs.
pub struct AtomicOperation {
    engine: Engine,
    id: u64,
    /// Engine version ceiling at begin; reads are bounded here.
    snapshot: u64,
    intents: Vec<Intent>,
    queued: Vec<QueuedWrite>,
    open: bool,
    idle_timeout: Option<Duration>,
    last_activity: Instant,
}

impl AtomicOperation {
    /// Begin an operation snapshotting the engine's current version ceiling.
    pub fn begin(engine: Engine) -> Self {
        let id = engine.next_op_id();
        let snapshot = engine.shared.clock.recent();
        trace!(id, snapshot, "atomic operation begun");
        Self {
            engine,
            id,
            snapshot,
            intents: Vec::new(),
            queued: Vec::new(),
            open: true,
            idle_timeout: None,
            last_activity: Instant::now(),
        }
    }

    /// The snapshot version this operation reads at.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Abort the next commit if the operation sits idle longer than `d`.
    pub fn set_idle_timeout(&mut self, d: Duration) {
        self.idle_timeout = Some(d);
    }

    fn touch(&mut self) -> Result<(), AtomicStateError> {
        if !self.open {
            return Err(AtomicStateError::Closed);
        }
        self.last_activity = Instant::now();
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Values present under `(key, record)` at the snapshot, plus queued
    /// writes.
    pub fn fetch(
        &mut self,
        key: &str,
        record: Identifier,
    ) -> Result<HashSet<Value>, TransactionError> {
        self.touch()?;
        let intent = Intent::Field {
            record,
            key: key.to_string(),
        };
        self.observe(intent)?;
        Ok(self.overlay_table(record)?.fetch(key, PRESENT))
    }

    /// Whether `(key, value)` is present in `record`.
    pub fn verify(
        &mut self,
        key: &str,
        value: &Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.touch()?;
        let intent = Intent::Field {
            record,
            key: key.to_string(),
        };
        self.observe(intent)?;
        Ok(self.overlay_table(record)?.verify(key, value, PRESENT))
    }

    /// All `{key → values}` present in `record`.
    pub fn select(
        &mut self,
        record: Identifier,
    ) -> Result<std::collections::BTreeMap<String, HashSet<Value>>, TransactionError> {
        self.touch()?;
        self.observe(Intent::Record { record })?;
        Ok(self.overlay_table(record)?.select(PRESENT))
    }

    /// Sorted `{value → records}` view of `key`.  The timestamp variant
    /// participates in conflict detection even when `at` is in the future.
    pub fn browse_at(
        &mut self,
        key: &str,
        at: u64,
    ) -> Result<std::collections::BTreeMap<Value, HashSet<Identifier>>, TransactionError> {
        self.touch()?;
        self.observe(Intent::Key {
            key: key.to_string(),
        })?;
        self.engine
            .shared
            .ranges
            .register_read(self.id, key, Interval::all());
        let index = self.overlay_index(key, at)?;
        Ok(index.browse(at))
    }

    /// Present-time [`AtomicOperation::browse_at`].
    pub fn browse(
        &mut self,
        key: &str,
    ) -> Result<std::collections::BTreeMap<Value, HashSet<Identifier>>, TransactionError> {
        self.browse_at(key, PRESENT)
    }

    /// Records matching `key <operator> values`, with range claims
    /// registered for phantom protection.
    pub fn find(
        &mut self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> Result<HashSet<Identifier>, TransactionError> {
        self.touch()?;
        let interval = operator_interval(operator, values);
        self.observe(Intent::Range {
            key: key.to_string(),
            interval: interval.clone(),
        })?;
        self.engine
            .shared
            .ranges
            .register_read(self.id, key, interval);
        let index = self.overlay_index(key, PRESENT)?;
        Ok(crate::query::evaluate_leaf(&index, operator, values, PRESENT)
            .map_err(EngineError::from)?)
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Queue an ADD.  Returns `false` when the triple is already present in
    /// this operation's view.
    pub fn add(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.touch()?;
        let key = Key::new(key).map_err(EngineError::from)?;
        if self.overlay_table(record)?.verify(key.as_str(), &value, PRESENT) {
            return Ok(false);
        }
        self.intents.push(Intent::Field {
            record,
            key: key.as_str().to_string(),
        });
        self.queued.push(QueuedWrite {
            record,
            key,
            value,
            action: Action::Add,
        });
        Ok(true)
    }

    /// Queue a REMOVE.  Returns `false` when the triple is absent in this
    /// operation's view.
    pub fn remove(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.touch()?;
        let key = Key::new(key).map_err(EngineError::from)?;
        if !self.overlay_table(record)?.verify(key.as_str(), &value, PRESENT) {
            return Ok(false);
        }
        self.intents.push(Intent::Field {
            record,
            key: key.as_str().to_string(),
        });
        self.queued.push(QueuedWrite {
            record,
            key,
            value,
            action: Action::Remove,
        });
        Ok(true)
    }

    /// Queue writes making `value` the only value under `(key, record)`.
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<(), TransactionError> {
        let current = self.fetch(key, record)?;
        for existing in current {
            if existing != value {
                self.remove(key, existing, record)?;
            }
        }
        self.add(key, value, record)?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Commit / abort
    // --------------------------------------------------------------------------------------------

    /// Validate, stamp, and apply the queued writes.  See the module docs
    /// for the protocol.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        self.commit_with(None)
    }

    /// Abort: discard queued writes and release all claims.
    pub fn abort(&mut self) {
        if self.open {
            debug!(id = self.id, queued = self.queued.len(), "atomic operation aborted");
        }
        self.open = false;
        self.queued.clear();
        self.intents.clear();
        self.engine.shared.ranges.release(self.id);
    }

    /// Commit, invoking `persist` with the stamped writes after validation
    /// succeeds and before application starts (the transaction durability
    /// hook).
    fn commit_with(
        &mut self,
        persist: Option<&dyn Fn(&[Write]) -> Result<(), TransactionError>>,
    ) -> Result<(), TransactionError> {
        if !self.open {
            return Err(AtomicStateError::Closed.into());
        }
        if let Some(timeout) = self.idle_timeout {
            if self.last_activity.elapsed() > timeout {
                self.abort();
                return Err(TransactionError::Expired);
            }
        }

        let result = self.commit_locked(persist);
        match &result {
            Ok(()) => debug!(id = self.id, "atomic operation committed"),
            Err(e) => debug!(id = self.id, error = %e, "atomic operation failed to commit"),
        }
        // Success or failure, the operation is finished.
        self.open = false;
        self.queued.clear();
        self.intents.clear();
        self.engine.shared.ranges.release(self.id);
        result
    }

    fn commit_locked(
        &mut self,
        persist: Option<&dyn Fn(&[Write]) -> Result<(), TransactionError>>,
    ) -> Result<(), TransactionError> {
        // 1. Deterministic lock order: sorted, deduplicated tokens.
        //    A token needed by any queued write locks exclusively.
        let mut exclusive: Vec<Token> = self
            .queued
            .iter()
            .flat_map(|w| {
                [
                    Token::for_field(w.record, w.key.as_str()),
                    Token::for_value(w.key.as_str(), &w.value),
                    Token::for_key(w.key.as_str()),
                ]
            })
            .collect();
        exclusive.sort_unstable();
        exclusive.dedup();

        let mut shared: Vec<Token> = self
            .intents
            .iter()
            .map(Intent::token)
            .filter(|t| exclusive.binary_search(t).is_err())
            .collect();
        shared.sort_unstable();
        shared.dedup();

        let mut plan: Vec<(Token, bool)> = exclusive
            .iter()
            .map(|t| (*t, true))
            .chain(shared.iter().map(|t| (*t, false)))
            .collect();
        plan.sort_unstable_by_key(|(token, _)| *token);

        let handles: Vec<LockHandle> = plan
            .iter()
            .map(|(token, _)| self.engine.shared.locks.get_lock(*token))
            .collect();
        enum Guard<'a> {
            Shared(std::sync::RwLockReadGuard<'a, ()>),
            Exclusive(std::sync::RwLockWriteGuard<'a, ()>),
        }
        let _guards: Vec<Guard<'_>> = handles
            .iter()
            .zip(plan.iter())
            .map(|(handle, (_, exclusive))| {
                if *exclusive {
                    Guard::Exclusive(handle.write())
                } else {
                    Guard::Shared(handle.read())
                }
            })
            .collect();

        // 2. Point-in-range claims against concurrent readers.
        for write in &self.queued {
            if !self.engine.shared.ranges.try_register_write(
                self.id,
                write.key.as_str(),
                &write.value,
            ) {
                return Err(AtomicStateError::RangeConflict.into());
            }
        }

        // 3. Re-validate every intent against the snapshot.
        for intent in &self.intents {
            self.check_intent(intent)?;
        }

        // 4. Stamp and apply.
        let stamped: Vec<Write> = self
            .queued
            .iter()
            .map(|w| Write {
                record: w.record,
                key: w.key.clone(),
                value: w.value.clone(),
                version: self.engine.shared.clock.next(),
                action: w.action,
            })
            .collect();

        if let Some(persist) = persist {
            persist(&stamped)?;
        }

        for write in &stamped {
            self.engine.accept(write.clone(), true)?;
        }
        Ok(())
    }

    /// Fail when the engine holds a write newer than the snapshot inside
    /// the intent's scope.
    fn check_intent(&self, intent: &Intent) -> Result<(), AtomicStateError> {
        let changed_at = match intent {
            Intent::Field { record, key } => self
                .engine
                .table_record(*record, PRESENT)
                .map(|r| r.latest_version_of_key(key)),
            Intent::Record { record } => self
                .engine
                .table_record(*record, PRESENT)
                .map(|r| r.latest_version()),
            Intent::Key { key } => self
                .engine
                .index_record(key, PRESENT)
                .map(|r| r.latest_version()),
            Intent::Range { key, interval } => {
                let interval = interval.clone();
                self.engine
                    .index_record(key, PRESENT)
                    .map(move |r| r.latest_version_matching(|v| interval.contains(v)))
            }
        }
        .map_err(|e| {
            warn!(error = %e, "intent validation read failed");
            AtomicStateError::VersionConflict
        })?;

        if changed_at > self.snapshot {
            trace!(changed_at, snapshot = self.snapshot, "intent conflict");
            return Err(AtomicStateError::VersionConflict);
        }
        Ok(())
    }

    /// Record an intent and fail fast if its scope already moved past the
    /// snapshot.
    fn observe(&mut self, intent: Intent) -> Result<(), TransactionError> {
        self.check_intent(&intent)?;
        self.intents.push(intent);
        Ok(())
    }

    /// Snapshot-bounded table record with queued writes overlaid at
    /// pseudo-versions above the snapshot.
    fn overlay_table(&self, record: Identifier) -> Result<TableRecord, TransactionError> {
        let mut table = self.engine.table_record(record, self.snapshot)?;
        for (offset, queued) in self.queued.iter().enumerate() {
            if queued.record != record {
                continue;
            }
            table.append(Write {
                record,
                key: queued.key.clone(),
                value: queued.value.clone(),
                version: self.snapshot + 1 + offset as u64,
                action: queued.action,
            });
        }
        Ok(table)
    }

    /// Snapshot-bounded index record with queued writes overlaid at
    /// pseudo-versions above the snapshot.  Past-bounded reads
    /// (`at < snapshot`) exclude the queued writes, which belong to "now".
    fn overlay_index(
        &self,
        key: &str,
        at: u64,
    ) -> Result<crate::record::IndexRecord, TransactionError> {
        let mut index = self.engine.index_record(key, self.snapshot.min(at))?;
        if at >= self.snapshot {
            for (offset, queued) in self.queued.iter().enumerate() {
                if queued.key.as_str() != key {
                    continue;
                }
                index.append(Write {
                    record: queued.record,
                    key: queued.key.clone(),
                    value: queued.value.clone(),
                    version: self.snapshot + 1 + offset as u64,
                    action: queued.action,
                });
            }
        }
        Ok(index)
    }
}

impl Drop for AtomicOperation {
    fn drop(&mut self) {
        if self.open {
            self.abort();
        } else {
            self.engine.shared.ranges.release(self.id);
        }
    }
}

/// The lock interval a find operator reads.
fn operator_interval(operator: Operator, values: &[Value]) -> Interval {
    match (operator, values) {
        (Operator::Eq, [v]) => Interval::point(v.clone()),
        (Operator::Lt, [v]) => Interval::below(v.clone(), false),
        (Operator::Le, [v]) => Interval::below(v.clone(), true),
        (Operator::Gt, [v]) => Interval::above(v.clone(), false),
        (Operator::Ge, [v]) => Interval::above(v.clone(), true),
        (Operator::Between, [low, high]) => Interval::between(low.clone(), high.clone()),
        (Operator::LinksTo, [v]) => Interval::point(v.clone()),
        // Ne and the pattern operators can be affected by any write under
        // the key.
        _ => Interval::all(),
    }
}

// ------------------------------------------------------------------------------------------------
// Transaction
// ------------------------------------------------------------------------------------------------

/// A durable atomic operation: identical isolation, plus a backup file that
/// makes commit atomic across a process crash.
pub struct Transaction {
    op: AtomicOperation,
    backup: PathBuf,
}

impl Transaction {
    /// Begin a transaction over `engine`.
    pub fn begin(engine: Engine) -> Self {
        let dir = engine.transactions_dir();
        let op = AtomicOperation::begin(engine);
        let backup = dir.join(format!("{}.txn", op.id));
        Self { op, backup }
    }

    /// The snapshot version this transaction reads at.
    pub fn snapshot(&self) -> u64 {
        self.op.snapshot()
    }

    /// Abort the next commit if the transaction idles longer than `d`.
    pub fn set_idle_timeout(&mut self, d: Duration) {
        self.op.set_idle_timeout(d);
    }

    /// See [`AtomicOperation::fetch`].
    pub fn fetch(
        &mut self,
        key: &str,
        record: Identifier,
    ) -> Result<HashSet<Value>, TransactionError> {
        self.op.fetch(key, record)
    }

    /// See [`AtomicOperation::verify`].
    pub fn verify(
        &mut self,
        key: &str,
        value: &Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.op.verify(key, value, record)
    }

    /// See [`AtomicOperation::select`].
    pub fn select(
        &mut self,
        record: Identifier,
    ) -> Result<std::collections::BTreeMap<String, HashSet<Value>>, TransactionError> {
        self.op.select(record)
    }

    /// See [`AtomicOperation::browse`].
    pub fn browse(
        &mut self,
        key: &str,
    ) -> Result<std::collections::BTreeMap<Value, HashSet<Identifier>>, TransactionError> {
        self.op.browse(key)
    }

    /// See [`AtomicOperation::browse_at`].
    pub fn browse_at(
        &mut self,
        key: &str,
        at: u64,
    ) -> Result<std::collections::BTreeMap<Value, HashSet<Identifier>>, TransactionError> {
        self.op.browse_at(key, at)
    }

    /// See [`AtomicOperation::find`].
    pub fn find(
        &mut self,
        key: &str,
        operator: Operator,
        values: &[Value],
    ) -> Result<HashSet<Identifier>, TransactionError> {
        self.op.find(key, operator, values)
    }

    /// See [`AtomicOperation::add`].
    pub fn add(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.op.add(key, value, record)
    }

    /// See [`AtomicOperation::remove`].
    pub fn remove(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<bool, TransactionError> {
        self.op.remove(key, value, record)
    }

    /// See [`AtomicOperation::set`].
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        record: Identifier,
    ) -> Result<(), TransactionError> {
        self.op.set(key, value, record)
    }

    /// Commit with durability: validated writes are persisted to the backup
    /// file before application, and the backup is removed afterwards.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        let backup = self.backup.clone();
        let result = self.op.commit_with(Some(&|writes: &[Write]| {
            write_backup(&backup, writes)
        }));
        match result {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&self.backup) {
                    // The backup is replay-idempotent, so a leftover file is
                    // harmless; recovery will clean it up.
                    warn!(path = %self.backup.display(), error = %e,
                        "failed to remove committed transaction backup");
                }
                info!(path = %self.backup.display(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&self.backup);
                Err(e)
            }
        }
    }

    /// Abort: discard queued writes and release all claims.
    pub fn abort(mut self) {
        self.op.abort();
    }
}

// ------------------------------------------------------------------------------------------------
// Backup file I/O
// ------------------------------------------------------------------------------------------------

/// Serialize stamped writes as `[u32 len][write bytes][u32 crc]` frames and
/// fsync.
fn write_backup(path: &PathBuf, writes: &[Write]) -> Result<(), TransactionError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for write in writes {
        let bytes = encode_to_vec(write)?;
        let len = (bytes.len() as u32).to_be_bytes();
        let mut hasher = Crc32::new();
        hasher.update(&len);
        hasher.update(&bytes);
        file.write_all(&len)?;
        file.write_all(&bytes)?;
        file.write_all(&hasher.finalize().to_be_bytes())?;
    }
    file.sync_all()?;
    Ok(())
}

/// Decode a backup file.  Returns `None` when the file is torn (a crash hit
/// the backup write itself — the transaction never started applying).
fn read_backup(path: &PathBuf) -> Result<Option<Vec<Write>>, TransactionError> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut writes = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        if cursor + 4 > bytes.len() {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            bytes[cursor],
            bytes[cursor + 1],
            bytes[cursor + 2],
            bytes[cursor + 3],
        ]) as usize;
        if cursor + 4 + len + 4 > bytes.len() {
            return Ok(None);
        }
        let payload = &bytes[cursor + 4..cursor + 4 + len];
        let stored_crc = u32::from_be_bytes([
            bytes[cursor + 4 + len],
            bytes[cursor + 4 + len + 1],
            bytes[cursor + 4 + len + 2],
            bytes[cursor + 4 + len + 3],
        ]);
        let mut hasher = Crc32::new();
        hasher.update(&bytes[cursor..cursor + 4]);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Ok(None);
        }
        match Write::decode_from(payload) {
            Ok((write, _)) => writes.push(write),
            Err(_) => return Ok(None),
        }
        cursor += 4 + len + 4;
    }
    Ok(Some(writes))
}

/// Replay every transaction backup present on disk.
///
/// A complete backup means validation passed and application may have been
/// interrupted: each write is re-applied unless its exact revision version
/// is already stored.  Torn backups never applied anything and are deleted.
/// Returns the number of writes applied.
pub(crate) fn recover_backups(engine: &Engine) -> Result<usize, EngineError> {
    let dir = engine.transactions_dir();
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txn"))
        .collect();
    paths.sort();

    let mut applied = 0usize;
    for path in paths {
        let writes = match read_backup(&path) {
            Ok(Some(writes)) => writes,
            Ok(None) => {
                warn!(path = %path.display(), "discarding torn transaction backup");
                let _ = fs::remove_file(&path);
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable transaction backup");
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        let ceiling = writes.iter().map(|w| w.version).max().unwrap_or(0);
        engine.shared.clock.advance_past(ceiling);

        for write in writes {
            let existing = engine.table_record(write.record, PRESENT)?;
            if existing.has_version(write.version) {
                continue; // already applied before the crash
            }
            engine.accept(write, true)?;
            applied += 1;
        }

        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove replayed backup");
        } else {
            info!(path = %path.display(), "transaction backup replayed");
        }
    }
    Ok(applied)
}
