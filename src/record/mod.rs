//! # Record Materializations
//!
//! A *record* (second sense) is the in-memory materialization of every
//! revision stored for one locator, replayed out of the segments and the
//! buffer.  Three shapes mirror the three chunk layouts:
//!
//! - [`TableRecord`] — locator = record id; answers fetch/select/describe/
//!   verify/audit for one record.
//! - [`IndexRecord`] — locator = key name; answers find and browse over one
//!   key's values.
//! - [`CorpusRecord`] — locator = (key, token); answers which records
//!   currently contain the token.
//!
//! ## Parity reads
//!
//! Presence follows the odd-count rule: a triple is present at time `t` iff
//! the number of matching revisions with `version <= t` is odd.  Counting is
//! order-independent, so appends need not be sorted; only [`TableRecord::audit`]
//! sorts, because audits are version-ordered by contract.
//!
//! ## Concurrency
//!
//! Records are built by appending matching revisions (segments first, then
//! buffer) and are immutable afterwards.  The database cache shares them
//! behind `Arc`; an entry whose only holder is the cache is eligible for
//! eviction.


use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::model::{Identifier, Value, Write};

/// Read operations with no explicit timestamp read "now": every stored
/// revision qualifies.
pub const PRESENT: u64 = u64::MAX;

// ------------------------------------------------------------------------------------------------
// Parity helper
// ------------------------------------------------------------------------------------------------

/// Fold `writes` (filtered by `version <= at` and a caller-supplied match)
/// into the set of keys whose revision count is odd.
fn parity_fold<K, I>(items: I) -> HashSet<K>
where
    K: std::hash::Hash + Eq,
    I: Iterator<Item = K>,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| count % 2 == 1)
        .map(|(key, _)| key)
        .collect()
}

// ------------------------------------------------------------------------------------------------
// TableRecord
// ------------------------------------------------------------------------------------------------

/// Every revision stored for one record id.
#[derive(Clone, Debug, Default)]
pub struct TableRecord {
    record: Identifier,
    history: Vec<Write>,
}

impl TableRecord {
    /// An empty materialization for `record`.
    pub fn new(record: Identifier) -> Self {
        Self {
            record,
            history: Vec::new(),
        }
    }

    /// The record id this materialization serves.
    pub fn record(&self) -> Identifier {
        self.record
    }

    /// Append one revision during load.  Revisions for other records are
    /// ignored so callers can stream unfiltered chunk ranges in.
    pub fn append(&mut self, write: Write) {
        if write.record == self.record {
            self.history.push(write);
        }
    }

    /// Number of stored revisions.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when the record has no revisions at all.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The largest revision version stored, or 0.
    pub fn latest_version(&self) -> u64 {
        self.history.iter().map(|w| w.version).max().unwrap_or(0)
    }

    /// The largest version stored under `key`, or 0.
    pub fn latest_version_of_key(&self, key: &str) -> u64 {
        self.history
            .iter()
            .filter(|w| w.key.as_str() == key)
            .map(|w| w.version)
            .max()
            .unwrap_or(0)
    }

    /// Whether a revision with exactly `version` is stored.  Transaction
    /// replay uses this to keep backup application idempotent.
    pub fn has_version(&self, version: u64) -> bool {
        self.history.iter().any(|w| w.version == version)
    }

    /// Values present under `key` as of `at`.
    pub fn fetch(&self, key: &str, at: u64) -> HashSet<Value> {
        parity_fold(
            self.history
                .iter()
                .filter(|w| w.version <= at && w.key.as_str() == key)
                .map(|w| w.value.clone()),
        )
    }

    /// Whether `(key, value)` is present as of `at`.
    pub fn verify(&self, key: &str, value: &Value, at: u64) -> bool {
        let matches = self
            .history
            .iter()
            .filter(|w| w.version <= at && w.key.as_str() == key && w.value == *value)
            .count();
        matches % 2 == 1
    }

    /// All non-empty `{key → values}` mappings as of `at`.
    pub fn select(&self, at: u64) -> BTreeMap<String, HashSet<Value>> {
        let mut out: BTreeMap<String, HashSet<Value>> = BTreeMap::new();
        for key in self.keys() {
            let values = self.fetch(&key, at);
            if !values.is_empty() {
                out.insert(key, values);
            }
        }
        out
    }

    /// Keys with at least one present value as of `at`.
    pub fn describe(&self, at: u64) -> BTreeSet<String> {
        self.select(at).into_keys().collect()
    }

    /// Version-ordered `(version, change description)` pairs, optionally
    /// restricted to one key.
    pub fn audit(&self, key: Option<&str>) -> Vec<(u64, String)> {
        let mut entries: Vec<&Write> = self
            .history
            .iter()
            .filter(|w| key.is_none_or(|k| w.key.as_str() == k))
            .collect();
        entries.sort_by_key(|w| w.version);
        entries
            .into_iter()
            .map(|w| (w.version, w.to_string()))
            .collect()
    }

    fn keys(&self) -> BTreeSet<String> {
        self.history
            .iter()
            .map(|w| w.key.as_str().to_string())
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// IndexRecord
// ------------------------------------------------------------------------------------------------

/// Every revision stored under one key, across all records.
#[derive(Clone, Debug, Default)]
pub struct IndexRecord {
    key: String,
    history: Vec<Write>,
}

impl IndexRecord {
    /// An empty materialization for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            history: Vec::new(),
        }
    }

    /// The key this materialization serves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append one revision during load.
    pub fn append(&mut self, write: Write) {
        if write.key.as_str() == self.key {
            self.history.push(write);
        }
    }

    /// Number of stored revisions.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when the key has no revisions at all.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The largest revision version stored, or 0.
    pub fn latest_version(&self) -> u64 {
        self.history.iter().map(|w| w.version).max().unwrap_or(0)
    }

    /// The largest stored version among revisions whose value satisfies
    /// `predicate`.  Used for range-conflict validation.
    pub fn latest_version_matching(&self, predicate: impl Fn(&Value) -> bool) -> u64 {
        self.history
            .iter()
            .filter(|w| predicate(&w.value))
            .map(|w| w.version)
            .max()
            .unwrap_or(0)
    }

    /// Records for which `value` is present under this key as of `at`.
    pub fn find_eq(&self, value: &Value, at: u64) -> HashSet<Identifier> {
        parity_fold(
            self.history
                .iter()
                .filter(|w| w.version <= at && w.value == *value)
                .map(|w| w.record),
        )
    }

    /// Sorted `{value → records}` mapping of everything present as of `at`.
    pub fn browse(&self, at: u64) -> BTreeMap<Value, HashSet<Identifier>> {
        let pairs = parity_fold(
            self.history
                .iter()
                .filter(|w| w.version <= at)
                .map(|w| (w.value.clone(), w.record)),
        );
        let mut out: BTreeMap<Value, HashSet<Identifier>> = BTreeMap::new();
        for (value, record) in pairs {
            out.entry(value).or_default().insert(record);
        }
        out
    }

    /// Records holding any present value that satisfies `predicate` as of
    /// `at`.  Backs the range and pattern operators.
    pub fn find_matching(
        &self,
        at: u64,
        predicate: impl Fn(&Value) -> bool,
    ) -> HashSet<Identifier> {
        self.browse(at)
            .into_iter()
            .filter(|(value, _)| predicate(value))
            .flat_map(|(_, records)| records)
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// CorpusRecord
// ------------------------------------------------------------------------------------------------

/// Every token revision stored for one (key, token) term.
#[derive(Clone, Debug, Default)]
pub struct CorpusRecord {
    key: String,
    token: String,
    history: Vec<Write>,
}

impl CorpusRecord {
    /// An empty materialization for `(key, token)`.
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            history: Vec::new(),
        }
    }

    /// The term this materialization serves.
    pub fn term(&self) -> (&str, &str) {
        (&self.key, &self.token)
    }

    /// Append one token revision during load.
    pub fn append(&mut self, write: Write) {
        self.history.push(write);
    }

    /// Number of stored token revisions.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when the term has no revisions at all.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Records whose indexed text contains the token as of `at`.
    pub fn records(&self, at: u64) -> HashSet<Identifier> {
        parity_fold(
            self.history
                .iter()
                .filter(|w| w.version <= at)
                .map(|w| w.record),
        )
    }
}
