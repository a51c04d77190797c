//! # Lock Services
//!
//! Two cooperating services serialize conflicting work:
//!
//! - [`LockService`] hands out reference-counted read/write locks keyed by
//!   [`Token`]s — canonical hashes of a lock scope such as `(record)`,
//!   `(record, key)`, or `(key, value)`.  A background GC removes entries
//!   whose refcount has dropped to zero; acquisition increments the count
//!   under the registry mutex, so the increment-then-verify race against GC
//!   is resolved by construction.
//!
//! - [`RangeLockService`] covers `BETWEEN`/`>`/`<` predicates.  Readers
//!   register **range** claims over a key's value space; writers claim
//!   **points**.  A write conflicts with a read iff the point falls inside
//!   the range (endpoints may be inclusive or exclusive).  Registration is
//!   try-style: a conflicting claim is reported, not waited on, so lock
//!   composition can never deadlock.
//!
//! [`Interval`] carries the endpoint algebra (contains / intersects /
//! union / intersection / symmetric difference) used to compose range
//! claims.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{Identifier, Value};

// ------------------------------------------------------------------------------------------------
// Token
// ------------------------------------------------------------------------------------------------

/// A canonical hash of a lock scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

/// FNV-1a over the scope bytes: deterministic, allocation-free.
fn fnv1a(parts: &[&[u8]]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        // Length framing keeps adjacent fields from aliasing.
        for byte in (part.len() as u32).to_be_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x1000_0000_01b3);
        }
        for &byte in *part {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x1000_0000_01b3);
        }
    }
    hash
}

impl Token {
    /// Scope: a whole record.
    pub fn for_record(record: Identifier) -> Self {
        Self(fnv1a(&[b"r", &record.to_be_bytes()]))
    }

    /// Scope: one field of one record.
    pub fn for_field(record: Identifier, key: &str) -> Self {
        Self(fnv1a(&[b"f", &record.to_be_bytes(), key.as_bytes()]))
    }

    /// Scope: one key across all records.
    pub fn for_key(key: &str) -> Self {
        Self(fnv1a(&[b"k", key.as_bytes()]))
    }

    /// Scope: one (key, value) point.
    pub fn for_value(key: &str, value: &Value) -> Self {
        Self(fnv1a(&[b"v", key.as_bytes(), &value.canonical_bytes()]))
    }
}

// ------------------------------------------------------------------------------------------------
// LockService
// ------------------------------------------------------------------------------------------------

struct LockEntry {
    refs: AtomicUsize,
    lock: RwLock<()>,
}

/// A reference-counted handle to one token's lock.  Dropping the handle
/// releases the reference; the entry becomes GC-eligible at zero.
pub struct LockHandle {
    entry: Arc<LockEntry>,
}

impl LockHandle {
    /// Acquire the shared (read) side.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.entry.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire the exclusive (write) side.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.entry.lock.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.entry.refs.fetch_sub(1, Ordering::Release);
    }
}

/// Registry of per-token read/write locks.
pub struct LockService {
    entries: Mutex<HashMap<Token, Arc<LockEntry>>>,
}

impl LockService {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for `token`, incrementing its refcount.
    pub fn get_lock(&self, token: Token) -> LockHandle {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries
            .entry(token)
            .or_insert_with(|| {
                Arc::new(LockEntry {
                    refs: AtomicUsize::new(0),
                    lock: RwLock::new(()),
                })
            })
            .clone();
        // Incremented under the registry mutex: GC running under the same
        // mutex can never observe a stale zero for a live handle.
        entry.refs.fetch_add(1, Ordering::Acquire);
        LockHandle { entry }
    }

    /// Drop entries no handle refers to.  Returns the number removed.
    pub fn gc(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.refs.load(Ordering::Acquire) > 0);
        before - entries.len()
    }

    /// Number of live registry entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// True when the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// Interval algebra
// ------------------------------------------------------------------------------------------------

/// One end of an interval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub value: Value,
    pub inclusive: bool,
}

/// A (possibly unbounded) interval over the total value order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    /// Lower bound; `None` means unbounded below.
    pub low: Option<Endpoint>,
    /// Upper bound; `None` means unbounded above.
    pub high: Option<Endpoint>,
}

impl Interval {
    /// The degenerate interval `[value, value]`.
    pub fn point(value: Value) -> Self {
        Self {
            low: Some(Endpoint {
                value: value.clone(),
                inclusive: true,
            }),
            high: Some(Endpoint {
                value,
                inclusive: true,
            }),
        }
    }

    /// `[low, high)` — the BETWEEN convention.
    pub fn between(low: Value, high: Value) -> Self {
        Self {
            low: Some(Endpoint {
                value: low,
                inclusive: true,
            }),
            high: Some(Endpoint {
                value: high,
                inclusive: false,
            }),
        }
    }

    /// `(low, ∞)` or `[low, ∞)`.
    pub fn above(low: Value, inclusive: bool) -> Self {
        Self {
            low: Some(Endpoint {
                value: low,
                inclusive,
            }),
            high: None,
        }
    }

    /// `(-∞, high)` or `(-∞, high]`.
    pub fn below(high: Value, inclusive: bool) -> Self {
        Self {
            low: None,
            high: Some(Endpoint {
                value: high,
                inclusive,
            }),
        }
    }

    /// The unbounded interval.
    pub fn all() -> Self {
        Self {
            low: None,
            high: None,
        }
    }

    /// Whether `value` falls inside the interval.
    pub fn contains(&self, value: &Value) -> bool {
        if let Some(low) = &self.low {
            match value.compare(&low.value) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Equal if !low.inclusive => return false,
                _ => {}
            }
        }
        if let Some(high) = &self.high {
            match value.compare(&high.value) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if !high.inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Whether the two intervals share at least one value.
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    /// The common sub-interval, if any.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let low = match (&self.low, &other.low) {
            (None, b) => b.clone(),
            (a, None) => a.clone(),
            (Some(a), Some(b)) => Some(max_low(a, b).clone()),
        };
        let high = match (&self.high, &other.high) {
            (None, b) => b.clone(),
            (a, None) => a.clone(),
            (Some(a), Some(b)) => Some(min_high(a, b).clone()),
        };
        let candidate = Self { low, high };
        if candidate.is_void() {
            None
        } else {
            Some(candidate)
        }
    }

    /// The single covering interval when the two overlap or touch, `None`
    /// when they are disjoint (a union of disjoint intervals is not an
    /// interval).
    pub fn union(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) && !self.touches(other) {
            return None;
        }
        let low = match (&self.low, &other.low) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(min_low(a, b).clone()),
        };
        let high = match (&self.high, &other.high) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(max_high(a, b).clone()),
        };
        Some(Self { low, high })
    }

    /// The parts covered by exactly one of the two intervals.
    pub fn symmetric_difference(&self, other: &Self) -> Vec<Self> {
        let Some(common) = self.intersection(other) else {
            return vec![self.clone(), other.clone()];
        };
        let Some(whole) = self.union(other) else {
            return vec![self.clone(), other.clone()];
        };

        let mut out = Vec::new();
        // Left remainder: [whole.low, common.low)
        if whole.low != common.low {
            out.push(Self {
                low: whole.low.clone(),
                high: common.low.as_ref().map(|e| Endpoint {
                    value: e.value.clone(),
                    inclusive: !e.inclusive,
                }),
            });
        }
        // Right remainder: (common.high, whole.high]
        if whole.high != common.high {
            out.push(Self {
                low: common.high.as_ref().map(|e| Endpoint {
                    value: e.value.clone(),
                    inclusive: !e.inclusive,
                }),
                high: whole.high.clone(),
            });
        }
        out
    }

    /// True when no value can satisfy both bounds.
    fn is_void(&self) -> bool {
        match (&self.low, &self.high) {
            (Some(low), Some(high)) => match low.value.compare(&high.value) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => !(low.inclusive && high.inclusive),
                std::cmp::Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// True when the intervals are adjacent with no gap (e.g. `[a, b)` and
    /// `[b, c]`).
    fn touches(&self, other: &Self) -> bool {
        let adjacent = |high: &Option<Endpoint>, low: &Option<Endpoint>| -> bool {
            match (high, low) {
                (Some(h), Some(l)) => {
                    h.value == l.value && (h.inclusive || l.inclusive)
                }
                _ => false,
            }
        };
        adjacent(&self.high, &other.low) || adjacent(&other.high, &self.low)
    }
}

fn max_low<'a>(a: &'a Endpoint, b: &'a Endpoint) -> &'a Endpoint {
    match a.value.compare(&b.value) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        // Same value: the exclusive bound is the tighter lower bound.
        std::cmp::Ordering::Equal => {
            if a.inclusive {
                b
            } else {
                a
            }
        }
    }
}

fn min_low<'a>(a: &'a Endpoint, b: &'a Endpoint) -> &'a Endpoint {
    match a.value.compare(&b.value) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal => {
            if a.inclusive {
                a
            } else {
                b
            }
        }
    }
}

fn min_high<'a>(a: &'a Endpoint, b: &'a Endpoint) -> &'a Endpoint {
    match a.value.compare(&b.value) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal => {
            if a.inclusive {
                b
            } else {
                a
            }
        }
    }
}

fn max_high<'a>(a: &'a Endpoint, b: &'a Endpoint) -> &'a Endpoint {
    match a.value.compare(&b.value) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => {
            if a.inclusive {
                a
            } else {
                b
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// RangeLockService
// ------------------------------------------------------------------------------------------------

/// An operation id that owns range/point claims.
pub type Owner = u64;

#[derive(Default)]
struct KeyClaims {
    readers: Vec<(Owner, Interval)>,
    writers: Vec<(Owner, Value)>,
}

/// Registry of range (reader) and point (writer) claims per key.
pub struct RangeLockService {
    claims: Mutex<HashMap<String, KeyClaims>>,
}

impl RangeLockService {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Register a reader's range claim.  Never blocks; conflicts are
    /// detected by the writers at their registration.
    pub fn register_read(&self, owner: Owner, key: &str, interval: Interval) {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims
            .entry(key.to_string())
            .or_default()
            .readers
            .push((owner, interval));
    }

    /// Try to register a writer's point claim.
    ///
    /// Fails (returning `false`, registering nothing) when another owner's
    /// range claim contains the point — the point-in-range conflict rule.
    pub fn try_register_write(&self, owner: Owner, key: &str, value: &Value) -> bool {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        let entry = claims.entry(key.to_string()).or_default();
        let conflicted = entry
            .readers
            .iter()
            .any(|(holder, interval)| *holder != owner && interval.contains(value));
        if conflicted {
            return false;
        }
        entry.writers.push((owner, value.clone()));
        true
    }

    /// Whether another owner already holds a point inside `interval`.
    /// Readers use this to fail fast before registering.
    pub fn range_conflicts(&self, owner: Owner, key: &str, interval: &Interval) -> bool {
        let claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims
            .get(key)
            .map(|entry| {
                entry
                    .writers
                    .iter()
                    .any(|(holder, value)| *holder != owner && interval.contains(value))
            })
            .unwrap_or(false)
    }

    /// Drop every claim held by `owner`.
    pub fn release(&self, owner: Owner) {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.retain(|_, entry| {
            entry.readers.retain(|(holder, _)| *holder != owner);
            entry.writers.retain(|(holder, _)| *holder != owner);
            !entry.readers.is_empty() || !entry.writers.is_empty()
        });
    }
}

impl Default for RangeLockService {
    fn default() -> Self {
        Self::new()
    }
}
