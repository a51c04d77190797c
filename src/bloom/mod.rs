//! Probabilistic membership for revision composites.
//!
//! Every sealed chunk carries a bloom filter keyed by **composites** —
//! length-prefixed concatenations of canonical field bytes such as
//! `(record)`, `(record, key)`, or `(record, key, value)`.  A negative
//! answer is authoritative: if [`BloomFilter::might_contain`] returns
//! `false`, the chunk holds no revision with that composite.
//!
//! # Lifecycle
//!
//! While a chunk is mutable the filter keeps an **exact** set of composite
//! bytes, so the building phase has no false positives at all.  At
//! [`BloomFilter::freeze`] the exact set is folded into a sized
//! `bloomfilter::Bloom` (sized from the true insert count, 3% false-positive
//! target by default) and serialized.  [`BloomFilter::load`] restores the
//! frozen form from chunk bytes.
//!
//! # Concurrency
//!
//! Frozen filters are immutable and therefore lock-free to query.  Mutable
//! filters are owned by their chunk and protected by the chunk's write lock.

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use bloomfilter::Bloom;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default false-positive target for frozen filters.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.03;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by bloom filter operations.
#[derive(Debug, Error)]
pub enum BloomError {
    /// Mutation was attempted after the filter was frozen.
    #[error("bloom filter is frozen")]
    Frozen,

    /// Serialized filter bytes could not be restored.
    #[error("corrupt bloom filter: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Composite
// ------------------------------------------------------------------------------------------------

/// A bloom key: canonical field bytes joined with length prefixes so that
/// adjacent fields can never alias (`("ab", "c")` ≠ `("a", "bc")`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Composite(Vec<u8>);

impl Composite {
    /// Build a composite from ordered canonical field bytes.
    pub fn of(parts: &[&[u8]]) -> Self {
        let total: usize = parts.iter().map(|p| p.len() + 4).sum();
        let mut bytes = Vec::with_capacity(total);
        for part in parts {
            bytes.extend_from_slice(&(part.len() as u32).to_be_bytes());
            bytes.extend_from_slice(part);
        }
        Self(bytes)
    }

    /// The composite byte string.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

// ------------------------------------------------------------------------------------------------
// BloomFilter
// ------------------------------------------------------------------------------------------------

/// A chunk-scoped membership filter over [`Composite`] keys.
pub enum BloomFilter {
    /// Mutable phase: exact membership, no false positives.
    Building {
        /// Every composite inserted so far.
        seen: HashSet<Vec<u8>>,
    },

    /// Immutable phase: space-efficient probabilistic membership.
    Frozen {
        /// The sized probabilistic filter.
        bloom: Bloom<Vec<u8>>,
    },
}

impl BloomFilter {
    /// A fresh, mutable filter.
    pub fn new() -> Self {
        Self::Building {
            seen: HashSet::new(),
        }
    }

    /// Record a composite.  Fails once the filter is frozen.
    pub fn insert(&mut self, composite: &Composite) -> Result<(), BloomError> {
        match self {
            Self::Building { seen } => {
                seen.insert(composite.bytes().to_vec());
                Ok(())
            }
            Self::Frozen { .. } => Err(BloomError::Frozen),
        }
    }

    /// Whether the filter may contain `composite`.
    ///
    /// `false` is authoritative; `true` may be a false positive (frozen
    /// phase only — the building phase is exact).
    pub fn might_contain(&self, composite: &Composite) -> bool {
        match self {
            Self::Building { seen } => seen.contains(composite.bytes()),
            Self::Frozen { bloom } => bloom.check(&composite.bytes().to_vec()),
        }
    }

    /// Number of distinct composites recorded during the building phase.
    pub fn len(&self) -> usize {
        match self {
            Self::Building { seen } => seen.len(),
            Self::Frozen { .. } => 0,
        }
    }

    /// True when no composites have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seal the filter at the given false-positive rate and return its
    /// serialized form.  The filter flips to the frozen phase.
    pub fn freeze(&mut self, fp_rate: f64) -> Result<Vec<u8>, BloomError> {
        let seen = match self {
            Self::Building { seen } => std::mem::take(seen),
            Self::Frozen { .. } => return Err(BloomError::Frozen),
        };

        let mut bloom = Bloom::new_for_fp_rate(seen.len().max(1), fp_rate)
            .map_err(|e| BloomError::Corrupt(e.to_string()))?;
        for composite in &seen {
            bloom.set(composite);
        }
        let bytes = bloom.as_slice().to_vec();
        *self = Self::Frozen { bloom };
        Ok(bytes)
    }

    /// Restore a frozen filter from serialized bytes.
    pub fn load(bytes: &[u8]) -> Result<Self, BloomError> {
        let bloom =
            Bloom::from_slice(bytes).map_err(|e| BloomError::Corrupt(e.to_string()))?;
        Ok(Self::Frozen { bloom })
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Building { seen } => f
                .debug_struct("BloomFilter::Building")
                .field("seen", &seen.len())
                .finish(),
            Self::Frozen { .. } => f.debug_struct("BloomFilter::Frozen").finish_non_exhaustive(),
        }
    }
}
