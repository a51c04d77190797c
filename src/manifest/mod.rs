//! # Chunk Manifest
//!
//! A **manifest** maps each locator in a sealed chunk to the byte range its
//! revisions occupy inside the chunk's revision section.  Reads use it to
//! seek directly to one locator's revisions instead of scanning the chunk.
//!
//! ## Lifecycle
//!
//! - **Building** — the chunk writer calls [`Manifest::put_start`] /
//!   [`Manifest::put_end`] while streaming sorted revisions out.
//! - **Flush** — [`Manifest::flush`] serializes the entries and freezes the
//!   manifest; further mutation fails.
//! - **Load** — [`Manifest::load`] wraps a byte window of a segment file and
//!   defers all reading until the first [`Manifest::lookup`].
//!
//! ## Two load strategies
//!
//! Small manifests (at most [`STREAMING_THRESHOLD`] entries) are decoded in
//! one pass into a sorted map on first lookup.  Larger manifests are scanned
//! entry-by-entry through the memory-mapped window on demand, with per-locator
//! result caching, so a lookup never materializes the full entry set.
//!
//! # Wire format
//!
//! ```text
//! [u32 entry_count]
//! [u32 locator_len][locator bytes][u64 start][u64 end]   × entry_count, sorted by locator
//! ```

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Entry count above which a loaded manifest is scanned lazily instead of
/// being decoded whole.
pub const STREAMING_THRESHOLD: u32 = 4096;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Mutation was attempted after the manifest was flushed.
    #[error("manifest is frozen")]
    Frozen,

    /// `put_end` was called for a locator with no open `put_start`.
    #[error("no open entry for locator")]
    NoOpenEntry,

    /// An entry was left without an end offset at flush time.
    #[error("unclosed entry at flush")]
    UnclosedEntry,

    /// Encoding / decoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The serialized form is internally inconsistent.
    #[error("corrupt manifest: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Entry range
// ------------------------------------------------------------------------------------------------

/// A half-open `[start, end)` byte range inside a chunk's revision section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryRange {
    /// First byte of the locator's revisions.
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
}

impl EntryRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True when the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

// ------------------------------------------------------------------------------------------------
// Backing storage for loaded manifests
// ------------------------------------------------------------------------------------------------

/// Bytes a loaded manifest reads from: a window of a segment mmap, or an
/// owned buffer (tests, small chunks).
#[derive(Clone)]
pub enum ManifestSource {
    /// A `[offset, offset + len)` window of a shared segment mapping.
    Mapped {
        mmap: Arc<Mmap>,
        offset: usize,
        len: usize,
    },
    /// An owned byte buffer.
    Owned(Arc<Vec<u8>>),
}

impl ManifestSource {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped { mmap, offset, len } => &mmap[*offset..*offset + *len],
            Self::Owned(bytes) => bytes,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Tracks where an in-progress entry starts and ends.
#[derive(Clone, Copy, Debug)]
struct PendingSpan {
    start: u64,
    end: Option<u64>,
}

/// State of a loaded (read-side) manifest.
struct Loaded {
    source: ManifestSource,
    entry_count: u32,
    /// Fully decoded entries, populated on first lookup for small manifests.
    eager: OnceLock<BTreeMap<Vec<u8>, EntryRange>>,
    /// Per-locator lookup results for streamed (large) manifests.
    cache: Mutex<HashMap<Vec<u8>, Option<EntryRange>>>,
}

enum State {
    /// Mutable, write-side phase.
    Building {
        entries: BTreeMap<Vec<u8>, PendingSpan>,
        frozen: bool,
    },
    /// Read-side phase backed by serialized bytes.
    Loaded(Loaded),
}

/// A sorted map from locator bytes to the byte range of that locator's
/// revisions.  See the module docs for lifecycle and format.
pub struct Manifest {
    state: State,
}

impl Manifest {
    /// A fresh, mutable manifest.
    pub fn new() -> Self {
        Self {
            state: State::Building {
                entries: BTreeMap::new(),
                frozen: false,
            },
        }
    }

    /// Open an entry: `offset` is the first byte of `locator`'s revisions.
    pub fn put_start(&mut self, offset: u64, locator: &[u8]) -> Result<(), ManifestError> {
        match &mut self.state {
            State::Building { entries, frozen } => {
                if *frozen {
                    return Err(ManifestError::Frozen);
                }
                entries.insert(
                    locator.to_vec(),
                    PendingSpan {
                        start: offset,
                        end: None,
                    },
                );
                Ok(())
            }
            State::Loaded(_) => Err(ManifestError::Frozen),
        }
    }

    /// Close an entry: `offset` is one past the last byte of `locator`'s
    /// revisions.
    pub fn put_end(&mut self, offset: u64, locator: &[u8]) -> Result<(), ManifestError> {
        match &mut self.state {
            State::Building { entries, frozen } => {
                if *frozen {
                    return Err(ManifestError::Frozen);
                }
                let span = entries
                    .get_mut(locator)
                    .ok_or(ManifestError::NoOpenEntry)?;
                span.end = Some(offset);
                Ok(())
            }
            State::Loaded(_) => Err(ManifestError::Frozen),
        }
    }

    /// Number of entries recorded or loaded.
    pub fn length(&self) -> u64 {
        match &self.state {
            State::Building { entries, .. } => entries.len() as u64,
            State::Loaded(loaded) => loaded.entry_count as u64,
        }
    }

    /// Serialize all entries and freeze the manifest.
    ///
    /// Every opened entry must have been closed with [`Manifest::put_end`].
    pub fn flush(&mut self) -> Result<Vec<u8>, ManifestError> {
        match &mut self.state {
            State::Building { entries, frozen } => {
                if *frozen {
                    return Err(ManifestError::Frozen);
                }
                let mut buf = Vec::new();
                (entries.len() as u32).encode_to(&mut buf)?;
                for (locator, span) in entries.iter() {
                    let end = span.end.ok_or(ManifestError::UnclosedEntry)?;
                    locator.encode_to(&mut buf)?;
                    span.start.encode_to(&mut buf)?;
                    end.encode_to(&mut buf)?;
                }
                *frozen = true;
                Ok(buf)
            }
            State::Loaded(_) => Err(ManifestError::Frozen),
        }
    }

    /// Wrap serialized manifest bytes without reading them.  Entries are
    /// decoded lazily on the first [`Manifest::lookup`].
    pub fn load(source: ManifestSource) -> Result<Self, ManifestError> {
        let bytes = source.as_slice();
        let (entry_count, _) = u32::decode_from(bytes)?;
        Ok(Self {
            state: State::Loaded(Loaded {
                source,
                entry_count,
                eager: OnceLock::new(),
                cache: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The byte range for `locator`, or `None` if the chunk has no
    /// revisions for it.
    pub fn lookup(&self, locator: &[u8]) -> Result<Option<EntryRange>, ManifestError> {
        match &self.state {
            State::Building { entries, .. } => Ok(entries.get(locator).and_then(|span| {
                span.end.map(|end| EntryRange {
                    start: span.start,
                    end,
                })
            })),
            State::Loaded(loaded) => {
                if loaded.entry_count <= STREAMING_THRESHOLD {
                    self.lookup_eager(loaded, locator)
                } else {
                    self.lookup_streamed(loaded, locator)
                }
            }
        }
    }

    /// Decode the whole entry set once and answer from the sorted map.
    fn lookup_eager(
        &self,
        loaded: &Loaded,
        locator: &[u8],
    ) -> Result<Option<EntryRange>, ManifestError> {
        if let Some(map) = loaded.eager.get() {
            return Ok(map.get(locator).copied());
        }
        let map = decode_entries(loaded.source.as_slice(), loaded.entry_count, None)?
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        let map = loaded.eager.get_or_init(|| map);
        Ok(map.get(locator).copied())
    }

    /// Scan the mapped window entry-by-entry, stopping early thanks to the
    /// sorted order, and cache the verdict for repeat lookups.
    fn lookup_streamed(
        &self,
        loaded: &Loaded,
        locator: &[u8],
    ) -> Result<Option<EntryRange>, ManifestError> {
        if let Ok(cache) = loaded.cache.lock() {
            if let Some(hit) = cache.get(locator) {
                return Ok(*hit);
            }
        }

        let found = decode_entries(
            loaded.source.as_slice(),
            loaded.entry_count,
            Some(locator),
        )?
        .into_iter()
        .next()
        .map(|(_, range)| range);

        if let Ok(mut cache) = loaded.cache.lock() {
            cache.insert(locator.to_vec(), found);
        }
        Ok(found)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("entries", &self.length())
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Wire helpers
// ------------------------------------------------------------------------------------------------

/// Decode manifest entries from `bytes`.
///
/// With `target = Some(locator)` the scan stops at the first match (or as
/// soon as the sorted order proves the locator absent) and returns at most
/// one entry.  With `target = None` every entry is returned.
fn decode_entries(
    bytes: &[u8],
    entry_count: u32,
    target: Option<&[u8]>,
) -> Result<Vec<(Vec<u8>, EntryRange)>, ManifestError> {
    let mut off = 4; // past [u32 entry_count]
    let mut out = Vec::new();

    for _ in 0..entry_count {
        let (locator, n) = Vec::<u8>::decode_from(&bytes[off..])?;
        off += n;
        let (start, n) = u64::decode_from(&bytes[off..])?;
        off += n;
        let (end, n) = u64::decode_from(&bytes[off..])?;
        off += n;

        if end < start {
            return Err(ManifestError::Corrupt(format!(
                "entry range end {end} precedes start {start}"
            )));
        }

        match target {
            Some(wanted) => {
                if locator.as_slice() == wanted {
                    out.push((locator, EntryRange { start, end }));
                    return Ok(out);
                }
                if locator.as_slice() > wanted {
                    // Sorted order: the locator cannot appear later.
                    return Ok(out);
                }
            }
            None => out.push((locator, EntryRange { start, end })),
        }
    }

    Ok(out)
}
