//! # Revision Chunks
//!
//! A **chunk** is a block of revisions sharing one of three layouts, named by
//! the locator that sorts it:
//!
//! - **Table** — locator = record id; sort `(record, key, value, version)`.
//!   Serves record-oriented reads (fetch/select/describe/audit).
//! - **Index** — locator = key name; sort `(key, value, record, version)`.
//!   Serves value-oriented find queries.
//! - **Corpus** — locator = (key, substring token); sort
//!   `(key, token, record, version)`.  Serves full-text search.  Only STRING
//!   values are indexed; each write fans out into one revision per distinct
//!   substring token (length-capped, stop-words removed).
//!
//! ## Lifecycle
//!
//! A chunk starts **mutable**: [`Chunk::insert`] appends revisions and feeds
//! the chunk's bloom filter.  [`Chunk::freeze`] sorts the revisions by the
//! chunk's sort key, serializes them grouped by locator, and emits the three
//! byte sections a segment stores: bloom, manifest, revisions.  After freeze
//! the chunk rejects inserts.
//!
//! The read side is [`SealedChunk`]: a window over a segment file plus the
//! loaded bloom and manifest, answering [`SealedChunk::seek`] for a single
//! locator without touching the rest of the block.
//!
//! ## Invariants
//!
//! - Identical composites are **not** deduplicated; every revision is
//!   recorded (presence is parity, not overwrite).
//! - Within a frozen chunk, revisions with the same (locator, key, value)
//!   appear in version order.
//! - If the bloom answers "absent" for a composite, the chunk holds no
//!   revision with that composite.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use memmap2::Mmap;
use thiserror::Error;
use tracing::trace;

use crate::bloom::{BloomError, BloomFilter, Composite};
use crate::encoding::{Decode, Encode, EncodingError, encode_to_vec};
use crate::manifest::{Manifest, ManifestError, ManifestSource};
use crate::model::{Identifier, Value, Write};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default cap on corpus substring token length, in characters.
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 10;

/// Words excluded from the corpus index and from search queries.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by chunk operations.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Insert was attempted after the chunk was frozen.
    #[error("chunk is frozen")]
    Frozen,

    /// Bloom filter failure.
    #[error("bloom error: {0}")]
    Bloom(#[from] BloomError),

    /// Manifest failure.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Encoding / decoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A manifest range points outside the revision section.
    #[error("revision range out of bounds: {0}")]
    RangeOutOfBounds(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Chunk kind & locators
// ------------------------------------------------------------------------------------------------

/// The three chunk layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Table,
    Index,
    Corpus,
}

/// The primary sort key of a chunk: a record id, a key name, or a
/// (key, token) term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Locator {
    /// Table chunks: a record id.
    Record(Identifier),
    /// Index chunks: a key name.
    Key(String),
    /// Corpus chunks: a (key, substring token) term.
    Term { key: String, token: String },
}

impl Locator {
    /// Canonical locator bytes, as stored in manifest entries.
    ///
    /// Term locators trim trailing whitespace from the field key before
    /// hashing; lookups normalize the same way, so data written before the
    /// trim was introduced is still reachable.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Record(id) => id.to_be_bytes().to_vec(),
            Self::Key(key) => key.as_bytes().to_vec(),
            Self::Term { key, token } => {
                let key = key.trim_end();
                let mut out = Vec::with_capacity(key.len() + 1 + token.len());
                out.extend_from_slice(key.as_bytes());
                out.push(0);
                out.extend_from_slice(token.as_bytes());
                out
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Composites
// ------------------------------------------------------------------------------------------------

/// Composite for a whole record in a table chunk.
pub fn table_composite_record(record: Identifier) -> Composite {
    Composite::of(&[&record.to_be_bytes()])
}

/// Composite for a (record, key) field in a table chunk.
pub fn table_composite_field(record: Identifier, key: &str) -> Composite {
    Composite::of(&[&record.to_be_bytes(), key.as_bytes()])
}

/// Composite for a full (record, key, value) triple in a table chunk.
pub fn table_composite(record: Identifier, key: &str, value: &Value) -> Composite {
    Composite::of(&[
        &record.to_be_bytes(),
        key.as_bytes(),
        &value.canonical_bytes(),
    ])
}

/// Composite for a key in an index chunk.
pub fn index_composite_key(key: &str) -> Composite {
    Composite::of(&[key.as_bytes()])
}

/// Composite for a (key, value) pair in an index chunk.
pub fn index_composite(key: &str, value: &Value) -> Composite {
    Composite::of(&[key.as_bytes(), &value.canonical_bytes()])
}

/// Composite for a (key, token) term in a corpus chunk.
pub fn corpus_composite(key: &str, token: &str) -> Composite {
    Composite::of(&[key.trim_end().as_bytes(), token.as_bytes()])
}

// ------------------------------------------------------------------------------------------------
// Corpus tokenization
// ------------------------------------------------------------------------------------------------

/// Split text into lowercase whitespace-delimited tokens with stop-words
/// removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// All distinct substrings of `token` up to `max_len` characters.
pub fn substrings(token: &str, max_len: usize) -> HashSet<String> {
    let chars: Vec<char> = token.chars().collect();
    let mut out = HashSet::new();
    for start in 0..chars.len() {
        let limit = (chars.len() - start).min(max_len);
        for len in 1..=limit {
            out.insert(chars[start..start + len].iter().collect());
        }
    }
    out
}

/// The full token set a STRING value contributes to the corpus index.
pub fn corpus_tokens(text: &str, max_len: usize) -> HashSet<String> {
    let mut out = HashSet::new();
    for token in tokenize(text) {
        out.extend(substrings(&token, max_len));
    }
    out
}

// ------------------------------------------------------------------------------------------------
// Revision
// ------------------------------------------------------------------------------------------------

/// A write as stored inside a chunk, tagged with the locator the chunk kind
/// derives for it.
///
/// For table and index chunks the stored write is the original one.  For
/// corpus chunks each revision carries the token as its value, so the
/// locator remains derivable from the stored bytes alone.
#[derive(Clone, Debug, PartialEq)]
pub struct Revision {
    pub locator: Locator,
    pub write: Write,
}

impl Revision {
    /// Sort comparator for a chunk kind.  Ties within a (locator, key,
    /// value) group break by version, keeping groups in version order.
    fn compare(kind: ChunkKind, a: &Self, b: &Self) -> Ordering {
        match kind {
            ChunkKind::Table => a
                .write
                .record
                .cmp(&b.write.record)
                .then_with(|| a.write.key.cmp(&b.write.key))
                .then_with(|| a.write.value.cmp(&b.write.value))
                .then_with(|| a.write.version.cmp(&b.write.version)),
            ChunkKind::Index => a
                .write
                .key
                .cmp(&b.write.key)
                .then_with(|| a.write.value.cmp(&b.write.value))
                .then_with(|| a.write.record.cmp(&b.write.record))
                .then_with(|| a.write.version.cmp(&b.write.version)),
            ChunkKind::Corpus => a
                .locator
                .cmp(&b.locator)
                .then_with(|| a.write.record.cmp(&b.write.record))
                .then_with(|| a.write.version.cmp(&b.write.version)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Chunk — mutable phase
// ------------------------------------------------------------------------------------------------

/// The serialized sections a frozen chunk contributes to a segment file.
pub struct ChunkBytes {
    pub bloom: Vec<u8>,
    pub manifest: Vec<u8>,
    pub revisions: Vec<u8>,
}

struct ChunkInner {
    revisions: Vec<Revision>,
    bloom: BloomFilter,
    frozen: bool,
    min_version: u64,
    max_version: u64,
}

/// A mutable revision block being filled by the transporter.
pub struct Chunk {
    kind: ChunkKind,
    /// Corpus-only: cap on substring token length.
    token_limit: usize,
    inner: RwLock<ChunkInner>,
}

impl Chunk {
    /// A mutable table chunk.
    pub fn table() -> Self {
        Self::with_kind(ChunkKind::Table, DEFAULT_MAX_TOKEN_LENGTH)
    }

    /// A mutable index chunk.
    pub fn index() -> Self {
        Self::with_kind(ChunkKind::Index, DEFAULT_MAX_TOKEN_LENGTH)
    }

    /// A mutable corpus chunk with the given substring-length cap.
    pub fn corpus(token_limit: usize) -> Self {
        Self::with_kind(ChunkKind::Corpus, token_limit)
    }

    fn with_kind(kind: ChunkKind, token_limit: usize) -> Self {
        Self {
            kind,
            token_limit,
            inner: RwLock::new(ChunkInner {
                revisions: Vec::new(),
                bloom: BloomFilter::new(),
                frozen: false,
                min_version: u64::MAX,
                max_version: 0,
            }),
        }
    }

    /// The chunk's layout kind.
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Record a write.
    ///
    /// Table and index chunks store one revision per write.  Corpus chunks
    /// store one revision per derived substring token, and ignore writes
    /// whose value is not a STRING.
    pub fn insert(&self, write: &Write) -> Result<(), ChunkError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ChunkError::Internal("chunk lock poisoned".into()))?;
        if inner.frozen {
            return Err(ChunkError::Frozen);
        }

        match self.kind {
            ChunkKind::Table => {
                inner
                    .bloom
                    .insert(&table_composite_record(write.record))?;
                inner
                    .bloom
                    .insert(&table_composite_field(write.record, write.key.as_str()))?;
                inner.bloom.insert(&table_composite(
                    write.record,
                    write.key.as_str(),
                    &write.value,
                ))?;
                inner.min_version = inner.min_version.min(write.version);
                inner.max_version = inner.max_version.max(write.version);
                inner.revisions.push(Revision {
                    locator: Locator::Record(write.record),
                    write: write.clone(),
                });
            }
            ChunkKind::Index => {
                inner.bloom.insert(&index_composite_key(write.key.as_str()))?;
                inner
                    .bloom
                    .insert(&index_composite(write.key.as_str(), &write.value))?;
                inner.min_version = inner.min_version.min(write.version);
                inner.max_version = inner.max_version.max(write.version);
                inner.revisions.push(Revision {
                    locator: Locator::Key(write.key.as_str().to_string()),
                    write: write.clone(),
                });
            }
            ChunkKind::Corpus => {
                let Value::String(text) = &write.value else {
                    return Ok(()); // only STRING values are full-text indexed
                };
                let tokens = corpus_tokens(text, self.token_limit);
                trace!(
                    record = write.record,
                    key = %write.key,
                    tokens = tokens.len(),
                    "corpus fan-out"
                );
                for token in tokens {
                    inner
                        .bloom
                        .insert(&corpus_composite(write.key.as_str(), &token))?;
                    inner.min_version = inner.min_version.min(write.version);
                    inner.max_version = inner.max_version.max(write.version);
                    let mut tokened = write.clone();
                    tokened.value = Value::String(token.clone());
                    inner.revisions.push(Revision {
                        // Trim here so the sort order groups exactly like
                        // the locator bytes do.
                        locator: Locator::Term {
                            key: write.key.as_str().trim_end().to_string(),
                            token,
                        },
                        write: tokened,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether the chunk may contain a revision with this composite.
    pub fn might_contain(&self, composite: &Composite) -> Result<bool, ChunkError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ChunkError::Internal("chunk lock poisoned".into()))?;
        Ok(inner.bloom.might_contain(composite))
    }

    /// Number of stored revisions.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.revisions.len()).unwrap_or(0)
    }

    /// True when no revisions are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `[min_version, max_version]` range of stored revisions, if any.
    pub fn version_bounds(&self) -> Option<(u64, u64)> {
        let inner = self.inner.read().ok()?;
        if inner.revisions.is_empty() {
            None
        } else {
            Some((inner.min_version, inner.max_version))
        }
    }

    /// Revisions in stored (sorted) order.  Used by tests and compaction.
    pub fn sorted_revisions(&self) -> Result<Vec<Revision>, ChunkError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ChunkError::Internal("chunk lock poisoned".into()))?;
        let mut revisions = inner.revisions.clone();
        revisions.sort_by(|a, b| Revision::compare(self.kind, a, b));
        Ok(revisions)
    }

    /// Sort, serialize, and seal the chunk.
    ///
    /// Returns the three byte sections of the on-disk layout:
    /// `[bloom][manifest][revisions]`, with the manifest mapping every
    /// locator to its byte range inside the revision section.
    pub fn freeze(&self, fp_rate: f64) -> Result<ChunkBytes, ChunkError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ChunkError::Internal("chunk lock poisoned".into()))?;
        if inner.frozen {
            return Err(ChunkError::Frozen);
        }

        inner
            .revisions
            .sort_by(|a, b| Revision::compare(self.kind, a, b));

        let mut manifest = Manifest::new();
        let mut revisions = Vec::new();
        let mut open: Option<Vec<u8>> = None;

        for revision in &inner.revisions {
            let locator_bytes = revision.locator.bytes();
            if open.as_deref() != Some(locator_bytes.as_slice()) {
                if let Some(prev) = open.take() {
                    manifest.put_end(revisions.len() as u64, &prev)?;
                }
                manifest.put_start(revisions.len() as u64, &locator_bytes)?;
                open = Some(locator_bytes);
            }
            revision.write.encode_to(&mut revisions)?;
        }
        if let Some(prev) = open.take() {
            manifest.put_end(revisions.len() as u64, &prev)?;
        }

        let bloom = inner.bloom.freeze(fp_rate)?;
        let manifest = manifest.flush()?;
        inner.frozen = true;

        Ok(ChunkBytes {
            bloom,
            manifest,
            revisions,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// SealedChunk — read side
// ------------------------------------------------------------------------------------------------

/// Backing bytes for a sealed chunk's revision section.
#[derive(Clone)]
pub enum Window {
    /// A `[offset, offset + len)` window of a shared segment mapping.
    Mapped {
        mmap: Arc<Mmap>,
        offset: usize,
        len: usize,
    },
    /// An owned buffer (tests, in-memory merges).
    Owned(Arc<Vec<u8>>),
}

impl Window {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped { mmap, offset, len } => &mmap[*offset..*offset + *len],
            Self::Owned(bytes) => bytes,
        }
    }
}

/// An immutable chunk inside a segment file: loaded bloom + lazy manifest +
/// a byte window over the revision section.
pub struct SealedChunk {
    kind: ChunkKind,
    bloom: BloomFilter,
    manifest: Manifest,
    revisions: Window,
}

impl SealedChunk {
    /// Assemble a sealed chunk from its three sections.
    pub fn open(
        kind: ChunkKind,
        bloom_bytes: &[u8],
        manifest: ManifestSource,
        revisions: Window,
    ) -> Result<Self, ChunkError> {
        Ok(Self {
            kind,
            bloom: BloomFilter::load(bloom_bytes)?,
            manifest: Manifest::load(manifest)?,
            revisions,
        })
    }

    /// The chunk's layout kind.
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Whether the chunk may contain a revision with this composite.
    pub fn might_contain(&self, composite: &Composite) -> bool {
        self.bloom.might_contain(composite)
    }

    /// Stream the revisions stored for one locator.
    ///
    /// Returns an empty vec when the manifest has no entry for the locator.
    pub fn seek(&self, locator: &Locator) -> Result<Vec<Write>, ChunkError> {
        let Some(range) = self.manifest.lookup(&locator.bytes())? else {
            return Ok(Vec::new());
        };
        let section = self.revisions.as_slice();
        let (start, end) = (range.start as usize, range.end as usize);
        if end > section.len() || start > end {
            return Err(ChunkError::RangeOutOfBounds(format!(
                "[{start}, {end}) outside revision section of {} bytes",
                section.len()
            )));
        }
        decode_writes(&section[start..end])
    }

    /// Every revision in stored order.  Used by compaction and audits.
    pub fn iter_all(&self) -> Result<Vec<Write>, ChunkError> {
        decode_writes(self.revisions.as_slice())
    }
}

/// Decode back-to-back [`Write`]s from a byte slice.
fn decode_writes(mut bytes: &[u8]) -> Result<Vec<Write>, ChunkError> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let (write, consumed) = Write::decode_from(bytes)?;
        out.push(write);
        bytes = &bytes[consumed..];
    }
    Ok(out)
}

/// Serialize a slice of writes back-to-back (no framing).
pub fn encode_writes(writes: &[Write]) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::new();
    for write in writes {
        out.extend_from_slice(&encode_to_vec(write)?);
    }
    Ok(out)
}
