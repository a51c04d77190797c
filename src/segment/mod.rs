//! # Segments
//!
//! A **segment** is the immutable on-disk artifact produced by one buffer
//! transport: three sealed chunks (table, index, corpus) sharing a single
//! `[min_version, max_version]` range, bundled into one file.
//!
//! # On-disk layout (big-endian)
//!
//! ```text
//! [magic u32][format_version u16][min_version i64][max_version i64]
//! [table_off u64][index_off u64][corpus_off u64]
//! table  chunk: [bloom_len u32][bloom][manifest_len u32][manifest][revisions_len u64][revisions]
//! index  chunk: …same layout…
//! corpus chunk: …same layout…
//! ```
//!
//! # Guarantees
//!
//! - **Atomic creation:** segments are written to a temporary path and
//!   renamed into place after `fsync`, so a crash never leaves a partial
//!   segment in the segments directory.
//! - **Immutability:** once opened, a segment is never modified; reads are
//!   lock-free through a shared memory mapping.
//! - **Validation:** magic, version, and section bounds are checked at open;
//!   corruption surfaces as [`SegmentError::Corrupt`] instead of being
//!   silently ignored.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info};

use crate::chunk::{Chunk, ChunkBytes, ChunkError, ChunkKind, SealedChunk, Window};
use crate::manifest::ManifestSource;
use crate::model::Write;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SEGMENT_MAGIC: u32 = u32::from_be_bytes(*b"TDSG");
const SEGMENT_FORMAT_VERSION: u16 = 1;

/// Header size: magic(4) + version(2) + min(8) + max(8) + 3 × offset(8).
const SEGMENT_HEADER_SIZE: usize = 4 + 2 + 8 + 8 + 8 * 3;

/// File extension for sealed segments.
pub const SEGMENT_EXTENSION: &str = "seg";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by segment operations.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Chunk build or read failure.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// The file is not a valid segment.
    #[error("corrupt segment: {0}")]
    Corrupt(String),

    /// A segment was built from an empty write set.
    #[error("refusing to build an empty segment")]
    Empty,
}

// ------------------------------------------------------------------------------------------------
// Build configuration
// ------------------------------------------------------------------------------------------------

/// Knobs for building a segment from a write stream.
#[derive(Clone, Copy, Debug)]
pub struct SegmentConfig {
    /// Bloom filter false-positive target.
    pub bloom_fp_rate: f64,
    /// Corpus substring token length cap.
    pub max_token_length: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            bloom_fp_rate: crate::bloom::DEFAULT_FALSE_POSITIVE_RATE,
            max_token_length: crate::chunk::DEFAULT_MAX_TOKEN_LENGTH,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Segment — read side
// ------------------------------------------------------------------------------------------------

/// An immutable, memory-mapped segment.
pub struct Segment {
    /// Path of the backing file.
    path: PathBuf,

    /// Smallest revision version in the segment.
    min_version: u64,

    /// Largest revision version in the segment.
    max_version: u64,

    /// Shared mapping all three chunks window into.
    mmap: Arc<Mmap>,

    /// Record-oriented chunk.
    pub table: SealedChunk,

    /// Value-oriented chunk.
    pub index: SealedChunk,

    /// Full-text chunk.
    pub corpus: SealedChunk,
}

impl Segment {
    /// The canonical file name for a segment: its min version, zero-padded
    /// so lexicographic directory order equals version order.
    pub fn file_name(min_version: u64) -> String {
        format!("{min_version:020}.{SEGMENT_EXTENSION}")
    }

    /// Open and validate a segment file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });

        if mmap.len() < SEGMENT_HEADER_SIZE {
            return Err(SegmentError::Corrupt("file shorter than header".into()));
        }

        let magic = u32::from_be_bytes([mmap[0], mmap[1], mmap[2], mmap[3]]);
        if magic != SEGMENT_MAGIC {
            return Err(SegmentError::Corrupt("bad magic".into()));
        }
        let version = u16::from_be_bytes([mmap[4], mmap[5]]);
        if version != SEGMENT_FORMAT_VERSION {
            return Err(SegmentError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }

        let read_u64 = |off: usize| -> u64 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&mmap[off..off + 8]);
            u64::from_be_bytes(raw)
        };

        let min_version = read_u64(6) as i64 as u64;
        let max_version = read_u64(14) as i64 as u64;
        let table_off = read_u64(22) as usize;
        let index_off = read_u64(30) as usize;
        let corpus_off = read_u64(38) as usize;

        let table = open_chunk(&mmap, table_off, ChunkKind::Table)?;
        let index = open_chunk(&mmap, index_off, ChunkKind::Index)?;
        let corpus = open_chunk(&mmap, corpus_off, ChunkKind::Corpus)?;

        debug!(path = %path.display(), min_version, max_version, "segment opened");

        Ok(Self {
            path,
            min_version,
            max_version,
            mmap,
            table,
            index,
            corpus,
        })
    }

    /// Build three chunks from `writes`, seal them into a new segment file
    /// at `path` (atomically, via temp + rename), and open the result.
    pub fn build(
        path: impl AsRef<Path>,
        writes: &[Write],
        config: SegmentConfig,
    ) -> Result<Self, SegmentError> {
        if writes.is_empty() {
            return Err(SegmentError::Empty);
        }

        let table = Chunk::table();
        let index = Chunk::index();
        let corpus = Chunk::corpus(config.max_token_length);

        let mut min_version = u64::MAX;
        let mut max_version = 0u64;
        for write in writes {
            min_version = min_version.min(write.version);
            max_version = max_version.max(write.version);
            table.insert(write)?;
            index.insert(write)?;
            corpus.insert(write)?;
        }

        let table = table.freeze(config.bloom_fp_rate)?;
        let index = index.freeze(config.bloom_fp_rate)?;
        let corpus = corpus.freeze(config.bloom_fp_rate)?;

        write_segment_file(
            path.as_ref(),
            min_version,
            max_version,
            &table,
            &index,
            &corpus,
        )?;

        info!(
            path = %path.as_ref().display(),
            writes = writes.len(),
            min_version,
            max_version,
            "segment sealed"
        );

        Self::open(path)
    }

    /// Smallest revision version in the segment.
    pub fn min_version(&self) -> u64 {
        self.min_version
    }

    /// Largest revision version in the segment.
    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Every write in the segment, in table-chunk order.
    ///
    /// The table chunk holds exactly one revision per accepted write, so it
    /// is the authoritative stream for compaction (index and corpus are
    /// derived projections).
    pub fn writes(&self) -> Result<Vec<Write>, SegmentError> {
        Ok(self.table.iter_all()?)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// File I/O
// ------------------------------------------------------------------------------------------------

/// Serialize a sealed segment to `path` via a temporary sibling file.
fn write_segment_file(
    path: &Path,
    min_version: u64,
    max_version: u64,
    table: &ChunkBytes,
    index: &ChunkBytes,
    corpus: &ChunkBytes,
) -> Result<(), SegmentError> {
    let chunk_section_len = |c: &ChunkBytes| -> u64 {
        4 + c.bloom.len() as u64 + 4 + c.manifest.len() as u64 + 8 + c.revisions.len() as u64
    };

    let table_off = SEGMENT_HEADER_SIZE as u64;
    let index_off = table_off + chunk_section_len(table);
    let corpus_off = index_off + chunk_section_len(index);

    let mut buf = Vec::with_capacity((corpus_off + chunk_section_len(corpus)) as usize);
    buf.extend_from_slice(&SEGMENT_MAGIC.to_be_bytes());
    buf.extend_from_slice(&SEGMENT_FORMAT_VERSION.to_be_bytes());
    buf.extend_from_slice(&(min_version as i64).to_be_bytes());
    buf.extend_from_slice(&(max_version as i64).to_be_bytes());
    buf.extend_from_slice(&table_off.to_be_bytes());
    buf.extend_from_slice(&index_off.to_be_bytes());
    buf.extend_from_slice(&corpus_off.to_be_bytes());

    for chunk in [table, index, corpus] {
        buf.extend_from_slice(&(chunk.bloom.len() as u32).to_be_bytes());
        buf.extend_from_slice(&chunk.bloom);
        buf.extend_from_slice(&(chunk.manifest.len() as u32).to_be_bytes());
        buf.extend_from_slice(&chunk.manifest);
        buf.extend_from_slice(&(chunk.revisions.len() as u64).to_be_bytes());
        buf.extend_from_slice(&chunk.revisions);
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;

    // Make the rename itself durable.
    if let Some(dir) = path.parent() {
        if let Ok(dir) = File::open(dir) {
            dir.sync_all()?;
        }
    }

    Ok(())
}

/// Parse one chunk section starting at `offset`.
fn open_chunk(mmap: &Arc<Mmap>, offset: usize, kind: ChunkKind) -> Result<SealedChunk, SegmentError> {
    let len = mmap.len();
    let need = |at: usize, n: usize| -> Result<(), SegmentError> {
        if at + n > len {
            Err(SegmentError::Corrupt(format!(
                "chunk section at {at} overruns file of {len} bytes"
            )))
        } else {
            Ok(())
        }
    };

    let mut cursor = offset;

    need(cursor, 4)?;
    let bloom_len = u32::from_be_bytes([
        mmap[cursor],
        mmap[cursor + 1],
        mmap[cursor + 2],
        mmap[cursor + 3],
    ]) as usize;
    cursor += 4;
    need(cursor, bloom_len)?;
    let bloom_bytes = &mmap[cursor..cursor + bloom_len];
    cursor += bloom_len;

    need(cursor, 4)?;
    let manifest_len = u32::from_be_bytes([
        mmap[cursor],
        mmap[cursor + 1],
        mmap[cursor + 2],
        mmap[cursor + 3],
    ]) as usize;
    cursor += 4;
    need(cursor, manifest_len)?;
    let manifest = ManifestSource::Mapped {
        mmap: Arc::clone(mmap),
        offset: cursor,
        len: manifest_len,
    };
    cursor += manifest_len;

    need(cursor, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&mmap[cursor..cursor + 8]);
    let revisions_len = u64::from_be_bytes(raw) as usize;
    cursor += 8;
    need(cursor, revisions_len)?;
    let revisions = Window::Mapped {
        mmap: Arc::clone(mmap),
        offset: cursor,
        len: revisions_len,
    };

    Ok(SealedChunk::open(kind, bloom_bytes, manifest, revisions)?)
}
