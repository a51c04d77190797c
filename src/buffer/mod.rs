//! # Buffer
//!
//! The append-only, page-based write log every accepted write lands in
//! before it is transported to a segment.
//!
//! ## Page model
//!
//! A page is a memory-mapped, fixed-size file.  Writes are framed
//! back-to-back as `[u32 length][write bytes]`; the remainder of the file is
//! zero-filled, and recovery treats a zero or truncated length as
//! end-of-page.  When a write does not fit in the active page's tail, the
//! page is sealed and a fresh page is allocated, named by the write's
//! version so lexicographic directory order equals version order.
//!
//! ## Durability
//!
//! `insert(write, sync = true)` flushes the page mapping before returning —
//! the write survives a crash from that point on.  `sync = false` defers the
//! flush to the next [`Buffer::sync`] (group sync), trading the immediate
//! guarantee for throughput.
//!
//! ## Inventory
//!
//! The buffer owns the **inventory**: the set of record ids ever written,
//! persisted incrementally to an append-only CRC-framed file and rebuilt on
//! recovery.
//!
//! ## Transport
//!
//! The transporter drains the buffer oldest-page-first.  Pages are only
//! removed through [`Buffer::remove_pages`], which the engine calls *after*
//! the replacement segment is sealed and fsync'd.  Recovery therefore may
//! find writes both in pages and in segments; [`Buffer::discard_through`]
//! drops the already-transported prefix.
//!
//! ## Backpressure
//!
//! When the page count exceeds the high-water mark, `insert` performs a
//! bounded wait for the transporter before proceeding.


use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crc32fast::Hasher as Crc32;
use memmap2::MmapMut;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::chunk::corpus_tokens;
use crate::encoding::{Decode, EncodingError, encode_to_vec};
use crate::model::{Identifier, Write, Key};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default page capacity (8 MiB).
pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024 * 1024;

/// Default page count that triggers insert backpressure.
pub const DEFAULT_HIGH_WATER_PAGES: usize = 8;

/// File extension for buffer pages.
pub const PAGE_EXTENSION: &str = "buf";

/// File name of the persisted inventory.
pub const INVENTORY_FILE: &str = "inventory";

const FRAME_HEADER: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A single write exceeds the page capacity.
    #[error("write of {0} bytes exceeds page capacity")]
    WriteTooLarge(usize),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Page
// ------------------------------------------------------------------------------------------------

/// One memory-mapped page of the write log.
struct Page {
    path: PathBuf,
    mmap: MmapMut,
    capacity: usize,
    /// Next free byte.
    tail: usize,
    /// Decoded mirror of the framed writes, in append order.
    writes: Vec<Write>,
    /// Sealed pages accept no further appends.
    sealed: bool,
    /// Whether unflushed frames exist (group-sync bookkeeping).
    dirty: bool,
}

impl Page {
    /// Allocate a fresh zero-filled page.
    fn create(path: PathBuf, capacity: usize) -> Result<Self, BufferError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(capacity as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), capacity, "buffer page allocated");
        Ok(Self {
            path,
            mmap,
            capacity,
            tail: 0,
            writes: Vec::new(),
            sealed: false,
            dirty: false,
        })
    }

    /// Map an existing page file and replay its frames.
    fn recover(path: PathBuf) -> Result<Self, BufferError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let capacity = file.metadata()?.len() as usize;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut tail = 0usize;
        let mut writes = Vec::new();
        while tail + FRAME_HEADER <= capacity {
            let len = u32::from_be_bytes([
                mmap[tail],
                mmap[tail + 1],
                mmap[tail + 2],
                mmap[tail + 3],
            ]) as usize;
            if len == 0 || tail + FRAME_HEADER + len > capacity {
                break; // zero-filled remainder or truncated frame
            }
            match Write::decode_from(&mmap[tail + FRAME_HEADER..tail + FRAME_HEADER + len]) {
                Ok((write, _)) => {
                    writes.push(write);
                    tail += FRAME_HEADER + len;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset = tail, error = %e,
                        "torn write at page tail, truncating replay");
                    break;
                }
            }
        }

        debug!(path = %path.display(), writes = writes.len(), tail, "buffer page recovered");

        Ok(Self {
            path,
            mmap,
            capacity,
            tail,
            writes,
            sealed: false,
            dirty: false,
        })
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.tail)
    }

    /// Append a frame.  Returns `false` (without writing) when it does not
    /// fit.
    fn append(&mut self, write: &Write, bytes: &[u8]) -> Result<bool, BufferError> {
        if self.sealed || self.remaining() < FRAME_HEADER + bytes.len() {
            return Ok(false);
        }
        let at = self.tail;
        self.mmap[at..at + FRAME_HEADER]
            .copy_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.mmap[at + FRAME_HEADER..at + FRAME_HEADER + bytes.len()].copy_from_slice(bytes);
        self.tail = at + FRAME_HEADER + bytes.len();
        self.writes.push(write.clone());
        self.dirty = true;
        Ok(true)
    }

    /// msync the mapping.
    fn flush(&mut self) -> Result<(), BufferError> {
        if self.dirty {
            self.mmap.flush()?;
            self.dirty = false;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Inventory
// ------------------------------------------------------------------------------------------------

/// The set of records ever written, persisted incrementally.
///
/// On-disk format: `[u64 record][u32 crc32(record bytes)]` frames appended
/// in arrival order.  Replay stops at the first corrupt or truncated frame.
pub struct Inventory {
    file: File,
    set: HashSet<Identifier>,
    dirty: bool,
}

impl Inventory {
    /// Open (or create) the inventory file and replay it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path.as_ref())?;

        let mut set = HashSet::new();
        let mut frame = [0u8; 12];
        loop {
            match file.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut id_bytes = [0u8; 8];
            id_bytes.copy_from_slice(&frame[..8]);
            let stored_crc = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
            let mut hasher = Crc32::new();
            hasher.update(&id_bytes);
            if hasher.finalize() != stored_crc {
                warn!("corrupt inventory frame, truncating replay");
                break;
            }
            set.insert(u64::from_be_bytes(id_bytes));
        }

        info!(records = set.len(), "inventory loaded");
        Ok(Self {
            file,
            set,
            dirty: false,
        })
    }

    /// Record that `record` exists.  Appends to the file only on first
    /// sighting.
    pub fn add(&mut self, record: Identifier) -> Result<(), BufferError> {
        if !self.set.insert(record) {
            return Ok(());
        }
        let id_bytes = record.to_be_bytes();
        let mut hasher = Crc32::new();
        hasher.update(&id_bytes);
        let crc = hasher.finalize();
        self.file.write_all(&id_bytes)?;
        self.file.write_all(&crc.to_be_bytes())?;
        self.dirty = true;
        Ok(())
    }

    /// Whether `record` has ever been written.
    pub fn contains(&self, record: Identifier) -> bool {
        self.set.contains(&record)
    }

    /// All known record ids, sorted.
    pub fn all(&self) -> Vec<Identifier> {
        let mut out: Vec<Identifier> = self.set.iter().copied().collect();
        out.sort_unstable();
        out
    }

    /// fsync pending appends.
    pub fn sync(&mut self) -> Result<(), BufferError> {
        if self.dirty {
            self.file.sync_all()?;
            self.dirty = false;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Buffer
// ------------------------------------------------------------------------------------------------

struct BufferInner {
    /// Front = oldest (transport source), back = active.
    pages: VecDeque<Page>,
}

/// The WAL-backed write log.  See the module docs.
pub struct Buffer {
    dir: PathBuf,
    page_size: usize,
    high_water: usize,
    backpressure_wait: Duration,
    inner: Mutex<BufferInner>,
    /// Signaled whenever transport removes pages.
    drained: Condvar,
    inventory: Mutex<Inventory>,
}

impl Buffer {
    /// Open the buffer rooted at `dir`, replaying any page files present.
    pub fn open(
        dir: impl AsRef<Path>,
        page_size: usize,
        high_water: usize,
        backpressure_wait: Duration,
    ) -> Result<Self, BufferError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut page_paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(PAGE_EXTENSION))
            .collect();
        page_paths.sort();

        let mut pages = VecDeque::new();
        for path in page_paths {
            let mut page = Page::recover(path)?;
            page.sealed = true;
            pages.push_back(page);
        }
        // The newest recovered page keeps accepting appends.
        if let Some(last) = pages.back_mut() {
            last.sealed = false;
        }

        let replayed: usize = pages.iter().map(|p| p.writes.len()).sum();
        info!(pages = pages.len(), writes = replayed, "buffer recovered");

        let inventory = Inventory::open(dir.join(INVENTORY_FILE))?;

        Ok(Self {
            dir,
            page_size,
            high_water,
            backpressure_wait,
            inner: Mutex::new(BufferInner { pages }),
            drained: Condvar::new(),
            inventory: Mutex::new(inventory),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BufferInner>, BufferError> {
        self.inner
            .lock()
            .map_err(|_| BufferError::Internal("buffer lock poisoned".into()))
    }

    /// Append a write to the log.
    ///
    /// With `sync = true` the page mapping (and the inventory) is flushed
    /// before returning; the write is then crash-durable.  With
    /// `sync = false` durability is deferred to the next [`Buffer::sync`].
    pub fn insert(&self, write: &Write, sync: bool) -> Result<(), BufferError> {
        let bytes = encode_to_vec(write)?;
        if FRAME_HEADER + bytes.len() > self.page_size {
            return Err(BufferError::WriteTooLarge(bytes.len()));
        }

        let mut inner = self.lock()?;

        // Backpressure: bounded wait for the transporter to catch up.
        if inner.pages.len() > self.high_water {
            let deadline = Instant::now() + self.backpressure_wait;
            while inner.pages.len() > self.high_water {
                let now = Instant::now();
                if now >= deadline {
                    warn!(
                        pages = inner.pages.len(),
                        "buffer high-water wait expired, proceeding"
                    );
                    break;
                }
                let (guard, _timeout) = self
                    .drained
                    .wait_timeout(inner, deadline - now)
                    .map_err(|_| BufferError::Internal("buffer lock poisoned".into()))?;
                inner = guard;
            }
        }

        let appended = match inner.pages.back_mut() {
            Some(page) => page.append(write, &bytes)?,
            None => false,
        };

        if !appended {
            if let Some(page) = inner.pages.back_mut() {
                page.sealed = true;
                page.flush()?;
            }
            let path = self
                .dir
                .join(format!("{:020}.{PAGE_EXTENSION}", write.version));
            let mut page = Page::create(path, self.page_size)?;
            if !page.append(write, &bytes)? {
                return Err(BufferError::WriteTooLarge(bytes.len()));
            }
            inner.pages.push_back(page);
        }

        {
            let mut inventory = self
                .inventory
                .lock()
                .map_err(|_| BufferError::Internal("inventory lock poisoned".into()))?;
            inventory.add(write.record)?;
            if sync {
                inventory.sync()?;
            }
        }

        if sync {
            if let Some(page) = inner.pages.back_mut() {
                page.flush()?;
            }
        }

        trace!(version = write.version, sync, "buffer insert");
        Ok(())
    }

    /// Flush every dirty page and the inventory (group sync).
    pub fn sync(&self) -> Result<(), BufferError> {
        let mut inner = self.lock()?;
        for page in inner.pages.iter_mut() {
            page.flush()?;
        }
        self.inventory
            .lock()
            .map_err(|_| BufferError::Internal("inventory lock poisoned".into()))?
            .sync()?;
        Ok(())
    }

    /// Number of live pages.
    pub fn page_count(&self) -> usize {
        self.lock().map(|inner| inner.pages.len()).unwrap_or(0)
    }

    /// Total buffered writes.
    pub fn write_count(&self) -> usize {
        self.lock()
            .map(|inner| inner.pages.iter().map(|p| p.writes.len()).sum())
            .unwrap_or(0)
    }

    /// Every buffered write in log order.
    pub fn writes(&self) -> Result<Vec<Write>, BufferError> {
        let inner = self.lock()?;
        Ok(inner
            .pages
            .iter()
            .flat_map(|p| p.writes.iter().cloned())
            .collect())
    }

    /// Buffered revisions for one record with `version <= at`.
    pub fn writes_for_record(&self, record: Identifier, at: u64) -> Result<Vec<Write>, BufferError> {
        self.writes_where(|w| w.record == record && w.version <= at)
    }

    /// Buffered revisions under one key with `version <= at`.
    pub fn writes_for_key(&self, key: &str, at: u64) -> Result<Vec<Write>, BufferError> {
        self.writes_where(|w| w.key.as_str() == key && w.version <= at)
    }

    /// Buffered token revisions for a (key, token) term with `version <= at`.
    ///
    /// Buffered STRING writes are tokenized on the fly, mirroring the fan-out
    /// a corpus chunk performs at transport time.
    pub fn writes_for_term(
        &self,
        key: &str,
        token: &str,
        at: u64,
        token_limit: usize,
    ) -> Result<Vec<Write>, BufferError> {
        let inner = self.lock()?;
        let mut out = Vec::new();
        for page in inner.pages.iter() {
            for w in &page.writes {
                if w.version > at || w.key.as_str().trim_end() != key.trim_end() {
                    continue;
                }
                let Some(text) = w.value.as_text() else {
                    continue;
                };
                if !matches!(w.value, crate::model::Value::String(_)) {
                    continue; // TAG values are not full-text indexed
                }
                if corpus_tokens(text, token_limit).contains(token) {
                    let mut tokened = w.clone();
                    tokened.value = crate::model::Value::String(token.to_string());
                    tokened.key = Key::new(key).unwrap_or_else(|_| w.key.clone());
                    out.push(tokened);
                }
            }
        }
        Ok(out)
    }

    /// The largest buffered version among writes matching `predicate`, or 0.
    pub fn latest_version_where(
        &self,
        predicate: impl Fn(&Write) -> bool,
    ) -> Result<u64, BufferError> {
        let inner = self.lock()?;
        Ok(inner
            .pages
            .iter()
            .flat_map(|p| p.writes.iter())
            .filter(|w| predicate(w))
            .map(|w| w.version)
            .max()
            .unwrap_or(0))
    }

    fn writes_where(
        &self,
        predicate: impl Fn(&Write) -> bool,
    ) -> Result<Vec<Write>, BufferError> {
        let inner = self.lock()?;
        Ok(inner
            .pages
            .iter()
            .flat_map(|p| p.writes.iter())
            .filter(|w| predicate(w))
            .cloned()
            .collect())
    }

    // --------------------------------------------------------------------------------------------
    // Transport surface
    // --------------------------------------------------------------------------------------------

    /// Whether a sealed page is waiting to be transported.
    pub fn can_transport(&self) -> bool {
        self.lock()
            .map(|inner| inner.pages.len() > 1)
            .unwrap_or(false)
    }

    /// Seal the active page so it becomes transportable, provided it holds
    /// at least one write.
    pub fn seal_active(&self) -> Result<(), BufferError> {
        let mut inner = self.lock()?;
        if let Some(page) = inner.pages.back_mut() {
            if !page.writes.is_empty() && !page.sealed {
                page.sealed = true;
                page.flush()?;
            }
        }
        Ok(())
    }

    /// Snapshot up to `max_pages` of the oldest sealed pages: their writes
    /// (in log order) and their paths.  The pages stay in the buffer until
    /// [`Buffer::remove_pages`].
    pub fn peek_oldest(
        &self,
        max_pages: usize,
    ) -> Result<(Vec<Write>, Vec<PathBuf>), BufferError> {
        let inner = self.lock()?;
        let mut writes = Vec::new();
        let mut paths = Vec::new();
        for page in inner.pages.iter().take(max_pages) {
            if !page.sealed {
                break;
            }
            writes.extend(page.writes.iter().cloned());
            paths.push(page.path.clone());
        }
        Ok((writes, paths))
    }

    /// Drop transported pages and delete their files.  Call only after the
    /// replacement segment is sealed and fsync'd.
    pub fn remove_pages(&self, paths: &[PathBuf]) -> Result<(), BufferError> {
        let mut inner = self.lock()?;
        inner.pages.retain(|p| !paths.contains(&p.path));
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to delete transported page");
            }
        }
        debug!(removed = paths.len(), remaining = inner.pages.len(), "pages transported");
        self.drained.notify_all();
        Ok(())
    }

    /// Drop buffered writes with `version <= ceiling`.
    ///
    /// Used at startup: a crash between segment seal and page deletion
    /// leaves transported writes in both places, and the segment copy wins.
    /// Pages whose every write was dropped are deleted outright.
    pub fn discard_through(&self, ceiling: u64) -> Result<usize, BufferError> {
        let mut inner = self.lock()?;
        let mut dropped = 0usize;
        let mut emptied: Vec<PathBuf> = Vec::new();

        for page in inner.pages.iter_mut() {
            let before = page.writes.len();
            page.writes.retain(|w| w.version > ceiling);
            dropped += before - page.writes.len();
            // Only sealed pages are safe to delete; the active page may
            // still be accepting appends into its mapping.
            if before > 0 && page.writes.is_empty() && page.sealed {
                emptied.push(page.path.clone());
            }
        }
        inner.pages.retain(|p| !emptied.contains(&p.path));
        for path in &emptied {
            if fs::remove_file(path).is_ok() {
                debug!(path = %path.display(), "dropped fully-transported page");
            }
        }

        if dropped > 0 {
            info!(dropped, ceiling, "discarded already-transported writes");
        }
        Ok(dropped)
    }

    // --------------------------------------------------------------------------------------------
    // Inventory surface
    // --------------------------------------------------------------------------------------------

    /// Whether `record` has ever been written.
    pub fn inventory_contains(&self, record: Identifier) -> bool {
        self.inventory
            .lock()
            .map(|inv| inv.contains(record))
            .unwrap_or(false)
    }

    /// All record ids ever written, sorted.
    pub fn inventory(&self) -> Vec<Identifier> {
        self.inventory
            .lock()
            .map(|inv| inv.all())
            .unwrap_or_default()
    }

    /// Replay-time hook: make sure `record` is in the inventory (segment
    /// replay can surface records the inventory file missed in a crash).
    pub fn inventory_add(&self, record: Identifier) -> Result<(), BufferError> {
        self.inventory
            .lock()
            .map_err(|_| BufferError::Internal("inventory lock poisoned".into()))?
            .add(record)
    }
}
