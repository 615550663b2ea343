//! Chunked bump allocator backed by anonymous memory mappings.
//!
//! Every string the trace references (task names, event names, argument
//! tokens) lives in an [`Arena`]. Storage is handed out from fixed-size
//! chunks mapped on demand with `mmap(2)`; nothing is ever freed
//! individually. All chunks are unmapped together when the arena is reset or
//! dropped.
//!
//! Callers never hold raw pointers. An allocation is identified by a [`Span`]
//! (chunk, offset, length, generation) and resolved back to bytes through the
//! arena, so a span can be stored freely in other structures. Spans issued
//! before a [`Arena::reset`] carry an old generation and resolve to an empty
//! slice afterwards instead of exposing newer data.

use std::io;
use std::ptr::NonNull;

use log::{debug, trace};
use thiserror::Error;

/// Default chunk size (16 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 << 20;

/// Smallest chunk the arena will map.
const MIN_CHUNK_SIZE: usize = 4096;

/// Offsets inside a chunk are stored as `u32`.
const MAX_CHUNK_SIZE: usize = 1 << 31;

/// Errors raised by the arena.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// The request can never be satisfied by a single chunk.
    #[error("allocation of {requested} bytes exceeds the arena chunk size of {chunk_size} bytes")]
    TooLarge { requested: usize, chunk_size: usize },

    /// The kernel refused to map a new chunk.
    #[error("failed to map a {size} byte arena chunk")]
    Map {
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Handle to committed arena bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    generation: u32,
    chunk: u32,
    offset: u32,
    len: u32,
}

impl Span {
    /// Number of bytes covered by the span.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-range of this span. Out of range requests are clamped.
    pub fn slice(&self, start: usize, len: usize) -> Span {
        let start = start.min(self.len as usize);
        let len = len.min(self.len as usize - start);
        Span {
            generation: self.generation,
            chunk: self.chunk,
            offset: self.offset + start as u32,
            len: len as u32,
        }
    }
}

/// Handle to UTF-8 text stored in the arena.
///
/// Only produced from bytes that were validated as UTF-8, which is what makes
/// [`Arena::str`] sound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StrRef(Span);

impl StrRef {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sub-string by byte range. The caller must pick char boundaries; a
    /// range splitting a character resolves to an empty string.
    pub fn slice(&self, start: usize, len: usize) -> StrRef {
        StrRef(self.0.slice(start, len))
    }

    pub fn span(&self) -> Span {
        self.0
    }
}

/// One anonymous private mapping.
#[derive(Debug)]
struct Chunk {
    base: NonNull<u8>,
    size: usize,
}

impl Chunk {
    fn map(size: usize) -> Result<Self, ArenaError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ArenaError::Map {
                size,
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| ArenaError::Map {
            size,
            source: io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"),
        })?;
        Ok(Self { base, size })
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed the chunk size.
    unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        std::slice::from_raw_parts(self.base.as_ptr().add(offset), len)
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed the chunk size.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.size);
        }
    }
}

// The mapping is owned exclusively by the chunk. Shared access only reads
// committed bytes, writes need `&mut Arena`.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

/// Append-only bump allocator over mmap'd chunks.
#[derive(Debug)]
pub struct Arena {
    chunk_size: usize,
    chunks: Vec<Chunk>,
    /// Bytes handed out from the last chunk.
    used: usize,
    /// Bytes reserved by the last `preallocate` and not yet committed.
    reserved: usize,
    generation: u32,
    committed: usize,
}

impl Arena {
    /// Create an arena. No memory is mapped until the first allocation.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        Self {
            chunk_size,
            chunks: Vec::new(),
            used: 0,
            reserved: 0,
            generation: 0,
            committed: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently mapped.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes handed out since creation or the last reset.
    pub fn committed_bytes(&self) -> usize {
        self.committed
    }

    /// Bytes mapped from the kernel.
    pub fn mapped_bytes(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    /// Make sure the current chunk has `len` free bytes, mapping one new chunk
    /// if it doesn't.
    fn ensure(&mut self, len: usize) -> Result<(), ArenaError> {
        if len > self.chunk_size {
            return Err(ArenaError::TooLarge {
                requested: len,
                chunk_size: self.chunk_size,
            });
        }
        if !self.chunks.is_empty() && self.chunk_size - self.used >= len {
            return Ok(());
        }
        let chunk = Chunk::map(self.chunk_size)?;
        self.chunks.push(chunk);
        self.used = 0;
        debug!(
            "arena mapped chunk {} ({} bytes, {} committed so far)",
            self.chunks.len(),
            self.chunk_size,
            self.committed
        );
        Ok(())
    }

    fn take(&mut self, len: usize) -> Span {
        let span = Span {
            generation: self.generation,
            chunk: (self.chunks.len() - 1) as u32,
            offset: self.used as u32,
            len: len as u32,
        };
        self.used += len;
        self.committed += len;
        self.reserved = 0;
        span
    }

    /// Hand out `len` zeroed bytes.
    pub fn allocate(&mut self, len: usize) -> Result<Span, ArenaError> {
        if len == 0 {
            return Ok(Span {
                generation: self.generation,
                ..Span::default()
            });
        }
        self.ensure(len)?;
        Ok(self.take(len))
    }

    /// Reserve up to `max_len` bytes for a write whose final length is not
    /// known yet. Nothing is committed until [`Arena::commit`]; a following
    /// `allocate` or `preallocate` discards the reservation.
    pub fn preallocate(&mut self, max_len: usize) -> Result<&mut [u8], ArenaError> {
        self.ensure(max_len.max(1))?;
        self.reserved = max_len;
        let used = self.used;
        let Some(chunk) = self.chunks.last_mut() else {
            unreachable!("ensure() maps a chunk");
        };
        // SAFETY: ensure() guaranteed `used + max_len <= chunk_size`.
        Ok(unsafe { chunk.slice_mut(used, max_len) })
    }

    /// Commit the first `len` bytes of the outstanding reservation.
    ///
    /// Returns `None` when `len` exceeds what was reserved; the reservation is
    /// left untouched in that case.
    pub fn commit(&mut self, len: usize) -> Option<Span> {
        if len > self.reserved || self.chunks.is_empty() {
            return None;
        }
        Some(self.take(len))
    }

    /// Copy `bytes` into the arena.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Span, ArenaError> {
        let span = self.allocate(bytes.len())?;
        self.bytes_mut(span).copy_from_slice(bytes);
        Ok(span)
    }

    /// Copy `text` into the arena.
    pub fn alloc_str(&mut self, text: &str) -> Result<StrRef, ArenaError> {
        self.alloc_bytes(text.as_bytes()).map(StrRef)
    }

    /// Write `parts` joined by single spaces without an intermediate
    /// allocation. Invalid UTF-8 is replaced lossily.
    pub fn alloc_joined(&mut self, parts: &[&[u8]]) -> Result<StrRef, ArenaError> {
        let total = parts.iter().map(|p| p.len()).sum::<usize>() + parts.len().saturating_sub(1);
        let buf = self.preallocate(total)?;
        let mut pos = 0;
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                buf[pos] = b' ';
                pos += 1;
            }
            buf[pos..pos + part.len()].copy_from_slice(part);
            pos += part.len();
        }
        if std::str::from_utf8(&buf[..pos]).is_ok() {
            let span = self.commit(pos).unwrap_or_default();
            return Ok(StrRef(span));
        }
        let lossy = String::from_utf8_lossy(&buf[..pos]).into_owned();
        self.alloc_str(&lossy)
    }

    /// Copy a token that should be text, replacing invalid UTF-8 lossily.
    pub fn alloc_text(&mut self, bytes: &[u8]) -> Result<StrRef, ArenaError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.alloc_str(text),
            Err(_) => self.alloc_str(&String::from_utf8_lossy(bytes)),
        }
    }

    fn resolve(&self, span: Span) -> Option<(&Chunk, usize, usize)> {
        if span.len == 0 || span.generation != self.generation {
            return None;
        }
        let chunk = self.chunks.get(span.chunk as usize)?;
        let offset = span.offset as usize;
        let len = span.len as usize;
        if offset + len > chunk.size {
            return None;
        }
        Some((chunk, offset, len))
    }

    /// Bytes behind a span. Stale or empty spans resolve to `&[]`.
    pub fn bytes(&self, span: Span) -> &[u8] {
        match self.resolve(span) {
            // SAFETY: resolve() bounds-checked the range against the chunk.
            Some((chunk, offset, len)) => unsafe { chunk.slice(offset, len) },
            None => &[],
        }
    }

    /// Mutable bytes behind a span. Stale or empty spans resolve to `&mut []`.
    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        let Some((_, offset, len)) = self.resolve(span) else {
            return &mut [];
        };
        let chunk = &mut self.chunks[span.chunk as usize];
        // SAFETY: resolve() bounds-checked the range against the chunk.
        unsafe { chunk.slice_mut(offset, len) }
    }

    /// Text behind a string handle.
    pub fn str(&self, text: StrRef) -> &str {
        std::str::from_utf8(self.bytes(text.0)).unwrap_or("")
    }

    /// Release every chunk. Handles issued before the reset resolve to empty
    /// slices from now on.
    pub fn reset(&mut self) {
        trace!(
            "arena reset: unmapping {} chunks ({} bytes committed)",
            self.chunks.len(),
            self.committed
        );
        self.chunks.clear();
        self.used = 0;
        self.reserved = 0;
        self.committed = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
