//! Fixed-size chunking.
//!
//! Boundaries are purely byte-offset based: chunk `i` covers
//! `[i * chunk_size, (i + 1) * chunk_size)`. Identical bytes chunked with the
//! same size always produce identical chunks, which the content ID relies on.
//!
//! Edge cases:
//! - The final chunk is `total_size % chunk_size` bytes long, or a full chunk
//!   when the size divides evenly. It is never empty for non-empty input.
//! - An empty stream yields exactly one zero-length chunk, so the empty object
//!   still has one leaf and a well-defined root.

use std::io::{self, Read};

use crate::{CasError, Result};

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// One fixed-size segment of an ingested object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the object's chunk sequence
    pub index: u64,
    /// Byte offset of the first byte within the object
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lazy chunk iterator over a byte stream.
///
/// Short reads from the underlying reader are coalesced, so a chunk is only
/// emitted short when the stream is exhausted. The iterator is restartable only
/// if the caller rewinds a seekable reader and builds a new `Chunker`.
pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    index: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> Chunker<R> {
    /// Create a chunker. Fails with [`CasError::InvalidChunkSize`] for a zero
    /// chunk size before touching the reader.
    pub fn new(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CasError::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            reader,
            chunk_size,
            index: 0,
            offset: 0,
            done: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total bytes emitted so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // Grows with the data actually read, not with the requested size
        let mut buf = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        let limit = u64::try_from(self.chunk_size).unwrap_or(u64::MAX);
        let filled = match (&mut self.reader).take(limit).read_to_end(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if filled < self.chunk_size {
            self.done = true;
            // Stream ended exactly on a boundary
            if filled == 0 && self.index > 0 {
                return None;
            }
        }

        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            data: buf,
        };
        self.index += 1;
        self.offset += filled as u64;
        Some(Ok(chunk))
    }
}

/// Split an in-memory buffer with the same boundaries as [`Chunker`].
pub fn split_bytes(data: &[u8], chunk_size: usize) -> Result<Vec<&[u8]>> {
    if chunk_size == 0 {
        return Err(CasError::InvalidChunkSize(chunk_size));
    }
    if data.is_empty() {
        return Ok(vec![data]);
    }
    Ok(data.chunks(chunk_size).collect())
}

/// Number of chunks an object of `total_size` bytes splits into (always ≥ 1).
pub fn chunk_count_for(total_size: u64, chunk_size: usize) -> u64 {
    if total_size == 0 || chunk_size == 0 {
        return 1;
    }
    total_size.div_ceil(chunk_size as u64)
}
