//! Filesystem chunk store.
//!
//! Chunks live under a 3-level fan-out (`blake3/ab/cd/<hex>`) so no single
//! directory grows unbounded. Writes go to a temp file in the target directory
//! that is then persisted without clobbering. Persisting either creates the
//! final name or fails with `AlreadyExists`, so concurrent puts of the same
//! digest never expose a partial file and exactly one of them reports a fresh
//! write.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::{compute_hash, hash_to_hex, hex_to_hash, Blake3Hash, CasError, ChunkStore, PutOutcome, Result};

/// Chunk store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Create a store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Path where the chunk with the given digest is stored.
    fn blob_path(&self, hash: &Blake3Hash) -> PathBuf {
        let hex = hash_to_hex(hash);
        let l1 = &hex[..2];
        let l2 = &hex[2..4];
        self.root.join("blake3").join(l1).join(l2).join(&hex)
    }

    /// Check if a chunk exists.
    pub fn exists(&self, hash: &Blake3Hash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Delete a chunk.
    ///
    /// The engine never calls this; it exists for garbage collection of
    /// orphaned chunks and for tests that simulate data loss.
    pub fn delete(&self, hash: &Blake3Hash) -> Result<()> {
        let path = self.blob_path(hash);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(())
        } else {
            Err(CasError::NotFound {
                hash: hash_to_hex(hash),
            })
        }
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get statistics about the store.
    ///
    /// Traverses the 3-level structure: blake3/ab/cd/hash
    pub fn stats(&self) -> Result<CasStats> {
        let mut stats = CasStats::default();
        for hash in self.iter()? {
            let size = fs::metadata(self.blob_path(&hash?))?.len();
            stats.record(size);
        }
        Ok(stats)
    }

    /// Get an iterator over all chunk digests in the store.
    pub fn iter(&self) -> Result<ChunkIterator> {
        let mut stack = Vec::with_capacity(FANOUT_DEPTH);
        match fs::read_dir(self.root.join("blake3")) {
            Ok(dir) => stack.push(dir),
            // Nothing stored yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CasError::Io(e)),
        }
        Ok(ChunkIterator { stack })
    }
}

impl ChunkStore for FsChunkStore {
    /// Store bytes under `digest`.
    ///
    /// If the chunk already exists, this is a no-op that reports
    /// `already_existed = true`.
    #[instrument(skip(self, data), fields(digest = %hash_to_hex(digest), len = data.len()), level = "debug")]
    fn put(&self, digest: &Blake3Hash, data: &[u8]) -> Result<PutOutcome> {
        debug_assert_eq!(compute_hash(data), *digest, "digest does not match chunk bytes");
        let path = self.blob_path(digest);

        if path.exists() {
            return Ok(PutOutcome::existing());
        }

        fs::create_dir_all(parent_dir(&path))?;

        // The temp file is unlinked on drop, so every early return cleans up
        let mut temp = NamedTempFile::new_in(parent_dir(&path))?;
        temp.as_file_mut().write_all(data)?;
        temp.as_file().sync_all()?;

        // No-clobber persist never replaces an existing file, so exactly one
        // racing writer observes a fresh store
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                debug!("stored new chunk");
                Ok(PutOutcome::stored())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(PutOutcome::existing()),
            Err(e) => Err(CasError::Io(e.error)),
        }
    }

    /// Retrieve bytes by digest, re-verifying the digest on read.
    #[instrument(skip(self), fields(digest = %hash_to_hex(digest)), level = "debug")]
    fn get(&self, digest: &Blake3Hash) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CasError::NotFound {
                    hash: hash_to_hex(digest),
                })
            }
            Err(e) => return Err(CasError::Io(e)),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let actual = compute_hash(&data);
        if actual != *digest {
            return Err(CasError::HashMismatch {
                expected: hash_to_hex(digest),
                actual: hash_to_hex(&actual),
            });
        }

        Ok(data)
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

/// Statistics about the chunk store
#[derive(Debug, Clone, Default)]
pub struct CasStats {
    /// Number of unique chunks stored
    pub blob_count: u64,
    /// Total bytes stored (deduplicated)
    pub total_bytes: u64,
    /// Chunks < 1KB
    pub small_blobs: u64,
    /// Chunks 1KB - 1MB
    pub medium_blobs: u64,
    /// Chunks >= 1MB
    pub large_blobs: u64,
}

impl CasStats {
    fn record(&mut self, size: u64) {
        self.blob_count += 1;
        self.total_bytes += size;
        if size < 1024 {
            self.small_blobs += 1;
        } else if size < 1024 * 1024 {
            self.medium_blobs += 1;
        } else {
            self.large_blobs += 1;
        }
    }

    /// Calculate average chunk size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}

/// Depth of chunk files below `blake3/`: two fan-out levels plus the file
const FANOUT_DEPTH: usize = 3;

/// Iterator over stored digests, walking `blake3/ab/cd/<hex>` depth-first.
///
/// Entries that are not digest-named files (temp files, stray directories)
/// are skipped.
pub struct ChunkIterator {
    /// Open directories from `blake3/` downward
    stack: Vec<fs::ReadDir>,
}

impl Iterator for ChunkIterator {
    type Item = Result<Blake3Hash>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len();
            let entry = match self.stack.last_mut()?.next() {
                None => {
                    self.stack.pop();
                    continue;
                }
                Some(Err(e)) => return Some(Err(CasError::Io(e))),
                Some(Ok(entry)) => entry,
            };

            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if depth < FANOUT_DEPTH {
                if is_dir {
                    match fs::read_dir(entry.path()) {
                        Ok(dir) => self.stack.push(dir),
                        Err(e) => return Some(Err(CasError::Io(e))),
                    }
                }
                continue;
            }

            if let Some(hash) = entry.file_name().to_str().and_then(hex_to_hash) {
                if !is_dir {
                    return Some(Ok(hash));
                }
            }
        }
    }
}
