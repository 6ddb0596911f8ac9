//! Parallel chunk hashing using Rayon.
//!
//! Each chunk digest is independent, so a batch is hashed across a dedicated
//! thread pool. Results are always returned in chunk order; the Merkle build
//! that follows is the synchronization point.
//!
//! # Thread Pool Configuration
//!
//! To leave room for the request-handling layer, the pool is limited to:
//! - Half of CPU cores, or
//! - Maximum of 4 threads

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::{compute_hash, Blake3Hash, Chunk, Result};

/// Maximum threads for parallel hashing
pub const MAX_HASH_THREADS: usize = 4;

/// Default thread count: min(cpu_cores / 2, MAX_HASH_THREADS)
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).clamp(1, MAX_HASH_THREADS)
}

/// Hashes chunk batches on a private Rayon pool.
#[derive(Debug)]
pub struct ChunkHasher {
    pool: ThreadPool,
}

impl ChunkHasher {
    /// Create a hasher with `threads` workers (None = default).
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let num_threads = threads.unwrap_or_else(default_thread_count).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("vault-hash-{}", i))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Digest every chunk in the batch, preserving order.
    pub fn hash_batch(&self, chunks: &[Chunk]) -> Vec<Blake3Hash> {
        if chunks.len() <= 1 {
            return chunks.iter().map(|c| compute_hash(&c.data)).collect();
        }
        self.pool
            .install(|| chunks.par_iter().map(|c| compute_hash(&c.data)).collect())
    }

    /// Digest raw slices, preserving order.
    pub fn hash_slices(&self, slices: &[&[u8]]) -> Vec<Blake3Hash> {
        self.pool
            .install(|| slices.par_iter().map(|s| compute_hash(s)).collect())
    }
}
