//! # vault-cas
//!
//! Content addressing primitives for the vault storage engine.
//!
//! Every chunk is identified by its BLAKE3 digest. The same hash function is
//! used to combine Merkle nodes, so a single digest type flows through the
//! whole engine.
//!
//! ## Modules
//!
//! - [`chunker`]: fixed-size, byte-offset chunking of a `Read` stream
//! - [`hasher`]: parallel digest computation for chunk batches (Rayon)
//! - [`merkle`]: binary Merkle tree, inclusion proofs and verification
//! - [`fs_store`]: filesystem chunk store with a 3-level fan-out layout
//! - [`memory`]: in-memory chunk store for tests and ephemeral vaults
//!
//! ## Directory Layout ([`FsChunkStore`])
//!
//! ```text
//! <chunk_root>/
//! └── blake3/
//!     └── ab/
//!         └── cd/
//!             └── abcd1234...ef   # full hex digest
//! ```

pub mod chunker;
pub mod fs_store;
pub mod hasher;
pub mod memory;
pub mod merkle;
pub mod serde_hex;

pub use chunker::{chunk_count_for, split_bytes, Chunk, Chunker, DEFAULT_CHUNK_SIZE};
pub use fs_store::{CasStats, ChunkIterator, FsChunkStore};
pub use hasher::{default_thread_count, ChunkHasher, MAX_HASH_THREADS};
pub use memory::MemoryChunkStore;
pub use merkle::{empty_root, hash_pair, merkle_root, tree_depth, MerkleProof, MerkleTree};

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

/// Errors that can occur during chunking and chunk store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Chunk not found: {hash}")]
    NotFound { hash: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid chunk size: {0} (must be greater than zero)")]
    InvalidChunkSize(usize),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Compute the BLAKE3 hash of the given bytes.
#[inline]
pub fn compute_hash(data: &[u8]) -> Blake3Hash {
    *blake3::hash(data).as_bytes()
}

/// Convert a hash to its lowercase hex representation.
#[inline]
pub fn hash_to_hex(hash: &Blake3Hash) -> String {
    hex::encode(hash)
}

/// Parse a 64-character hex string into a hash.
pub fn hex_to_hash(s: &str) -> Option<Blake3Hash> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(s, &mut hash).ok()?;
    Some(hash)
}

/// Outcome of a [`ChunkStore::put`] call.
///
/// `already_existed` is how deduplication surfaces to callers: a second put of
/// the same digest is a no-op that reports `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutOutcome {
    pub already_existed: bool,
}

impl PutOutcome {
    pub const fn stored() -> Self {
        Self {
            already_existed: false,
        }
    }

    pub const fn existing() -> Self {
        Self {
            already_existed: true,
        }
    }
}

/// Persistence backend for unique chunks, keyed by digest.
///
/// Implementations must tolerate concurrent `put` of the same digest. Since
/// content is identical by definition, last-write-wins is acceptable.
pub trait ChunkStore: Send + Sync {
    /// Store `data` under `digest`. Idempotent.
    fn put(&self, digest: &Blake3Hash, data: &[u8]) -> Result<PutOutcome>;

    /// Fetch the bytes stored under `digest`, failing with
    /// [`CasError::NotFound`] when absent.
    fn get(&self, digest: &Blake3Hash) -> Result<Vec<u8>>;
}

impl<T: ChunkStore + ?Sized> ChunkStore for Arc<T> {
    fn put(&self, digest: &Blake3Hash, data: &[u8]) -> Result<PutOutcome> {
        (**self).put(digest, data)
    }

    fn get(&self, digest: &Blake3Hash) -> Result<Vec<u8>> {
        (**self).get(digest)
    }
}

impl<T: ChunkStore + ?Sized> ChunkStore for Box<T> {
    fn put(&self, digest: &Blake3Hash, data: &[u8]) -> Result<PutOutcome> {
        (**self).put(digest, data)
    }

    fn get(&self, digest: &Blake3Hash) -> Result<Vec<u8>> {
        (**self).get(digest)
    }
}
