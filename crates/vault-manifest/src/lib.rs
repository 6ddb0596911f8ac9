//! # vault-manifest
//!
//! Content IDs and manifests for stored objects.
//!
//! A manifest records, per content ID, everything needed to reassemble and
//! re-verify an object: total size, chunk size, the ordered chunk digests and
//! their Merkle root. Manifests are immutable once recorded.
//!
//! ## Content ID
//!
//! ```text
//! cid = BLAKE3("vault.cid.v1" || chunk_size:u64be || total_size:u64be
//!              || chunk_count:u64be || merkle_root)
//! ```
//!
//! Binding the chunk count into the CID matters because the Merkle padding
//! rule duplicates the last node of odd levels: leaf lists `[a, b, c]` and
//! `[a, b, c, c]` share a root but never a CID.
//!
//! ## Index Backends
//!
//! - `MemoryManifestIndex`: concurrent in-memory map
//! - `LmdbManifestIndex`: LMDB-backed with ACID write-once transactions

pub mod lmdb;

pub use lmdb::LmdbManifestIndex;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use vault_cas::{chunk_count_for, hash_to_hex, hex_to_hash, merkle_root, Blake3Hash, MerkleTree};

/// Domain tag for content ID derivation
const CID_DOMAIN: &[u8] = b"vault.cid.v1";

/// Errors that can occur during manifest operations
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("Manifest not found: {0}")]
    NotFound(String),

    #[error("Conflicting manifest for {cid}: recorded content differs")]
    Conflict { cid: String },

    #[error("Invalid manifest for {cid}: {reason}")]
    Invalid { cid: String, reason: String },

    #[error("Invalid content ID: {0}")]
    InvalidCid(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

// ============================================================================
// Content ID
// ============================================================================

/// Caller-visible handle for a stored object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(#[serde(with = "vault_cas::serde_hex")] Blake3Hash);

impl ContentId {
    /// Display prefix
    pub const PREFIX: &'static str = "vault:";

    /// Derive the CID of an object from its chunking parameters and root.
    pub fn derive(
        chunk_size: u64,
        total_size: u64,
        chunk_count: u64,
        merkle_root: &Blake3Hash,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CID_DOMAIN);
        hasher.update(&chunk_size.to_be_bytes());
        hasher.update(&total_size.to_be_bytes());
        hasher.update(&chunk_count.to_be_bytes());
        hasher.update(merkle_root);
        Self(*hasher.finalize().as_bytes())
    }

    pub const fn from_bytes(bytes: Blake3Hash) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Blake3Hash {
        &self.0
    }

    /// Bare 64-character hex form (no prefix)
    pub fn to_hex(&self) -> String {
        hash_to_hex(&self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self)
    }
}

impl FromStr for ContentId {
    type Err = ManifestError;

    /// Accepts both `vault:<hex>` and bare hex.
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        hex_to_hash(hex)
            .map(Self)
            .ok_or_else(|| ManifestError::InvalidCid(s.to_string()))
    }
}

// ============================================================================
// Manifest
// ============================================================================

/// Immutable record of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub cid: ContentId,
    pub total_size: u64,
    /// Chunk size the object was split with
    pub chunk_size: u64,
    pub chunk_count: u64,
    /// Chunk digests in chunk order
    #[serde(with = "vault_cas::serde_hex::vec")]
    pub chunk_digests: Vec<Blake3Hash>,
    #[serde(with = "vault_cas::serde_hex")]
    pub merkle_root: Blake3Hash,
    /// Unix seconds
    pub created_at: u64,
}

impl Manifest {
    /// Build a manifest from an ordered digest list, computing the root and CID.
    pub fn new(
        chunk_size: u64,
        total_size: u64,
        chunk_digests: Vec<Blake3Hash>,
        created_at: u64,
    ) -> Self {
        let root = merkle_root(&chunk_digests);
        Self::with_root(chunk_size, total_size, chunk_digests, root, created_at)
    }

    /// Build a manifest when the root has already been computed.
    pub fn with_root(
        chunk_size: u64,
        total_size: u64,
        chunk_digests: Vec<Blake3Hash>,
        merkle_root: Blake3Hash,
        created_at: u64,
    ) -> Self {
        let chunk_count = chunk_digests.len() as u64;
        Self {
            cid: ContentId::derive(chunk_size, total_size, chunk_count, &merkle_root),
            total_size,
            chunk_size,
            chunk_count,
            chunk_digests,
            merkle_root,
            created_at,
        }
    }

    /// Whether two manifests describe the same object. `created_at` is ignored:
    /// re-ingesting identical content is not a conflict.
    pub fn same_content(&self, other: &Manifest) -> bool {
        self.cid == other.cid
            && self.total_size == other.total_size
            && self.chunk_size == other.chunk_size
            && self.chunk_count == other.chunk_count
            && self.chunk_digests == other.chunk_digests
            && self.merkle_root == other.merkle_root
    }

    /// Check internal consistency: counts, sizes, root and CID.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ManifestError::Invalid {
            cid: self.cid.to_string(),
            reason,
        };

        if self.chunk_size == 0 {
            return Err(invalid("chunk size is zero".into()));
        }
        if self.chunk_count != self.chunk_digests.len() as u64 {
            return Err(invalid(format!(
                "chunk_count {} but {} digests",
                self.chunk_count,
                self.chunk_digests.len()
            )));
        }
        let expected_count = chunk_count_for(self.total_size, self.chunk_size as usize);
        if self.chunk_count != expected_count {
            return Err(invalid(format!(
                "{} bytes at chunk size {} needs {} chunks, manifest lists {}",
                self.total_size, self.chunk_size, expected_count, self.chunk_count
            )));
        }
        let root = merkle_root(&self.chunk_digests);
        if root != self.merkle_root {
            return Err(invalid(format!(
                "merkle root {} does not match digests (computed {})",
                hash_to_hex(&self.merkle_root),
                hash_to_hex(&root)
            )));
        }
        let cid = ContentId::derive(self.chunk_size, self.total_size, self.chunk_count, &root);
        if cid != self.cid {
            return Err(invalid(format!("derived CID is {}", cid)));
        }
        Ok(())
    }

    /// Expected byte length of the chunk at `index`.
    pub fn chunk_len(&self, index: u64) -> Option<u64> {
        if index >= self.chunk_count {
            return None;
        }
        if index + 1 < self.chunk_count {
            return Some(self.chunk_size);
        }
        Some(self.total_size - self.chunk_size * index)
    }

    /// Rebuild the full Merkle tree (for proofs).
    pub fn merkle_tree(&self) -> MerkleTree {
        MerkleTree::build(&self.chunk_digests)
    }
}

// ============================================================================
// Index
// ============================================================================

/// Write-once store of manifests keyed by CID.
///
/// `record` of an identical manifest (ignoring `created_at`) is an idempotent
/// no-op; a different manifest for an existing CID fails with
/// [`ManifestError::Conflict`] and never overwrites.
pub trait ManifestIndex: Send + Sync {
    fn record(&self, manifest: &Manifest) -> Result<()>;

    /// Fails with [`ManifestError::NotFound`] when absent.
    fn fetch(&self, cid: &ContentId) -> Result<Manifest>;
}

impl<T: ManifestIndex + ?Sized> ManifestIndex for Arc<T> {
    fn record(&self, manifest: &Manifest) -> Result<()> {
        (**self).record(manifest)
    }

    fn fetch(&self, cid: &ContentId) -> Result<Manifest> {
        (**self).fetch(cid)
    }
}

impl<T: ManifestIndex + ?Sized> ManifestIndex for Box<T> {
    fn record(&self, manifest: &Manifest) -> Result<()> {
        (**self).record(manifest)
    }

    fn fetch(&self, cid: &ContentId) -> Result<Manifest> {
        (**self).fetch(cid)
    }
}

/// Compare an incoming manifest with the one already recorded for its CID.
pub(crate) fn check_existing(existing: &Manifest, incoming: &Manifest) -> Result<()> {
    if existing.same_content(incoming) {
        debug!(cid = %incoming.cid, "manifest already recorded");
        Ok(())
    } else {
        Err(ManifestError::Conflict {
            cid: incoming.cid.to_string(),
        })
    }
}

/// Summary over all recorded manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub manifest_count: u64,
    /// Sum of object sizes, before deduplication
    pub logical_bytes: u64,
    /// Sum of chunk references across manifests
    pub chunk_refs: u64,
}

impl IndexStats {
    fn add(&mut self, manifest: &Manifest) {
        self.manifest_count += 1;
        self.logical_bytes += manifest.total_size;
        self.chunk_refs += manifest.chunk_count;
    }
}

/// In-memory manifest index
#[derive(Debug, Default)]
pub struct MemoryManifestIndex {
    manifests: DashMap<ContentId, Manifest>,
}

impl MemoryManifestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn cids(&self) -> Vec<ContentId> {
        let mut cids: Vec<_> = self.manifests.iter().map(|e| *e.key()).collect();
        cids.sort();
        cids
    }

    pub fn stats(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        for entry in self.manifests.iter() {
            stats.add(entry.value());
        }
        stats
    }
}

impl ManifestIndex for MemoryManifestIndex {
    fn record(&self, manifest: &Manifest) -> Result<()> {
        if let Some(existing) = self.manifests.get(&manifest.cid) {
            return check_existing(existing.value(), manifest);
        }
        manifest.validate()?;

        match self.manifests.entry(manifest.cid) {
            // Lost a race with a concurrent writer
            Entry::Occupied(existing) => check_existing(existing.get(), manifest),
            Entry::Vacant(slot) => {
                slot.insert(manifest.clone());
                debug!(cid = %manifest.cid, "recorded manifest");
                Ok(())
            }
        }
    }

    fn fetch(&self, cid: &ContentId) -> Result<Manifest> {
        self.manifests
            .get(cid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManifestError::NotFound(cid.to_string()))
    }
}
