//! # vault-core
//!
//! Content-addressed storage engine: ingests byte streams as fixed-size
//! chunks, deduplicates them by BLAKE3 digest, commits a manifest keyed by a
//! deterministic CID, and serves verified retrieval, Merkle inclusion proofs
//! and Ed25519-signed receipts.
//!
//! ```ignore
//! use vault_cas::MemoryChunkStore;
//! use vault_core::Vault;
//! use vault_manifest::MemoryManifestIndex;
//!
//! let vault = Vault::new(MemoryChunkStore::new(), MemoryManifestIndex::new())?;
//! let stored = vault.ingest(&b"hello"[..], 1024 * 1024, false)?;
//! assert_eq!(vault.retrieve(&stored.cid)?, b"hello");
//! ```

pub mod error;
pub mod proof;
pub mod receipt;
pub mod vault;

pub use error::{Corruption, Result, VaultError};
pub use proof::{ProofBundle, VerifiedChunk};
pub use receipt::{
    sign_payload, verify_receipt, verifying_key_from_hex, Ed25519Signer, Receipt, ReceiptError,
    ReceiptPayload, ReceiptSigner, ReceiptType,
};
pub use vault::{
    IngestOptions, IngestResult, RetrieveResult, Vault, VerifyReport, DEFAULT_BATCH_CHUNKS,
};

pub use vault_cas::{Blake3Hash, ChunkStore, MerkleProof, PutOutcome};
pub use vault_manifest::{ContentId, Manifest, ManifestIndex};
