//! Engine error taxonomy.
//!
//! Integrity-class errors (`CorruptionDetected`, `IntegrityConflict`) carry the
//! CID plus enough detail (chunk index, expected vs. actual digest) to debug
//! the failure. Nothing here is retried internally.

use std::io;

use thiserror::Error;
use vault_cas::CasError;
use vault_manifest::ManifestError;

use crate::receipt::ReceiptError;

pub type Result<T> = std::result::Result<T, VaultError>;

/// What exactly failed an integrity check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("chunk {index} ({digest}) is missing from the chunk store")]
    MissingChunk { index: u64, digest: String },

    #[error("chunk {index} digest mismatch: expected {expected}, got {actual}")]
    ChunkDigestMismatch {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("merkle root mismatch: expected {expected}, recomputed {actual}")]
    RootMismatch { expected: String, actual: String },

    #[error("size mismatch{}: expected {expected} bytes, got {actual}", chunk_suffix(.index))]
    SizeMismatch {
        index: Option<u64>,
        expected: u64,
        actual: u64,
    },

    #[error("chunk count mismatch: expected {expected}, recomputed {actual}")]
    ChunkCount { expected: u64, actual: u64 },

    #[error("content id mismatch: requested {expected}, data derives {actual}")]
    CidMismatch { expected: String, actual: String },
}

fn chunk_suffix(index: &Option<u64>) -> String {
    index.map(|i| format!(" in chunk {i}")).unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corruption detected in {cid}: {kind}")]
    CorruptionDetected { cid: String, kind: Corruption },

    #[error("Integrity conflict for {cid}: a different manifest is already recorded")]
    IntegrityConflict { cid: String },

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Input stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("Chunk store error: {0}")]
    Store(#[source] CasError),

    #[error("Manifest index error: {0}")]
    Index(#[source] ManifestError),

    #[error("Ingest cancelled after {chunks_stored} chunks; no manifest recorded")]
    Cancelled { chunks_stored: u64 },
}

impl VaultError {
    /// Whether this error signals data loss, tampering or a hash collision.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            VaultError::CorruptionDetected { .. } | VaultError::IntegrityConflict { .. }
        )
    }
}

impl From<CasError> for VaultError {
    fn from(err: CasError) -> Self {
        match err {
            CasError::InvalidChunkSize(size) => {
                VaultError::InvalidInput(format!("chunk size must be positive, got {size}"))
            }
            other => VaultError::Store(other),
        }
    }
}

impl From<ManifestError> for VaultError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(cid) => VaultError::NotFound(cid),
            ManifestError::Conflict { cid } => VaultError::IntegrityConflict { cid },
            ManifestError::InvalidCid(raw) => {
                VaultError::InvalidInput(format!("invalid content ID: {raw}"))
            }
            other => VaultError::Index(other),
        }
    }
}

impl From<ReceiptError> for VaultError {
    fn from(err: ReceiptError) -> Self {
        VaultError::SigningUnavailable(err.to_string())
    }
}

impl From<vault_config::ConfigError> for VaultError {
    fn from(err: vault_config::ConfigError) -> Self {
        VaultError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_errors_map_to_taxonomy() {
        let err: VaultError = ManifestError::NotFound("vault:00".into()).into();
        assert!(matches!(err, VaultError::NotFound(_)));

        let err: VaultError = ManifestError::Conflict { cid: "vault:01".into() }.into();
        assert!(err.is_integrity_error());
        assert!(err.to_string().contains("vault:01"));
    }

    #[test]
    fn test_zero_chunk_size_is_invalid_input() {
        let err: VaultError = CasError::InvalidChunkSize(0).into();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }

    #[test]
    fn test_corruption_message_has_context() {
        let err = VaultError::CorruptionDetected {
            cid: "vault:ab".into(),
            kind: Corruption::SizeMismatch {
                index: Some(2),
                expected: 4,
                actual: 3,
            },
        };
        assert_eq!(
            err.to_string(),
            "Corruption detected in vault:ab: size mismatch in chunk 2: expected 4 bytes, got 3"
        );
        assert!(err.is_integrity_error());
    }
}
