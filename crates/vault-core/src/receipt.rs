//! Signed receipts for ingest and retrieve operations.
//!
//! A receipt binds a CID, size and Merkle root to an operation type and a
//! timestamp. The signature is a detached Ed25519 signature over a fixed
//! 97-byte binary encoding of the payload:
//!
//! ```text
//! offset  len  field
//!      0   16  b"vault.receipt.v1"
//!     16    1  receipt_type (0x01 ingest, 0x02 retrieve)
//!     17   32  cid
//!     49    8  total_size   (u64, big-endian)
//!     57   32  merkle_root
//!     89    8  created_at   (u64 Unix seconds, big-endian)
//! ```
//!
//! Any verifier holding the public key can rebuild these bytes from the JSON
//! form of the receipt and check the signature with [`verify_receipt`].

use std::fmt;
use std::path::Path;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_cas::Blake3Hash;
use vault_manifest::{ContentId, Manifest};

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature does not verify")]
    BadSignature,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which operation a receipt attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptType {
    Ingest,
    Retrieve,
}

impl ReceiptType {
    /// Tag byte in the canonical encoding
    pub fn tag(self) -> u8 {
        match self {
            ReceiptType::Ingest => 0x01,
            ReceiptType::Retrieve => 0x02,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptType::Ingest => "ingest",
            ReceiptType::Retrieve => "retrieve",
        }
    }
}

impl fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPayload {
    pub cid: ContentId,
    pub total_size: u64,
    #[serde(with = "vault_cas::serde_hex")]
    pub merkle_root: Blake3Hash,
    pub receipt_type: ReceiptType,
    /// Unix seconds
    pub created_at: u64,
}

impl ReceiptPayload {
    pub const DOMAIN: &'static [u8; 16] = b"vault.receipt.v1";
    pub const ENCODED_LEN: usize = 97;

    pub fn for_manifest(manifest: &Manifest, receipt_type: ReceiptType, created_at: u64) -> Self {
        Self {
            cid: manifest.cid,
            total_size: manifest.total_size,
            merkle_root: manifest.merkle_root,
            receipt_type,
            created_at,
        }
    }

    /// Fixed binary encoding covered by the signature.
    pub fn canonical_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..16].copy_from_slice(Self::DOMAIN);
        out[16] = self.receipt_type.tag();
        out[17..49].copy_from_slice(self.cid.as_bytes());
        out[49..57].copy_from_slice(&self.total_size.to_be_bytes());
        out[57..89].copy_from_slice(&self.merkle_root);
        out[89..97].copy_from_slice(&self.created_at.to_be_bytes());
        out
    }
}

/// A payload plus its detached signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub payload: ReceiptPayload,
    /// Signature algorithm, e.g. `"ed25519"`
    pub algorithm: String,
    /// Hex-encoded public key of the signer
    pub signer: String,
    /// Hex-encoded signature over [`ReceiptPayload::canonical_bytes`]
    pub signature: String,
}

impl Receipt {
    pub fn signature_bytes(&self) -> Result<Vec<u8>, ReceiptError> {
        hex::decode(&self.signature).map_err(|e| ReceiptError::MalformedSignature(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ReceiptError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ReceiptError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Signing key provider.
///
/// Key material, storage and rotation live behind this trait.
pub trait ReceiptSigner: Send + Sync {
    /// Algorithm name recorded in receipts
    fn algorithm(&self) -> &'static str;

    /// Hex-encoded public key recorded in receipts
    fn key_id(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ReceiptError>;

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Sign `payload` with `signer`.
pub fn sign_payload(
    signer: &dyn ReceiptSigner,
    payload: ReceiptPayload,
) -> Result<Receipt, ReceiptError> {
    let signature = signer.sign(&payload.canonical_bytes())?;
    Ok(Receipt {
        payload,
        algorithm: signer.algorithm().to_string(),
        signer: signer.key_id(),
        signature: hex::encode(signature),
    })
}

/// Ed25519 signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Ed25519Signer {
    pub const ALGORITHM: &'static str = "ed25519";

    /// Fresh random key from the OS RNG
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic key from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    /// Load a key from a file holding the 64-character hex seed.
    pub fn from_hex_file<P: AsRef<Path>>(path: P) -> Result<Self, ReceiptError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let mut seed = [0u8; 32];
        hex::decode_to_slice(contents.trim(), &mut seed).map_err(|e| {
            ReceiptError::InvalidKey(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self::from_seed(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl ReceiptSigner for Ed25519Signer {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn key_id(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ReceiptError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.verifying_key.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Parse a hex-encoded Ed25519 public key.
pub fn verifying_key_from_hex(s: &str) -> Result<VerifyingKey, ReceiptError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s.trim(), &mut bytes)
        .map_err(|e| ReceiptError::InvalidKey(e.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| ReceiptError::InvalidKey(e.to_string()))
}

/// Check a receipt against a trusted public key.
///
/// Only the caller-supplied key is trusted; the `signer` field in the
/// receipt is informational.
pub fn verify_receipt(receipt: &Receipt, key: &VerifyingKey) -> Result<(), ReceiptError> {
    if receipt.algorithm != Ed25519Signer::ALGORITHM {
        return Err(ReceiptError::UnsupportedAlgorithm(receipt.algorithm.clone()));
    }
    let sig_bytes = receipt.signature_bytes()?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| ReceiptError::MalformedSignature(e.to_string()))?;
    key.verify(&receipt.payload.canonical_bytes(), &signature)
        .map_err(|_| ReceiptError::BadSignature)
}
