//! The vault engine.
//!
//! Ingest: `Read` stream → [`Chunker`] → batch hashing on a Rayon pool →
//! `ChunkStore::put` in chunk order → Merkle root → manifest → optional
//! receipt → `ManifestIndex::record` (the commit point).
//!
//! Retrieve: manifest → `ChunkStore::get` for every digest in order →
//! re-chunk and re-hash the reassembled bytes → compare the recomputed root
//! against the manifest before releasing anything.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::instrument;
use vault_cas::{
    compute_hash, hash_to_hex, merkle_root, split_bytes, Blake3Hash, CasError, Chunk, ChunkHasher,
    ChunkStore, Chunker, FsChunkStore, DEFAULT_CHUNK_SIZE,
};
use vault_config::{
    log_index_warn, log_ingest_debug, log_ingest_error, log_ingest_info, log_proof_debug,
    log_retrieve_debug, log_retrieve_error, log_store_debug, Config,
};
use vault_manifest::{ContentId, LmdbManifestIndex, Manifest, ManifestIndex};

use crate::error::{Corruption, Result, VaultError};
use crate::proof::{ProofBundle, VerifiedChunk};
use crate::receipt::{sign_payload, Ed25519Signer, Receipt, ReceiptPayload, ReceiptSigner, ReceiptType};

/// Default number of chunks hashed and stored per batch
pub const DEFAULT_BATCH_CHUNKS: usize = 16;

/// Per-ingest settings.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    /// Produce a signed ingest receipt; fails the ingest if no signer works
    pub sign: bool,
    /// Chunks held in memory at once
    pub batch_chunks: usize,
    /// Checked between batches and before commit
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sign: false,
            batch_chunks: DEFAULT_BATCH_CHUNKS,
            cancel: None,
        }
    }
}

impl IngestOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn signed(mut self, sign: bool) -> Self {
        self.sign = sign;
        self
    }

    pub fn with_batch_chunks(mut self, batch_chunks: usize) -> Self {
        self.batch_chunks = batch_chunks;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub cid: ContentId,
    pub total_size: u64,
    pub chunk_count: u64,
    #[serde(with = "vault_cas::serde_hex")]
    pub merkle_root: Blake3Hash,
    pub receipt: Option<Receipt>,
    /// Chunks written by this ingest
    pub new_chunks: u64,
    /// Chunks the store already held
    pub deduplicated_chunks: u64,
}

#[derive(Debug, Clone)]
pub struct RetrieveResult {
    pub data: Vec<u8>,
    pub manifest: Manifest,
    pub receipt: Option<Receipt>,
}

/// Outcome of a full integrity audit of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub cid: ContentId,
    pub chunks_checked: u64,
    pub bytes_checked: u64,
    #[serde(with = "vault_cas::serde_hex")]
    pub merkle_root: Blake3Hash,
}

/// Content-addressed vault over an explicit chunk store and manifest index.
pub struct Vault<S, M> {
    store: S,
    index: M,
    hasher: ChunkHasher,
    signer: Option<Arc<dyn ReceiptSigner>>,
    options: IngestOptions,
}

impl Vault<FsChunkStore, LmdbManifestIndex> {
    /// Filesystem chunk store plus LMDB manifest index, wired from config.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let chunk_root = config.storage.chunk_root();
        let manifest_dir = config.storage.manifest_dir();
        let store = FsChunkStore::new(&chunk_root)?;
        let index = LmdbManifestIndex::open(&manifest_dir)?;

        let options = IngestOptions::default()
            .with_chunk_size(config.chunking.chunk_size)
            .with_batch_chunks(config.chunking.batch_chunks)
            .signed(config.signing.enabled);

        let mut vault = Vault::with_threads(store, index, config.chunking.threads)?.with_options(options);

        if let Some(key_file) = config.signing.key_file() {
            let signer = Ed25519Signer::from_hex_file(&key_file)?;
            vault = vault.with_signer(Arc::new(signer));
        }

        log_ingest_debug!(
            "Opened vault",
            chunk_root = %chunk_root.display(),
            manifest_dir = %manifest_dir.display(),
            hash_threads = vault.hasher.threads()
        );
        Ok(vault)
    }
}

impl<S: ChunkStore, M: ManifestIndex> Vault<S, M> {
    pub fn new(store: S, index: M) -> Result<Self> {
        Self::with_threads(store, index, None)
    }

    /// Like [`new`](Self::new) with an explicit hashing thread count.
    pub fn with_threads(store: S, index: M, threads: Option<usize>) -> Result<Self> {
        Ok(Self {
            store,
            index,
            hasher: ChunkHasher::new(threads)?,
            signer: None,
            options: IngestOptions::default(),
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn ReceiptSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Default options for [`ingest`](Self::ingest).
    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &M {
        &self.index
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Ingest a stream with the vault's default options, overriding chunk
    /// size and signing.
    pub fn ingest<R: Read>(&self, reader: R, chunk_size: usize, sign: bool) -> Result<IngestResult> {
        let options = self.options.clone().with_chunk_size(chunk_size).signed(sign);
        self.ingest_with(reader, &options)
    }

    pub fn ingest_bytes(&self, data: &[u8], options: &IngestOptions) -> Result<IngestResult> {
        self.ingest_with(data, options)
    }

    #[instrument(skip(self, reader, options), fields(chunk_size = options.chunk_size, sign = options.sign))]
    pub fn ingest_with<R: Read>(&self, reader: R, options: &IngestOptions) -> Result<IngestResult> {
        if options.batch_chunks == 0 {
            return Err(VaultError::InvalidInput(
                "batch_chunks must be greater than zero".into(),
            ));
        }
        // Rejects a zero chunk size before any I/O
        let mut chunker = Chunker::new(reader, options.chunk_size)?;

        let signer = match (options.sign, &self.signer) {
            (false, _) => None,
            (true, Some(signer)) => Some(signer.as_ref()),
            (true, None) => {
                return Err(VaultError::SigningUnavailable(
                    "signed ingest requested but no signer is configured".into(),
                ))
            }
        };

        let mut digests: Vec<Blake3Hash> = Vec::new();
        let mut total_size = 0u64;
        let mut new_chunks = 0u64;
        let mut deduplicated_chunks = 0u64;

        loop {
            if options.is_cancelled() {
                return Err(self.cancelled(digests.len() as u64));
            }

            let batch: Vec<Chunk> = chunker
                .by_ref()
                .take(options.batch_chunks)
                .collect::<std::io::Result<_>>()
                .map_err(VaultError::Stream)?;
            if batch.is_empty() {
                break;
            }

            let batch_digests = self.hasher.hash_batch(&batch);
            for (chunk, digest) in batch.iter().zip(&batch_digests) {
                let outcome = self.store.put(digest, &chunk.data)?;
                if outcome.already_existed {
                    deduplicated_chunks += 1;
                } else {
                    new_chunks += 1;
                }
                total_size += chunk.len() as u64;
            }
            log_store_debug!(
                "Stored chunk batch",
                first_index = batch[0].index,
                chunks = batch.len()
            );
            digests.extend(batch_digests);
        }

        let created_at = unix_now();
        let manifest = Manifest::new(options.chunk_size as u64, total_size, digests, created_at);

        // Sign before commit: a failed signed ingest records nothing
        let receipt = match signer {
            Some(signer) => Some(self.sign(signer, &manifest, ReceiptType::Ingest, created_at)?),
            None => None,
        };

        if options.is_cancelled() {
            return Err(self.cancelled(manifest.chunk_count));
        }

        if let Err(err) = self.index.record(&manifest) {
            let err = VaultError::from(err);
            if err.is_integrity_error() {
                log_ingest_error!("Manifest conflict", cid = %manifest.cid, error = %err);
            }
            return Err(err);
        }

        log_ingest_info!(
            "Ingest committed",
            cid = %manifest.cid,
            total_size = manifest.total_size,
            chunks = manifest.chunk_count,
            new_chunks = new_chunks,
            deduplicated = deduplicated_chunks
        );

        Ok(IngestResult {
            cid: manifest.cid,
            total_size: manifest.total_size,
            chunk_count: manifest.chunk_count,
            merkle_root: manifest.merkle_root,
            receipt,
            new_chunks,
            deduplicated_chunks,
        })
    }

    fn cancelled(&self, chunks_stored: u64) -> VaultError {
        log_ingest_debug!("Ingest cancelled", chunks_stored = chunks_stored);
        VaultError::Cancelled { chunks_stored }
    }

    fn sign(
        &self,
        signer: &dyn ReceiptSigner,
        manifest: &Manifest,
        receipt_type: ReceiptType,
        created_at: u64,
    ) -> Result<Receipt> {
        let payload = ReceiptPayload::for_manifest(manifest, receipt_type, created_at);
        sign_payload(signer, payload).map_err(|e| {
            log_ingest_error!("Signing failed", cid = %manifest.cid, error = %e);
            VaultError::from(e)
        })
    }

    // ------------------------------------------------------------------
    // Retrieve
    // ------------------------------------------------------------------

    /// Reassemble and verify an object. Never returns bytes whose recomputed
    /// root differs from the recorded one.
    pub fn retrieve(&self, cid: &ContentId) -> Result<Vec<u8>> {
        Ok(self.retrieve_with_receipt(cid, false)?.data)
    }

    #[instrument(skip(self), fields(cid = %cid))]
    pub fn retrieve_with_receipt(&self, cid: &ContentId, sign: bool) -> Result<RetrieveResult> {
        let signer = match (sign, &self.signer) {
            (false, _) => None,
            (true, Some(signer)) => Some(Arc::clone(signer)),
            (true, None) => {
                return Err(VaultError::SigningUnavailable(
                    "signed retrieve requested but no signer is configured".into(),
                ))
            }
        };

        let manifest = self.stat(cid)?;

        let mut data = Vec::with_capacity(usize::try_from(manifest.total_size).unwrap_or(0));
        for (index, digest) in manifest.chunk_digests.iter().enumerate() {
            let bytes = self.fetch_chunk(&manifest, index as u64, digest)?;
            data.extend_from_slice(&bytes);
        }

        self.check_reassembled(cid, &manifest, &data)?;
        log_retrieve_debug!(
            "Retrieve verified",
            cid = %manifest.cid,
            total_size = manifest.total_size
        );

        let receipt = match signer {
            Some(signer) => {
                let payload = ReceiptPayload::for_manifest(&manifest, ReceiptType::Retrieve, unix_now());
                Some(sign_payload(signer.as_ref(), payload)?)
            }
            None => None,
        };

        Ok(RetrieveResult {
            data,
            manifest,
            receipt,
        })
    }

    /// Re-run chunking, hashing and the Merkle build over reassembled bytes.
    /// The re-derived CID must equal the one the caller asked for.
    fn check_reassembled(&self, requested: &ContentId, manifest: &Manifest, data: &[u8]) -> Result<()> {
        if data.len() as u64 != manifest.total_size {
            return Err(self.corruption(
                manifest,
                Corruption::SizeMismatch {
                    index: None,
                    expected: manifest.total_size,
                    actual: data.len() as u64,
                },
            ));
        }

        let slices = split_bytes(data, manifest.chunk_size as usize)?;
        let digests = self.hasher.hash_slices(&slices);
        if digests.len() as u64 != manifest.chunk_count {
            return Err(self.corruption(
                manifest,
                Corruption::ChunkCount {
                    expected: manifest.chunk_count,
                    actual: digests.len() as u64,
                },
            ));
        }

        let root = merkle_root(&digests);
        let cid = ContentId::derive(manifest.chunk_size, manifest.total_size, manifest.chunk_count, &root);
        if root != manifest.merkle_root {
            return Err(self.corruption(
                manifest,
                Corruption::RootMismatch {
                    expected: hash_to_hex(&manifest.merkle_root),
                    actual: hash_to_hex(&root),
                },
            ));
        }
        if cid != *requested {
            return Err(self.corruption_of(
                requested,
                Corruption::CidMismatch {
                    expected: requested.to_string(),
                    actual: cid.to_string(),
                },
            ));
        }
        Ok(())
    }

    /// Fetch one listed chunk, turning store-level absence or tampering into
    /// `CorruptionDetected`.
    fn fetch_chunk(&self, manifest: &Manifest, index: u64, digest: &Blake3Hash) -> Result<Vec<u8>> {
        match self.store.get(digest) {
            Ok(bytes) => Ok(bytes),
            Err(CasError::NotFound { hash }) => Err(self.corruption(
                manifest,
                Corruption::MissingChunk {
                    index,
                    digest: hash,
                },
            )),
            Err(CasError::HashMismatch { expected, actual }) => Err(self.corruption(
                manifest,
                Corruption::ChunkDigestMismatch {
                    index,
                    expected,
                    actual,
                },
            )),
            Err(other) => Err(VaultError::Store(other)),
        }
    }

    fn corruption(&self, manifest: &Manifest, kind: Corruption) -> VaultError {
        self.corruption_of(&manifest.cid, kind)
    }

    fn corruption_of(&self, cid: &ContentId, kind: Corruption) -> VaultError {
        log_retrieve_error!("Corruption detected", cid = %cid, kind = %kind);
        VaultError::CorruptionDetected {
            cid: cid.to_string(),
            kind,
        }
    }

    /// Fetch a single chunk and prove it belongs to the object, without
    /// touching the other chunks.
    #[instrument(skip(self), fields(cid = %cid))]
    pub fn retrieve_chunk(&self, cid: &ContentId, index: u64) -> Result<VerifiedChunk> {
        let manifest = self.stat(cid)?;
        let digest = *manifest
            .chunk_digests
            .get(usize::try_from(index).unwrap_or(usize::MAX))
            .ok_or_else(|| out_of_range(&manifest, index))?;

        let data = self.fetch_chunk(&manifest, index, &digest)?;

        let expected_len = manifest.chunk_len(index).unwrap_or(0);
        if data.len() as u64 != expected_len {
            return Err(self.corruption(
                &manifest,
                Corruption::SizeMismatch {
                    index: Some(index),
                    expected: expected_len,
                    actual: data.len() as u64,
                },
            ));
        }

        let actual = compute_hash(&data);
        if actual != digest {
            return Err(self.corruption(
                &manifest,
                Corruption::ChunkDigestMismatch {
                    index,
                    expected: hash_to_hex(&digest),
                    actual: hash_to_hex(&actual),
                },
            ));
        }

        let tree = manifest.merkle_tree();
        let proof = tree
            .proof(index)
            .ok_or_else(|| out_of_range(&manifest, index))?;
        if !proof.verify_against(&manifest.merkle_root) {
            return Err(self.corruption(
                &manifest,
                Corruption::RootMismatch {
                    expected: hash_to_hex(&manifest.merkle_root),
                    actual: hash_to_hex(&tree.root()),
                },
            ));
        }

        Ok(VerifiedChunk { index, data, proof })
    }

    // ------------------------------------------------------------------
    // Proofs and audits
    // ------------------------------------------------------------------

    /// Inclusion proof for one chunk, or for every chunk when `index` is None.
    #[instrument(skip(self), fields(cid = %cid))]
    pub fn get_proof(&self, cid: &ContentId, index: Option<u64>) -> Result<ProofBundle> {
        let manifest = self.stat(cid)?;
        let tree = manifest.merkle_tree();

        let proofs = match index {
            Some(i) => vec![tree.proof(i).ok_or_else(|| out_of_range(&manifest, i))?],
            None => (0..manifest.chunk_count)
                .map(|i| tree.proof(i).ok_or_else(|| out_of_range(&manifest, i)))
                .collect::<Result<_>>()?,
        };
        log_proof_debug!("Built proofs", cid = %manifest.cid, proofs = proofs.len());

        Ok(ProofBundle {
            cid: manifest.cid,
            merkle_root: manifest.merkle_root,
            chunk_count: manifest.chunk_count,
            chunk_size: manifest.chunk_size,
            total_size: manifest.total_size,
            proofs,
        })
    }

    /// Check every chunk of an object against its manifest, one chunk in
    /// memory at a time.
    #[instrument(skip(self), fields(cid = %cid))]
    pub fn verify(&self, cid: &ContentId) -> Result<VerifyReport> {
        let manifest = self.stat(cid)?;

        let mut digests = Vec::with_capacity(manifest.chunk_digests.len());
        let mut bytes_checked = 0u64;
        for (i, digest) in manifest.chunk_digests.iter().enumerate() {
            let index = i as u64;
            let data = self.fetch_chunk(&manifest, index, digest)?;

            let expected_len = manifest.chunk_len(index).unwrap_or(0);
            if data.len() as u64 != expected_len {
                return Err(self.corruption(
                    &manifest,
                    Corruption::SizeMismatch {
                        index: Some(index),
                        expected: expected_len,
                        actual: data.len() as u64,
                    },
                ));
            }
            let actual = compute_hash(&data);
            if actual != *digest {
                return Err(self.corruption(
                    &manifest,
                    Corruption::ChunkDigestMismatch {
                        index,
                        expected: hash_to_hex(digest),
                        actual: hash_to_hex(&actual),
                    },
                ));
            }
            bytes_checked += data.len() as u64;
            digests.push(actual);
        }

        let root = merkle_root(&digests);
        if root != manifest.merkle_root {
            return Err(self.corruption(
                &manifest,
                Corruption::RootMismatch {
                    expected: hash_to_hex(&manifest.merkle_root),
                    actual: hash_to_hex(&root),
                },
            ));
        }

        Ok(VerifyReport {
            cid: manifest.cid,
            chunks_checked: digests.len() as u64,
            bytes_checked,
            merkle_root: root,
        })
    }

    /// The recorded manifest for `cid`.
    pub fn stat(&self, cid: &ContentId) -> Result<Manifest> {
        self.index.fetch(cid).map_err(|e| {
            let err = VaultError::from(e);
            if !matches!(err, VaultError::NotFound(_)) {
                log_index_warn!("Manifest fetch failed", cid = %cid, error = %err);
            }
            err
        })
    }
}

fn out_of_range(manifest: &Manifest, index: u64) -> VaultError {
    VaultError::InvalidInput(format!(
        "chunk index {} out of range for {} ({} chunks)",
        index, manifest.cid, manifest.chunk_count
    ))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_cas::MemoryChunkStore;
    use vault_manifest::MemoryManifestIndex;

    fn vault() -> Vault<MemoryChunkStore, MemoryManifestIndex> {
        Vault::with_threads(MemoryChunkStore::new(), MemoryManifestIndex::new(), Some(2)).unwrap()
    }

    #[test]
    fn test_ingest_counts_new_and_deduplicated() {
        let v = vault();
        // Two identical 4-byte chunks and a short tail
        let result = v.ingest(&b"abcdabcdxy"[..], 4, false).unwrap();

        assert_eq!(result.chunk_count, 3);
        assert_eq!(result.total_size, 10);
        assert_eq!(result.new_chunks, 2);
        assert_eq!(result.deduplicated_chunks, 1);
        assert!(result.receipt.is_none());
        assert_eq!(v.store().len(), 2);
    }

    #[test]
    fn test_small_batches_match_single_batch() {
        let v = vault();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();

        let one = v
            .ingest_bytes(&data, &IngestOptions::default().with_chunk_size(64))
            .unwrap();
        let many = v
            .ingest_bytes(
                &data,
                &IngestOptions::default().with_chunk_size(64).with_batch_chunks(1),
            )
            .unwrap();
        assert_eq!(one.cid, many.cid);
        assert_eq!(one.merkle_root, many.merkle_root);
    }

    #[test]
    fn test_zero_chunk_size_rejected_before_io() {
        struct Untouchable;
        impl Read for Untouchable {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                panic!("reader must not be touched");
            }
        }

        let v = vault();
        assert!(matches!(
            v.ingest(Untouchable, 0, false),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let v = vault();
        let options = IngestOptions::default().with_batch_chunks(0);
        assert!(matches!(
            v.ingest_bytes(b"x", &options),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_sign_without_signer() {
        let v = vault();
        assert!(matches!(
            v.ingest(&b"data"[..], 2, true),
            Err(VaultError::SigningUnavailable(_))
        ));
        assert!(v.index().is_empty());
    }

    #[test]
    fn test_stream_error_surfaces() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("connection reset"))
            }
        }

        let v = vault();
        assert!(matches!(v.ingest(Broken, 8, false), Err(VaultError::Stream(_))));
        assert!(v.index().is_empty());
    }

    #[test]
    fn test_retrieve_chunk_and_out_of_range() {
        let v = vault();
        let result = v.ingest(&b"0123456789"[..], 4, false).unwrap();

        let chunk = v.retrieve_chunk(&result.cid, 2).unwrap();
        assert_eq!(chunk.data, b"89");
        assert!(chunk.verify_against(&result.merkle_root));

        assert!(matches!(
            v.retrieve_chunk(&result.cid, 3),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(
            v.get_proof(&result.cid, Some(3)),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_cid_is_not_found() {
        let v = vault();
        let cid = ContentId::from_bytes([0x42; 32]);
        assert!(matches!(v.retrieve(&cid), Err(VaultError::NotFound(_))));
        assert!(matches!(v.get_proof(&cid, None), Err(VaultError::NotFound(_))));
        assert!(matches!(v.verify(&cid), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_verify_report() {
        let v = vault();
        let result = v.ingest(&b"hello vault"[..], 3, false).unwrap();
        let report = v.verify(&result.cid).unwrap();
        assert_eq!(report.chunks_checked, 4);
        assert_eq!(report.bytes_checked, 11);
        assert_eq!(report.merkle_root, result.merkle_root);
    }
}
