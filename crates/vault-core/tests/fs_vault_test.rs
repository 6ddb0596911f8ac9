//! Vault over the filesystem chunk store and the LMDB manifest index.

use std::sync::Arc;
use std::thread;

use vault_cas::FsChunkStore;
use vault_config::testing::TestEnvironment;
use vault_core::{verify_receipt, Corruption, Ed25519Signer, ReceiptType, Vault, VaultError};
use vault_manifest::LmdbManifestIndex;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_open_from_config_and_round_trip() -> anyhow::Result<()> {
    let env = TestEnvironment::new()?;
    let config = env.config_with_chunk_size(4096);
    let vault = Vault::open(&config)?;
    assert_eq!(vault.options().chunk_size, 4096);

    let path = env.create_file("blob.bin", &pattern(20_000))?;
    let file = std::fs::File::open(&path)?;
    let result = vault.ingest(file, 4096, false)?;

    assert_eq!(result.chunk_count, 5);
    assert_eq!(vault.retrieve(&result.cid)?, pattern(20_000));
    assert_eq!(vault.store().stats()?.blob_count, 5);
    Ok(())
}

#[test]
fn test_manifests_survive_reopen() -> anyhow::Result<()> {
    let env = TestEnvironment::new()?;
    let config = env.config_with_chunk_size(1000);

    let cid = {
        let vault = Vault::open(&config)?;
        vault.ingest(&pattern(2500)[..], 1000, false)?.cid
    };

    let reopened = Vault::open(&config)?;
    let manifest = reopened.stat(&cid)?;
    assert_eq!(manifest.total_size, 2500);
    assert_eq!(manifest.chunk_count, 3);
    assert_eq!(reopened.retrieve(&cid)?, pattern(2500));
    assert_eq!(reopened.index().cids()?, vec![cid]);
    Ok(())
}

#[test]
fn test_deleted_chunk_file_is_corruption() {
    let env = TestEnvironment::new().unwrap();
    let vault = Vault::open(&env.config()).unwrap();

    let result = vault.ingest(&pattern(3000)[..], 1000, false).unwrap();
    let manifest = vault.stat(&result.cid).unwrap();
    vault.store().delete(&manifest.chunk_digests[0]).unwrap();

    match vault.retrieve(&result.cid) {
        Err(VaultError::CorruptionDetected {
            kind: Corruption::MissingChunk { index, .. },
            ..
        }) => assert_eq!(index, 0),
        other => panic!("expected CorruptionDetected, got {other:?}"),
    }
}

#[test]
fn test_signing_key_from_config() -> anyhow::Result<()> {
    let env = TestEnvironment::new()?;
    let key_file = env.create_key_file(&[5u8; 32])?;

    let mut config = env.config_with_chunk_size(512);
    config.signing.enabled = true;
    config.signing.key_file = Some(key_file);

    let vault = Vault::open(&config)?;
    assert!(vault.options().sign);

    let result = vault.ingest_with(&pattern(2000)[..], vault.options())?;
    let receipt = result
        .receipt
        .ok_or_else(|| anyhow::anyhow!("signed ingest returned no receipt"))?;
    assert_eq!(receipt.payload.receipt_type, ReceiptType::Ingest);

    let expected_key = Ed25519Signer::from_seed(&[5u8; 32]).verifying_key();
    verify_receipt(&receipt, &expected_key)?;
    Ok(())
}

#[test]
fn test_missing_key_file_is_signing_unavailable() {
    let env = TestEnvironment::new().unwrap();
    let mut config = env.config();
    config.signing.enabled = true;
    config.signing.key_file = Some(env.input_dir.join("absent.key"));

    assert!(matches!(
        Vault::open(&config),
        Err(VaultError::SigningUnavailable(_))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let env = TestEnvironment::new().unwrap();
    let config = env.config_with_chunk_size(0);
    assert!(matches!(Vault::open(&config), Err(VaultError::InvalidInput(_))));
}

#[test]
fn test_concurrent_ingest_of_same_content() {
    let env = TestEnvironment::new().unwrap();
    let store = FsChunkStore::new(&env.chunk_root).unwrap();
    let index = LmdbManifestIndex::open(&env.manifest_dir).unwrap();
    let vault = Arc::new(Vault::new(store, index).unwrap());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || vault.ingest(&pattern(64 * 1024)[..], 4096, false).unwrap())
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let cid = results[0].cid;
    assert!(results.iter().all(|r| r.cid == cid));

    // Each distinct chunk was written exactly once across all callers
    let written: u64 = results.iter().map(|r| r.new_chunks).sum();
    assert_eq!(written, 16);

    assert_eq!(vault.index().len().unwrap(), 1);
    assert_eq!(vault.retrieve(&cid).unwrap(), pattern(64 * 1024));
}

#[test]
fn test_verify_and_proofs_on_disk() -> anyhow::Result<()> {
    let env = TestEnvironment::new()?;
    let vault = Vault::open(&env.config())?;

    let result = vault.ingest(&pattern(9 * 100)[..], 100, false)?;
    let report = vault.verify(&result.cid)?;
    assert_eq!(report.chunks_checked, 9);
    assert_eq!(report.bytes_checked, 900);

    let bundle = vault.get_proof(&result.cid, None)?;
    assert!(bundle.verify());
    let json = serde_json::to_string(&bundle)?;
    let parsed: vault_core::ProofBundle = serde_json::from_str(&json)?;
    assert_eq!(parsed, bundle);
    Ok(())
}
