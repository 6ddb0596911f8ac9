//! LMDB-backed manifest index for persistent, crash-safe CID→manifest mapping.
//!
//! One record per CID, bincode-encoded. The write-once check and the insert
//! happen inside a single write transaction; LMDB serializes writers, so two
//! racing ingests of the same content end with exactly one record.

use std::path::Path;

use heed::types::{Bytes, DecodeIgnore, SerdeBincode};
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;

use crate::{check_existing, ContentId, IndexStats, Manifest, ManifestError, ManifestIndex, Result};

pub struct LmdbManifestIndex {
    env: Env,

    /// CID bytes → Manifest
    manifests_db: Database<Bytes, SerdeBincode<Manifest>>,
}

impl LmdbManifestIndex {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Maximum readers
    const MAX_READERS: u32 = 128;

    /// Open or create an index at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per directory by this process
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let manifests_db = env.create_database(&mut wtxn, Some("manifests"))?;
        wtxn.commit()?;

        debug!("Opened LMDB manifest index at {:?}", path);

        Ok(Self { env, manifests_db })
    }

    /// Number of recorded manifests
    pub fn len(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.manifests_db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All recorded CIDs, in key order
    pub fn cids(&self) -> Result<Vec<ContentId>> {
        let rtxn = self.env.read_txn()?;
        let mut cids = Vec::new();
        for item in self
            .manifests_db
            .remap_data_type::<DecodeIgnore>()
            .iter(&rtxn)?
        {
            let (key, ()) = item?;
            let bytes: [u8; 32] = key.try_into().map_err(|_| ManifestError::InvalidCid(format!(
                "stored key has {} bytes",
                key.len()
            )))?;
            cids.push(ContentId::from_bytes(bytes));
        }
        Ok(cids)
    }

    /// Summary over all recorded manifests.
    ///
    /// Note: decodes every manifest; expensive for large indexes
    pub fn stats(&self) -> Result<IndexStats> {
        let rtxn = self.env.read_txn()?;
        let mut stats = IndexStats::default();
        for item in self.manifests_db.iter(&rtxn)? {
            let (_, manifest) = item?;
            stats.add(&manifest);
        }
        Ok(stats)
    }

    /// Sync/flush LMDB to disk
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl ManifestIndex for LmdbManifestIndex {
    fn record(&self, manifest: &Manifest) -> Result<()> {
        let key = manifest.cid.as_bytes();
        let mut wtxn = self.env.write_txn()?;

        if let Some(existing) = self.manifests_db.get(&wtxn, key)? {
            // Nothing to write; dropping the txn aborts it
            return check_existing(&existing, manifest);
        }

        manifest.validate()?;
        self.manifests_db.put(&mut wtxn, key, manifest)?;
        wtxn.commit()?;

        debug!(cid = %manifest.cid, chunks = manifest.chunk_count, "recorded manifest");
        Ok(())
    }

    fn fetch(&self, cid: &ContentId) -> Result<Manifest> {
        let rtxn = self.env.read_txn()?;
        self.manifests_db
            .get(&rtxn, cid.as_bytes())?
            .ok_or_else(|| ManifestError::NotFound(cid.to_string()))
    }
}
