//! In-memory chunk store backed by `DashMap`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::{compute_hash, hash_to_hex, Blake3Hash, CasError, ChunkStore, PutOutcome, Result};

#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    blobs: DashMap<Blake3Hash, Vec<u8>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, digest: &Blake3Hash) -> bool {
        self.blobs.contains_key(digest)
    }

    /// Total bytes held (deduplicated)
    pub fn total_bytes(&self) -> u64 {
        self.blobs.iter().map(|e| e.value().len() as u64).sum()
    }

    /// Drop a chunk. Returns whether it was present.
    pub fn remove(&self, digest: &Blake3Hash) -> bool {
        self.blobs.remove(digest).is_some()
    }

    /// Replace the bytes behind `digest` without re-hashing.
    ///
    /// Only useful for simulating storage-level tampering.
    pub fn overwrite_unchecked(&self, digest: &Blake3Hash, data: Vec<u8>) -> bool {
        match self.blobs.get_mut(digest) {
            Some(mut entry) => {
                *entry = data;
                true
            }
            None => false,
        }
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, digest: &Blake3Hash, data: &[u8]) -> Result<PutOutcome> {
        debug_assert_eq!(compute_hash(data), *digest, "digest does not match chunk bytes");
        match self.blobs.entry(*digest) {
            Entry::Occupied(_) => Ok(PutOutcome::existing()),
            Entry::Vacant(slot) => {
                slot.insert(data.to_vec());
                Ok(PutOutcome::stored())
            }
        }
    }

    fn get(&self, digest: &Blake3Hash) -> Result<Vec<u8>> {
        let data = self
            .blobs
            .get(digest)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CasError::NotFound {
                hash: hash_to_hex(digest),
            })?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_get_and_dedup() {
        let store = MemoryChunkStore::new();
        let digest = compute_hash(b"abc");

        assert!(!store.put(&digest, b"abc").unwrap().already_existed);
        assert!(store.put(&digest, b"abc").unwrap().already_existed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 3);
        assert_eq!(store.get(&digest).unwrap(), b"abc");
    }

    #[test]
    fn test_remove_then_not_found() {
        let store = MemoryChunkStore::new();
        let digest = compute_hash(b"gone");
        store.put(&digest, b"gone").unwrap();

        assert!(store.remove(&digest));
        assert!(!store.remove(&digest));
        assert!(matches!(store.get(&digest), Err(CasError::NotFound { .. })));
    }

    #[test]
    fn test_overwrite_is_caught_on_read() {
        let store = MemoryChunkStore::new();
        let digest = compute_hash(b"honest");
        store.put(&digest, b"honest").unwrap();

        assert!(store.overwrite_unchecked(&digest, b"forged".to_vec()));
        assert!(matches!(store.get(&digest), Err(CasError::HashMismatch { .. })));
    }

    #[test]
    fn test_concurrent_put_reports_single_writer() {
        let store = Arc::new(MemoryChunkStore::new());
        let digest = compute_hash(b"contended");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.put(&digest, b"contended").unwrap())
            })
            .collect();

        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| !o.already_existed)
            .count();
        assert_eq!(fresh, 1);
        assert_eq!(store.len(), 1);
    }
}
