//! Proof bundles returned by `GetProof` and single-chunk spot checks.

use serde::{Deserialize, Serialize};
use vault_cas::{compute_hash, Blake3Hash, MerkleProof};
use vault_manifest::ContentId;

/// Inclusion proofs for some or all chunks of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    pub cid: ContentId,
    #[serde(with = "vault_cas::serde_hex")]
    pub merkle_root: Blake3Hash,
    pub chunk_count: u64,
    pub chunk_size: u64,
    pub total_size: u64,
    pub proofs: Vec<MerkleProof>,
}

impl ProofBundle {
    /// Check every proof against the bundle root, and the root against the CID.
    ///
    /// Needs nothing but the bundle itself, so a third party holding only the
    /// CID can audit it.
    pub fn verify(&self) -> bool {
        let cid = ContentId::derive(
            self.chunk_size,
            self.total_size,
            self.chunk_count,
            &self.merkle_root,
        );
        if cid != self.cid || self.proofs.is_empty() {
            return false;
        }
        self.proofs
            .iter()
            .all(|p| p.leaf_count == self.chunk_count && p.verify_against(&self.merkle_root))
    }

    pub fn proof_for(&self, index: u64) -> Option<&MerkleProof> {
        self.proofs.iter().find(|p| p.leaf_index == index)
    }
}

/// One chunk fetched from the store together with the proof that ties it to
/// its object's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedChunk {
    pub index: u64,
    pub data: Vec<u8>,
    pub proof: MerkleProof,
}

impl VerifiedChunk {
    /// Recheck the bytes against the proof and a trusted root.
    pub fn verify_against(&self, root: &Blake3Hash) -> bool {
        compute_hash(&self.data) == self.proof.leaf_digest
            && self.proof.leaf_index == self.index
            && self.proof.verify_against(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_cas::MerkleTree;

    fn bundle(count: u64) -> ProofBundle {
        let leaves: Vec<_> = (0..count).map(|i| compute_hash(&[i as u8])).collect();
        let tree = MerkleTree::build(&leaves);
        let root = tree.root();
        ProofBundle {
            cid: ContentId::derive(1, count, count, &root),
            merkle_root: root,
            chunk_count: count,
            chunk_size: 1,
            total_size: count,
            proofs: (0..count).filter_map(|i| tree.proof(i)).collect(),
        }
    }

    #[test]
    fn test_bundle_verifies() {
        for count in [1, 2, 3, 5, 8] {
            let b = bundle(count);
            assert_eq!(b.proofs.len() as u64, count);
            assert!(b.verify(), "count {count}");
            assert!(b.proof_for(count - 1).is_some());
        }
    }

    #[test]
    fn test_bundle_rejects_wrong_cid() {
        let mut b = bundle(3);
        b.total_size += 1;
        assert!(!b.verify());
    }

    #[test]
    fn test_bundle_rejects_empty_proofs() {
        let mut b = bundle(3);
        b.proofs.clear();
        assert!(!b.verify());
    }

    #[test]
    fn test_bundle_rejects_flipped_sibling() {
        let mut b = bundle(5);
        b.proofs[2].siblings[0][0] ^= 0x01;
        assert!(!b.verify());
    }

    #[test]
    fn test_verified_chunk() {
        let data = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let leaves: Vec<_> = data.iter().map(|d| compute_hash(d)).collect();
        let tree = MerkleTree::build(&leaves);

        let chunk = VerifiedChunk {
            index: 1,
            data: data[1].clone(),
            proof: tree.proof(1).unwrap(),
        };
        assert!(chunk.verify_against(&tree.root()));

        let forged = VerifiedChunk {
            data: b"x".to_vec(),
            ..chunk
        };
        assert!(!forged.verify_against(&tree.root()));
    }
}
