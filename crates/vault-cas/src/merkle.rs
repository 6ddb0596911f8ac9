//! Binary Merkle tree over an ordered digest sequence.
//!
//! Rules (fixed, proofs depend on them):
//! - Leaves are chunk digests in chunk order.
//! - Internal node = BLAKE3(left || right), raw 32-byte concatenation.
//! - A level with an odd node count pairs its last node with itself.
//! - Zero leaves: root = BLAKE3(""). One leaf: root = that leaf.
//!
//! Construction is iterative, level by level, so very large chunk counts do
//! not grow the call stack.

use serde::{Deserialize, Serialize};

use crate::{compute_hash, Blake3Hash};

/// BLAKE3(left || right)
#[inline]
pub fn hash_pair(left: &Blake3Hash, right: &Blake3Hash) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Root of a tree with no leaves.
pub fn empty_root() -> Blake3Hash {
    compute_hash(b"")
}

/// Number of sibling hashes in a proof for a tree of `leaf_count` leaves.
pub fn tree_depth(leaf_count: u64) -> usize {
    let mut width = leaf_count;
    let mut depth = 0;
    while width > 1 {
        width = width.div_ceil(2);
        depth += 1;
    }
    depth
}

fn next_level(level: &[Blake3Hash]) -> Vec<Blake3Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [lone] => hash_pair(lone, lone),
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Compute only the root, keeping a single level in memory.
pub fn merkle_root(leaves: &[Blake3Hash]) -> Blake3Hash {
    match leaves {
        [] => empty_root(),
        [only] => *only,
        _ => {
            let mut level = next_level(leaves);
            while level.len() > 1 {
                level = next_level(&level);
            }
            level[0]
        }
    }
}

/// Fully materialized tree, kept when proofs are needed.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` are the leaves, the last level holds the root
    levels: Vec<Vec<Blake3Hash>>,
}

impl MerkleTree {
    pub fn build(leaves: &[Blake3Hash]) -> Self {
        let mut levels = vec![leaves.to_vec()];
        while let Some(top) = levels.last().filter(|l| l.len() > 1) {
            let parent = next_level(top);
            levels.push(parent);
        }
        Self { levels }
    }

    pub fn root(&self) -> Blake3Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_root)
    }

    pub fn leaf_count(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn leaves(&self) -> &[Blake3Hash] {
        &self.levels[0]
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Inclusion proof for the leaf at `index`, or `None` when out of range.
    pub fn proof(&self, index: u64) -> Option<MerkleProof> {
        let leaf_digest = *self.levels[0].get(usize::try_from(index).ok()?)?;

        let mut siblings = Vec::with_capacity(self.depth());
        let mut idx = index as usize;
        for level in &self.levels[..self.depth()] {
            let sibling_idx = idx ^ 1;
            // Lone last node is paired with itself
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            siblings.push(sibling);
            idx /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_count: self.leaf_count(),
            leaf_digest,
            siblings,
            root: self.root(),
        })
    }
}

/// Proof that one leaf is included under `root`.
///
/// Left/right order at each level is derived from `leaf_index`: an even index
/// means the running node is the left child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub leaf_count: u64,
    #[serde(with = "crate::serde_hex")]
    pub leaf_digest: Blake3Hash,
    /// Sibling hashes from the leaf level upward
    #[serde(with = "crate::serde_hex::vec")]
    pub siblings: Vec<Blake3Hash>,
    #[serde(with = "crate::serde_hex")]
    pub root: Blake3Hash,
}

impl MerkleProof {
    /// Recompute the root from the leaf and siblings.
    ///
    /// Returns `None` for a structurally invalid proof (index out of range or
    /// sibling count not matching the tree depth).
    pub fn computed_root(&self) -> Option<Blake3Hash> {
        if self.leaf_index >= self.leaf_count {
            return None;
        }
        if self.siblings.len() != tree_depth(self.leaf_count) {
            return None;
        }

        let mut current = self.leaf_digest;
        let mut idx = self.leaf_index;
        for sibling in &self.siblings {
            current = if idx % 2 == 0 {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
            idx /= 2;
        }
        Some(current)
    }

    /// Check the proof against its own `root` field.
    pub fn verify(&self) -> bool {
        self.computed_root() == Some(self.root)
    }

    /// Check the proof against a root obtained from a trusted source.
    pub fn verify_against(&self, trusted_root: &Blake3Hash) -> bool {
        self.root == *trusted_root && self.verify()
    }
}
