//! Fixed-depth append-style Merkle tree over identity commitments.
//!
//! Built locally from a provided leaf set when a caller supplies group
//! artifacts instead of a remote group service. Absent leaves are padded
//! with precomputed zero subtree digests, so two trees built from the same
//! leaf prefix agree on the root regardless of how they were produced.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, ZKeeperError};
use crate::primitives::Field;

/// Tree depth used for RLN groups.
pub const DEPTH_RLN: usize = 15;
/// Tree depth used for Semaphore groups.
pub const DEPTH_SEMAPHORE: usize = 20;

/// Inclusion proof for one leaf of a [`MerkleTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    /// Root the proof commits to.
    pub root: Field,
    /// The proven leaf.
    pub leaf: Field,
    /// Sibling digest per level, leaf level first.
    pub siblings: Vec<Field>,
    /// 0 when the path node is a left child, 1 when right.
    pub path_indices: Vec<u8>,
}

impl MerkleProof {
    /// Recomputes the root from the leaf and path; equals `self.root` for a
    /// valid proof.
    #[must_use]
    pub fn compute_root(&self) -> Field {
        let mut node = self.leaf;
        for (sibling, index) in self.siblings.iter().zip(&self.path_indices) {
            node = if *index == 0 {
                hash_pair(node, *sibling)
            } else {
                hash_pair(*sibling, node)
            };
        }
        node
    }
}

/// Dense fixed-depth Merkle tree padded with zero subtrees.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    depth: usize,
    // levels[0] is the leaf level, levels[depth] holds the single root.
    levels: Vec<Vec<Field>>,
    // zero[k] is the digest of an empty subtree of height k.
    zeros: Vec<Field>,
}

impl MerkleTree {
    /// Builds a tree of the given depth over the leaves, left-aligned.
    ///
    /// # Errors
    /// Fails with `InvalidInput` if the leaf set does not fit the depth.
    pub fn build(depth: usize, leaves: &[Field]) -> Result<Self> {
        let capacity = 1usize
            .checked_shl(u32::try_from(depth).map_err(|_| {
                ZKeeperError::InvalidInput("tree depth out of range".to_string())
            })?)
            .ok_or_else(|| ZKeeperError::InvalidInput("tree depth out of range".to_string()))?;
        if leaves.len() > capacity {
            return Err(ZKeeperError::InvalidInput(format!(
                "{} leaves exceed capacity {capacity} at depth {depth}",
                leaves.len()
            )));
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Field::ZERO);
        for level in 0..depth {
            let below = zeros[level];
            zeros.push(hash_pair(below, below));
        }

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(leaves.to_vec());
        for level in 0..depth {
            let current = &levels[level];
            let zero = zeros[level];
            let mut above = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(zero);
                above.push(hash_pair(left, right));
            }
            // An entirely empty level still yields the zero subtree above it.
            if above.is_empty() {
                above.push(zeros[level + 1]);
            }
            levels.push(above);
        }

        Ok(Self {
            depth,
            levels,
            zeros,
        })
    }

    /// Root of the tree.
    #[must_use]
    pub fn root(&self) -> Field {
        self.levels[self.depth]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth])
    }

    /// Inclusion proof for the given leaf.
    ///
    /// # Errors
    /// Fails with `InvalidInput` if the leaf is not in the tree.
    pub fn proof(&self, leaf: Field) -> Result<MerkleProof> {
        let mut index = self.levels[0]
            .iter()
            .position(|candidate| *candidate == leaf)
            .ok_or_else(|| {
                ZKeeperError::InvalidInput(format!("leaf {leaf} not present in tree"))
            })?;

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        for level in 0..self.depth {
            let sibling_index = index ^ 1;
            let sibling = self.levels[level]
                .get(sibling_index)
                .copied()
                .unwrap_or(self.zeros[level]);
            siblings.push(sibling);
            path_indices.push(u8::try_from(index & 1).unwrap_or(0));
            index >>= 1;
        }

        Ok(MerkleProof {
            root: self.root(),
            leaf,
            siblings,
            path_indices,
        })
    }
}

fn hash_pair(left: Field, right: Field) -> Field {
    let mut hasher = Sha256::new();
    hasher.update(left.to_be_bytes());
    hasher.update(right.to_be_bytes());
    Field::from_digest(&hasher.finalize())
}
