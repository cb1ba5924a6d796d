//! Lean incremental Merkle tree.
//!
//! Append-only tree whose depth grows with the leaf count and whose root is
//! a function of insertion order. A node with no right sibling propagates
//! upward unchanged instead of being padded with a zero hash, so the root of
//! a tree with `n` leaves never depends on leaves that do not exist yet.
//!
//! Membership proofs carry a sibling for each level where one exists; the
//! proof's `index` packs the left/right side of each carried sibling, lowest
//! level first. The siblings array is always padded with zeros out to
//! [`MAX_TREE_DEPTH`] entries so the shape handed to the proving circuit is
//! independent of the tree's current depth.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use starknet_crypto::poseidon_hash;
use thiserror::Error;

use crate::felt::{felt_hex, felt_hex_seq, Felt};

/// Maximum tree depth; proofs are zero-padded to this many siblings.
/// Shared with the proving circuit and must not change independently of it.
pub const MAX_TREE_DEPTH: usize = 32;

/// Errors raised by tree operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The requested leaf is not in the tree.
    #[error("leaf not found in tree")]
    LeafNotFound,
    /// The tree already holds `2^MAX_TREE_DEPTH` leaves.
    #[error("tree is full ({MAX_TREE_DEPTH} levels exhausted)")]
    DepthExceeded,
    /// The leaf is already present. Leaves are labels and labels are unique,
    /// so a duplicate insert is always a caller bug or duplicate event.
    #[error("leaf already present in tree")]
    DuplicateLeaf,
}

/// Membership proof with a fixed-width sibling array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "felt_hex")]
    pub root: Felt,
    #[serde(with = "felt_hex")]
    pub leaf: Felt,
    /// Packed path bits: bit `i` is 1 when the node is the right child at
    /// the level of the `i`-th carried sibling.
    pub index: u64,
    /// Always exactly [`MAX_TREE_DEPTH`] entries; entries past `depth` are
    /// zero.
    #[serde(with = "felt_hex_seq")]
    pub siblings: Vec<Felt>,
    /// Number of meaningful entries in `siblings`.
    pub depth: usize,
}

/// Append-only lean incremental Merkle tree.
#[derive(Clone, Debug)]
pub struct LeanImt {
    /// `levels[0]` holds the leaves; `levels[d]` the nodes at height `d`.
    levels: Vec<Vec<Felt>>,
    /// Leaf bytes → leaf index, for membership checks and proof lookups.
    positions: HashMap<[u8; 32], u64>,
}

impl LeanImt {
    pub fn new() -> Self {
        Self {
            levels: vec![Vec::new()],
            positions: HashMap::new(),
        }
    }

    /// Number of leaves.
    pub fn len(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Current tree depth (0 for an empty or single-leaf tree).
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Current root; the zero element for an empty tree.
    pub fn root(&self) -> Felt {
        match self.levels.last().and_then(|level| level.first()) {
            Some(node) => *node,
            None => Felt::ZERO,
        }
    }

    pub fn contains(&self, leaf: Felt) -> bool {
        self.positions.contains_key(&leaf.to_bytes_be())
    }

    /// Index of `leaf`, if present.
    pub fn index_of(&self, leaf: Felt) -> Option<u64> {
        self.positions.get(&leaf.to_bytes_be()).copied()
    }

    /// Leaves in insertion order.
    pub fn leaves(&self) -> &[Felt] {
        &self.levels[0]
    }

    /// Append a leaf and return its index.
    pub fn insert(&mut self, leaf: Felt) -> Result<u64, TreeError> {
        if self.contains(leaf) {
            return Err(TreeError::DuplicateLeaf);
        }
        if self.len() == 1u64 << MAX_TREE_DEPTH {
            return Err(TreeError::DepthExceeded);
        }

        let leaf_index = self.levels[0].len();
        let new_depth = ceil_log2(leaf_index + 1);
        while self.levels.len() < new_depth + 1 {
            self.levels.push(Vec::new());
        }

        self.levels[0].push(leaf);
        let mut node = leaf;
        let mut index = leaf_index;
        for level in 0..new_depth {
            if index & 1 == 1 {
                node = poseidon_hash(self.levels[level][index - 1], node);
            }
            index >>= 1;
            set_node(&mut self.levels[level + 1], index, node);
        }

        self.positions.insert(leaf.to_bytes_be(), leaf_index as u64);
        Ok(leaf_index as u64)
    }

    /// Membership proof for the leaf at `leaf_index`.
    pub fn proof(&self, leaf_index: u64) -> Result<MerkleProof, TreeError> {
        let mut index = leaf_index as usize;
        let leaf = *self
            .levels[0]
            .get(index)
            .ok_or(TreeError::LeafNotFound)?;

        let mut siblings = Vec::new();
        let mut path_index = 0u64;
        for level in 0..self.depth() {
            let is_right = index & 1 == 1;
            let sibling_index = if is_right { index - 1 } else { index + 1 };
            if let Some(sibling) = self.levels[level].get(sibling_index) {
                if is_right {
                    path_index |= 1 << siblings.len();
                }
                siblings.push(*sibling);
            }
            index >>= 1;
        }

        let depth = siblings.len();
        siblings.resize(MAX_TREE_DEPTH, Felt::ZERO);
        Ok(MerkleProof {
            root: self.root(),
            leaf,
            index: path_index,
            siblings,
            depth,
        })
    }

    /// Root the tree had when it held exactly `leaf_count` leaves.
    ///
    /// `None` when `leaf_count` exceeds the current size. Recomputed from
    /// the leaf prefix, so this is O(n) per call.
    pub fn root_at(&self, leaf_count: u64) -> Option<Felt> {
        let count = leaf_count as usize;
        if count > self.levels[0].len() {
            return None;
        }
        if count == 0 {
            return Some(Felt::ZERO);
        }
        let mut nodes: Vec<Felt> = self.levels[0][..count].to_vec();
        while nodes.len() > 1 {
            nodes = nodes
                .chunks(2)
                .map(|pair| {
                    if pair.len() == 2 {
                        poseidon_hash(pair[0], pair[1])
                    } else {
                        pair[0]
                    }
                })
                .collect();
        }
        Some(nodes[0])
    }
}

/// Recompute the root from a proof and compare.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    if proof.siblings.len() != MAX_TREE_DEPTH || proof.depth > MAX_TREE_DEPTH {
        return false;
    }
    let mut node = proof.leaf;
    for (i, sibling) in proof.siblings[..proof.depth].iter().enumerate() {
        node = if (proof.index >> i) & 1 == 1 {
            poseidon_hash(*sibling, node)
        } else {
            poseidon_hash(node, *sibling)
        };
    }
    node == proof.root
}

impl Default for LeanImt {
    fn default() -> Self {
        Self::new()
    }
}

fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

fn set_node(level: &mut Vec<Felt>, index: usize, node: Felt) {
    if index == level.len() {
        level.push(node);
    } else {
        level[index] = node;
    }
}
