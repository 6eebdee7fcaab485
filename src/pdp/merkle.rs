// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Merkle proofs of possession over fixed-size ciphertext ranges.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::canonical::CanonicalQuery;
use crate::error::{Error, Result};

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

fn leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(data);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Number of leaf ranges in a slice of `len` bytes.
pub fn range_count(len: usize, range_size: usize) -> usize {
    if len == 0 || range_size == 0 {
        return 1;
    }
    len.div_ceil(range_size)
}

fn leaves(data: &[u8], range_size: usize) -> Vec<[u8; 32]> {
    if data.is_empty() || range_size == 0 {
        return vec![leaf_hash(data)];
    }
    data.chunks(range_size).map(leaf_hash).collect()
}

/// Every level of the tree, leaves first. An odd last node is paired with
/// itself.
fn levels(data: &[u8], range_size: usize) -> Vec<Vec<[u8; 32]>> {
    let mut levels = vec![leaves(data, range_size)];
    while levels.last().map(Vec::len).unwrap_or(1) > 1 {
        let prev = &levels[levels.len() - 1];
        let next = prev
            .chunks(2)
            .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        levels.push(next);
    }
    levels
}

/// Root over `data` split into `range_size` byte ranges, hex encoded.
pub fn root(data: &[u8], range_size: usize) -> String {
    let levels = levels(data, range_size);
    let top = levels
        .last()
        .and_then(|l| l.first())
        .copied()
        .unwrap_or_else(|| leaf_hash(&[]));
    hex::encode(top)
}

/// One sibling on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub hash: String,
    /// Sibling sits on the left of the running hash.
    pub left: bool,
}

/// Range bytes plus inclusion path for one challenged range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub slice_id: String,
    pub range_index: u64,
    /// Hex of the range bytes.
    pub data: String,
    pub path: Vec<PathNode>,
}

impl CanonicalQuery for MerkleProof {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let path = self
            .path
            .iter()
            .map(|n| format!("{}:{}", if n.left { "l" } else { "r" }, n.hash))
            .collect::<Vec<_>>()
            .join(",");
        vec![
            ("slice_id", self.slice_id.clone()),
            ("range_index", self.range_index.to_string()),
            ("data", self.data.clone()),
            ("path", path),
        ]
    }
}

/// Build the proof for range `range_index` of `data`.
pub fn prove(slice_id: &str, data: &[u8], range_size: usize, range_index: u64) -> Result<MerkleProof> {
    let idx = usize::try_from(range_index).map_err(|_| Error::bad_param("range index too large"))?;
    let count = range_count(data.len(), range_size);
    if idx >= count {
        return Err(Error::bad_param(format!(
            "range {range_index} out of bounds ({count} ranges)"
        )));
    }

    let levels = levels(data, range_size);
    let mut path = Vec::new();
    let mut pos = idx;
    for level in &levels[..levels.len() - 1] {
        let sibling_pos = pos ^ 1;
        let sibling = level.get(sibling_pos).unwrap_or(&level[pos]);
        path.push(PathNode {
            hash: hex::encode(sibling),
            left: sibling_pos < pos,
        });
        pos /= 2;
    }

    let range = if data.is_empty() || range_size == 0 {
        data
    } else {
        let start = idx * range_size;
        &data[start..(start + range_size).min(data.len())]
    };

    Ok(MerkleProof {
        slice_id: slice_id.to_string(),
        range_index,
        data: hex::encode(range),
        path,
    })
}

/// Recompute the root from a proof and compare with `expected_root`.
pub fn verify(proof: &MerkleProof, expected_root: &str) -> Result<bool> {
    let data = hex::decode(&proof.data).map_err(|e| Error::bad_param(format!("invalid range hex: {e}")))?;
    let mut running = leaf_hash(&data);
    let mut pos = proof.range_index;
    for node in &proof.path {
        let sibling: [u8; 32] = hex::decode(&node.hash)
            .map_err(|e| Error::bad_param(format!("invalid path hex: {e}")))?
            .try_into()
            .map_err(|_| Error::bad_param("path hash must be 32 bytes"))?;
        // The side is implied by the position; a mismatch means a forged path.
        if node.left != (pos % 2 == 1) {
            return Ok(false);
        }
        running = if node.left {
            node_hash(&sibling, &running)
        } else {
            node_hash(&running, &sibling)
        };
        pos /= 2;
    }
    Ok(hex::encode(running) == expected_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn every_range_proves_against_root() {
        let bytes = data(1000);
        let root = root(&bytes, 64);
        for i in 0..range_count(bytes.len(), 64) as u64 {
            let proof = prove("s", &bytes, 64, i).unwrap();
            assert!(verify(&proof, &root).unwrap(), "range {i}");
        }
    }

    #[test]
    fn single_range_slice_has_empty_path() {
        let bytes = data(10);
        let proof = prove("s", &bytes, 64, 0).unwrap();
        assert!(proof.path.is_empty());
        assert!(verify(&proof, &root(&bytes, 64)).unwrap());
    }

    #[test]
    fn tampered_range_is_rejected() {
        let bytes = data(512);
        let root = root(&bytes, 64);
        let mut proof = prove("s", &bytes, 64, 3).unwrap();
        let mut raw = hex::decode(&proof.data).unwrap();
        raw[0] ^= 1;
        proof.data = hex::encode(raw);
        assert!(!verify(&proof, &root).unwrap());
    }

    #[test]
    fn proof_for_wrong_index_is_rejected() {
        let bytes = data(512);
        let root = root(&bytes, 64);
        let mut proof = prove("s", &bytes, 64, 2).unwrap();
        proof.range_index = 5;
        assert!(!verify(&proof, &root).unwrap());
    }

    #[test]
    fn out_of_bounds_range_errors() {
        assert!(prove("s", &data(100), 64, 2).is_err());
    }
}
