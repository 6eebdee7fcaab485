// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic node rotation for slice placement.
//!
//! Online nodes are ordered by id and the walk for logical slice `i` of
//! file `f` starts at `(u64(SHA-256(f)[..8]) ⊕ i) mod n`, so successive
//! slices spread across the fleet and a caller that knows the file id and
//! node set can recompute the order.

use crate::crypto::sha256;
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::Node;

fn seed(file_id: &str, index: u64) -> u64 {
    let digest = sha256(file_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) ^ index
}

/// Every node in `nodes` not in `exclude`, in rotation order for
/// `(file_id, index)`.
pub fn rotation(file_id: &str, index: u64, nodes: &[Node], exclude: &[&str]) -> Vec<Node> {
    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted.dedup_by(|a, b| a.id == b.id);
    if sorted.is_empty() {
        return Vec::new();
    }

    let start = (seed(file_id, index) % sorted.len() as u64) as usize;
    sorted
        .iter()
        .cycle()
        .skip(start)
        .take(sorted.len())
        .filter(|n| !exclude.contains(&n.id.as_str()))
        .map(|n| (*n).clone())
        .collect()
}

/// Rotation order with at least `count` candidates, or `InsufficientNodes`.
pub fn candidates(
    file_id: &str,
    index: u64,
    nodes: &[Node],
    exclude: &[&str],
    count: usize,
) -> Result<Vec<Node>> {
    let order = rotation(file_id, index, nodes, exclude);
    if order.len() < count {
        return Err(Error::new(
            ErrorKind::InsufficientNodes,
            format!("{} eligible nodes, need {count}", order.len()),
        ));
    }
    Ok(order)
}
