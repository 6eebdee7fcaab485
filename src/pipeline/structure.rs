// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File structure: the ordered `(slice_id, index)` list that reassembles a
//! file, stored on the ledger sealed under `K_f`.

use serde::{Deserialize, Serialize};

use crate::crypto::FileKey;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureEntry {
    pub slice_id: String,
    pub index: u64,
}

pub fn seal(key: &FileKey, entries: &[StructureEntry]) -> Result<Vec<u8>> {
    key.seal(&serde_json::to_vec(entries)?)
}

/// Decrypt and check that indices run `0..n` in order.
pub fn open(key: &FileKey, sealed: &[u8]) -> Result<Vec<StructureEntry>> {
    let plain = key.open(sealed)?;
    let entries: Vec<StructureEntry> = serde_json::from_slice(&plain)
        .map_err(|e| Error::crypto(format!("malformed file structure: {e}")))?;
    if entries.is_empty() {
        return Err(Error::crypto("file structure is empty"));
    }
    for (position, entry) in entries.iter().enumerate() {
        if entry.index != position as u64 {
            return Err(Error::crypto(format!(
                "structure entry {} is out of order",
                entry.slice_id
            )));
        }
    }
    Ok(entries)
}
