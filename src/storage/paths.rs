// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the node-local object store layout.

use std::path::{Path, PathBuf};

use super::BlobKind;
use crate::pdp::sigmas_of;

/// Base directory for node-local storage.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities for the object store.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all node data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every object of one kind.
    pub fn kind_dir(&self, kind: BlobKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Path of one object.
    pub fn object(&self, kind: BlobKind, key: &str) -> PathBuf {
        self.kind_dir(kind).join(key)
    }

    // ========== Slice Paths ==========

    /// Ciphertext of a slice.
    pub fn slice(&self, slice_id: &str) -> PathBuf {
        self.object(BlobKind::Slice, slice_id)
    }

    /// Authenticator bundle stored next to a slice.
    pub fn sigmas(&self, slice_id: &str) -> PathBuf {
        self.object(BlobKind::Sigmas, &sigmas_of(slice_id))
    }

    /// Node-side bookkeeping for a slice (writer, file, push time).
    pub fn slice_meta(&self, slice_id: &str) -> PathBuf {
        self.object(BlobKind::SliceMeta, slice_id)
    }

    // ========== Cursor Paths ==========

    /// Eviction watermark for a node key.
    pub fn clear_cursor(&self, node_id: &str) -> PathBuf {
        self.object(BlobKind::Cursor, node_id)
    }
}
