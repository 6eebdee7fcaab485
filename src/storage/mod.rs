// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Node-Local Object Store
//!
//! Storage nodes keep only opaque ciphertext. Everything they hold is an
//! object addressed by `(kind, key)`:
//!
//! ## Storage Layout
//!
//! ```text
//! /data/
//!   slices/{slice_id}              # replica ciphertext
//!   sigmas/{slice_id}.sigmas       # PDP authenticator bundle
//!   slice_meta/{slice_id}          # writer key, file id, push time (JSON)
//!   cursors/{node_id}              # eviction watermark
//! ```
//!
//! ## Important Notes
//!
//! - Single writer per slice key; a replayed identical push is a no-op
//! - Deletion is idempotent and removes the sigmas side object in lockstep
//! - Keys are validated so no object can escape its kind directory

pub mod blob_store;
pub mod paths;

pub use blob_store::{
    BlobKind, BlobStore, FsBlobStore, MemoryBlobStore, StorageError, StorageResult,
};
pub use paths::StoragePaths;
