// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key & identity primitives.
//!
//! - [`identity`]: P-256 ECDSA keys and signatures
//! - [`canonical`]: canonical signing input for every signed payload
//! - [`ecies`]: envelopes for released authorization keys
//! - [`keys`]: file and per-replica AES-256-GCM keys

pub mod canonical;
pub mod ecies;
pub mod identity;
pub mod keys;

pub use canonical::CanonicalQuery;
pub use identity::{sha256, sha256_hex, Identity, PublicKey, Signature};
pub use keys::{FileKey, FileKeys, SliceKey};
