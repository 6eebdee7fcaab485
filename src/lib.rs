// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! dstore-core - Dispersed Storage Core
//!
//! Files are split into fixed-size slices, encrypted per replica and
//! spread over untrusted storage nodes. Owners audit the nodes with
//! provable-data-possession challenges, lost replicas are migrated to
//! healthy nodes, and other identities read a file only through an
//! approved authorization.
//!
//! ## Modules
//!
//! - `ledger` - Authoritative records over a key/value store (redb)
//! - `pipeline` - Slice writer and reader
//! - `pdp` - Pairing and Merkle proofs, challenge scheduler
//! - `migration` - Replica restoration
//! - `authz` - File authorization applications and key envelopes
//! - `node` - Storage-node side: blob service, maintainer, prover, clearer
//! - `api` - Storage-node HTTP API (Axum)
//! - `transport` - Signed blob transfer (HTTP and in-process)
//! - `crypto` - Identities, signatures, ECIES and key derivation
//! - `storage` - Node-local object store

pub mod api;
pub mod authz;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod node;
pub mod pdp;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;
