// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger index layer and typed ledger operations.
//!
//! ## Layout
//!
//! ```text
//! kv            primitives: get, range, put-if-absent, atomic batches
//! redb_kv       redb-backed store for the node daemon
//! index         composite key encoding
//! models        records and signed payloads
//! files         PublishFile, GetFileBy*, ListFiles, UpdateFile*, migration records
//! namespaces    AddFileNs, UpdateNsReplica, ListFileNs, GetNsByName
//! nodes         AddNode, NodeOnline/Offline, Heartbeat, GetNode, ListNodes
//! challenges    ChallengeRequest/Answer/Fail, GetChallenge*, ListChallengeRequests
//! auth          FileAuthApplication state machine
//! ```
//!
//! Every mutating call takes a [`models::Signed`] payload and checks the
//! signature against the party allowed to act before touching the store.

pub mod auth;
pub mod challenges;
pub mod files;
pub mod index;
pub mod kv;
pub mod models;
pub mod namespaces;
pub mod nodes;
pub mod redb_kv;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::{nanos, CoreContext};
use crate::error::{Error, ErrorKind, Result};
use kv::KvStore;

pub use kv::{MemoryKv, WriteBatch};
pub use models::*;
pub use redb_kv::RedbKv;

/// Typed ledger over a [`KvStore`].
#[derive(Clone)]
pub struct Ledger {
    kv: Arc<dyn KvStore>,
    ctx: CoreContext,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(kv: Arc<dyn KvStore>, ctx: CoreContext) -> Self {
        Self { kv, ctx }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub(crate) fn now(&self) -> i64 {
        self.ctx.now()
    }

    pub(crate) fn heartbeat_timeout(&self) -> i64 {
        nanos(self.ctx.config.heartbeat_timeout)
    }

    /// Liveness probe used by `/health`.
    pub fn ping(&self) -> Result<()> {
        self.kv.get(&index::compose(&["ping"]))?;
        Ok(())
    }

    // ========== Record helpers ==========

    pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::new(ErrorKind::ReadLedger, format!("corrupt ledger record: {e}")))
    }

    /// Record plus its raw bytes, for optimistic updates.
    pub(crate) fn load_raw<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<(T, Vec<u8>)>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some((Self::decode(&bytes)?, bytes))),
            None => Ok(None),
        }
    }

    pub(crate) fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        Ok(self.load_raw(key)?.map(|(v, _)| v))
    }

    pub(crate) fn require<T: DeserializeOwned>(&self, key: &[u8], what: &str) -> Result<(T, Vec<u8>)> {
        self.load_raw(key)?
            .ok_or_else(|| Error::not_found(what.to_string()))
    }

    /// Keys under `prefix`, in order.
    pub(crate) fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.kv.scan_prefix(prefix)?)
    }

    /// Decoded values under `prefix`, in key order.
    pub(crate) fn scan_values<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.scan(prefix)?
            .iter()
            .map(|(_, v)| Self::decode(v))
            .collect()
    }

    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        Ok(self.kv.commit(batch)?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;
    use crate::config::CoreConfig;
    use crate::context::ManualClock;
    use crate::crypto::Identity;

    pub const T0: i64 = 1_700_000_000_000_000_000;

    pub fn ledger() -> (Ledger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = CoreContext::with_clock(CoreConfig::default(), clock.clone());
        (Ledger::new(Arc::new(MemoryKv::new()), ctx), clock)
    }

    pub fn add_ns(ledger: &Ledger, owner: &Identity, name: &str, replica: u32) -> Namespace {
        let payload = AddNamespace {
            owner: owner.public_key(),
            name: name.into(),
            replica,
            description: String::new(),
            timestamp: ledger.now(),
        };
        ledger
            .add_file_ns(&Signed::new(owner, payload).unwrap())
            .unwrap()
    }

    pub fn add_node(ledger: &Ledger, node: &Identity) -> Node {
        let payload = NodeRegistration {
            id: node.node_id(),
            name: "node".into(),
            address: format!("local://{}", &node.node_id()[..8]),
            timestamp: ledger.now(),
        };
        ledger.add_node(&Signed::new(node, payload).unwrap()).unwrap()
    }

    pub fn slice(slice_id: &str, node_id: &str, index: u64) -> PublicSliceMeta {
        PublicSliceMeta {
            slice_id: slice_id.into(),
            node_id: node_id.into(),
            cipher_hash: "aa".repeat(32),
            length: 80,
            index,
            sigmas_id: None,
            pdp_index: Some(index),
            merkle_root: None,
        }
    }

    pub fn file(owner: &Identity, id: &str, name: &str, slices: Vec<PublicSliceMeta>, now: i64) -> File {
        File {
            id: id.into(),
            owner: owner.public_key(),
            namespace: "n".into(),
            name: name.into(),
            length: 12,
            publish_time: now,
            expire_time: now + 3_600_000_000_000,
            description: String::new(),
            ext: String::new(),
            structure: vec![0u8; 4],
            slices,
        }
    }
}
