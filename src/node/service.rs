// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request checks and local storage for one storage node.
//!
//! Both the axum handlers and [`crate::transport::local::LocalTransport`]
//! go through [`NodeService`], so HTTP and in-process calls are held to the
//! same rules.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::{nanos, CoreContext};
use crate::crypto::{sha256_hex, PublicKey};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::Ledger;
use crate::pdp::sigmas_of;
use crate::storage::{BlobKind, BlobStore, StorageError};
use crate::transport::{PullQuery, PushQuery};

/// Node-side bookkeeping written next to each stored slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSliceMeta {
    pub slice_id: String,
    pub file_id: String,
    /// Key that pushed the slice; only it may overwrite.
    pub writer: PublicKey,
    pub length: u64,
    pub cipher_hash: String,
    pub stored_at: i64,
}

/// `/health` report.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NodeHealth {
    /// "ok" or "degraded".
    pub status: String,
    pub node_id: String,
    pub store: String,
    pub ledger: String,
    /// Slices currently held.
    pub slices: usize,
}

impl NodeHealth {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Clone)]
pub struct NodeService {
    node_id: String,
    ledger: Ledger,
    store: Arc<dyn BlobStore>,
    ctx: CoreContext,
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl NodeService {
    pub fn new(node_id: String, ledger: Ledger, store: Arc<dyn BlobStore>, ctx: CoreContext) -> Self {
        Self {
            node_id,
            ledger,
            store,
            ctx,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    fn check_fresh(&self, timestamp: i64) -> Result<()> {
        let skew = nanos(self.ctx.config.request_skew);
        if (self.ctx.now() - timestamp).abs() > skew {
            return Err(Error::bad_param("request timestamp outside the accepted window"));
        }
        Ok(())
    }

    /// The file owner, when the file is already on the ledger.
    fn committed_owner(&self, file_id: &str) -> Result<Option<PublicKey>> {
        match self.ledger.get_file_by_id(file_id) {
            Ok(file) => Ok(Some(file.owner)),
            Err(e) if e.is(ErrorKind::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn slice_meta(&self, slice_id: &str) -> Result<Option<StoredSliceMeta>> {
        match self.store.get(BlobKind::SliceMeta, slice_id) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========== Push ==========

    /// `POST /v1/slice/push`.
    pub fn push_slice(&self, query: &PushQuery, body: &[u8]) -> Result<()> {
        let writer = query.verify()?;
        self.check_fresh(query.timestamp)?;
        if query.length != body.len() as u64 {
            return Err(Error::bad_param(format!(
                "length {} does not match body of {} bytes",
                query.length,
                body.len()
            )));
        }
        if let Some(owner) = self.committed_owner(&query.file_id)? {
            if owner != writer {
                return Err(Error::unauthorized("only the file owner may push its slices"));
            }
        }

        let cipher_hash = sha256_hex(body);
        if let Some(existing) = self.slice_meta(&query.slice_id)? {
            if existing.writer != writer {
                return Err(Error::unauthorized(format!(
                    "slice {} belongs to another writer",
                    query.slice_id
                )));
            }
            if existing.file_id != query.file_id {
                return Err(Error::bad_param(format!(
                    "slice {} is stored for file {}",
                    query.slice_id, existing.file_id
                )));
            }
            if existing.cipher_hash == cipher_hash && self.store.exists(BlobKind::Slice, &query.slice_id)? {
                tracing::debug!(slice_id = %query.slice_id, "identical push ignored");
                return Ok(());
            }
        }

        let meta = StoredSliceMeta {
            slice_id: query.slice_id.clone(),
            file_id: query.file_id.clone(),
            writer,
            length: query.length,
            cipher_hash,
            stored_at: self.ctx.now(),
        };
        self.store.put(BlobKind::Slice, &query.slice_id, body)?;
        self.store
            .put(BlobKind::SliceMeta, &query.slice_id, &serde_json::to_vec(&meta)?)?;
        tracing::info!(
            node_id = %self.node_id,
            slice_id = %query.slice_id,
            file_id = %query.file_id,
            length = query.length,
            "slice stored"
        );
        Ok(())
    }

    /// `POST /v1/sigmas/push`: only the slice's writer may attach sigmas.
    pub fn push_sigmas(&self, query: &PushQuery, body: &[u8]) -> Result<()> {
        let writer = query.verify()?;
        self.check_fresh(query.timestamp)?;
        if query.length != body.len() as u64 {
            return Err(Error::bad_param("length does not match body"));
        }
        let meta = self
            .slice_meta(&query.slice_id)?
            .ok_or_else(|| Error::not_found(format!("slice {}", query.slice_id)))?;
        if meta.writer != writer || meta.file_id != query.file_id {
            return Err(Error::unauthorized(format!(
                "sigmas for slice {} must come from its writer",
                query.slice_id
            )));
        }
        self.store
            .put(BlobKind::Sigmas, &sigmas_of(&query.slice_id), body)?;
        tracing::debug!(node_id = %self.node_id, slice_id = %query.slice_id, "sigmas stored");
        Ok(())
    }

    // ========== Pull ==========

    /// Readers: the writer, the file owner, or an applier holding an
    /// approved, unexpired authorization.
    fn authorize_pull(&self, query: &PullQuery) -> Result<StoredSliceMeta> {
        let reader = query.verify()?;
        self.check_fresh(query.timestamp)?;
        let meta = self
            .slice_meta(&query.slice_id)?
            .ok_or_else(|| Error::not_found(format!("slice {}", query.slice_id)))?;
        if meta.file_id != query.file_id {
            return Err(Error::not_found(format!(
                "slice {} of file {}",
                query.slice_id, query.file_id
            )));
        }
        if reader == meta.writer {
            return Ok(meta);
        }
        if let Some(owner) = self.committed_owner(&meta.file_id)? {
            if owner == reader || self.ledger.effective_application(&reader, &meta.file_id)?.is_some() {
                return Ok(meta);
            }
        }
        Err(Error::unauthorized(format!(
            "no read permission on file {}",
            meta.file_id
        )))
    }

    /// `GET /v1/slice/pull`.
    pub fn pull_slice(&self, query: &PullQuery) -> Result<Vec<u8>> {
        self.authorize_pull(query)?;
        self.read_slice(&query.slice_id)
    }

    /// `GET /v1/sigmas/pull`.
    pub fn pull_sigmas(&self, query: &PullQuery) -> Result<Vec<u8>> {
        self.authorize_pull(query)?;
        self.read_sigmas(&query.slice_id)
    }

    // ========== Local access ==========

    pub fn read_slice(&self, slice_id: &str) -> Result<Vec<u8>> {
        Ok(self.store.get(BlobKind::Slice, slice_id)?)
    }

    pub fn read_sigmas(&self, slice_id: &str) -> Result<Vec<u8>> {
        Ok(self.store.get(BlobKind::Sigmas, &sigmas_of(slice_id))?)
    }

    pub fn list_slices(&self) -> Result<Vec<String>> {
        Ok(self.store.list(BlobKind::Slice)?)
    }

    /// Remove a slice with its sigmas and bookkeeping. Missing keys are fine.
    pub fn delete_slice(&self, slice_id: &str) -> Result<()> {
        self.store.delete(BlobKind::Slice, slice_id)?;
        self.store.delete(BlobKind::Sigmas, &sigmas_of(slice_id))?;
        self.store.delete(BlobKind::SliceMeta, slice_id)?;
        Ok(())
    }

    pub fn health(&self) -> NodeHealth {
        let store_ok = self.store.health_check().is_ok();
        let ledger_ok = self.ledger.ping().is_ok();
        let slices = self.list_slices().map(|s| s.len()).unwrap_or(0);
        let label = |ok: bool| if ok { "ok" } else { "unavailable" }.to_string();
        NodeHealth {
            status: if store_ok && ledger_ok { "ok" } else { "degraded" }.to_string(),
            node_id: self.node_id.clone(),
            store: label(store_ok),
            ledger: label(ledger_ok),
            slices,
        }
    }
}
