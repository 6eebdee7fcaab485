// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Blob Transport
//!
//! Client side of the storage-node blob API:
//!
//! ```text
//! POST /v1/slice/push    ?slice_id&file_id&length&timestamp&pubkey&signature   body = ciphertext
//! GET  /v1/slice/pull    ?slice_id&file_id&timestamp&pubkey&signature
//! POST /v1/sigmas/push   same shape, body = authenticator bundle
//! GET  /v1/sigmas/pull   same shape
//! ```
//!
//! Push requests sign `SHA-256("slice_id,file_id,length,timestamp")`, pulls
//! sign `SHA-256("slice_id,file_id,timestamp")`.
//!
//! [`SliceTransport`] is the seam between the core and the wire:
//! [`http::HttpTransport`] talks to real nodes, [`local::LocalTransport`]
//! calls in-process node services.

pub mod http;
pub mod local;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::context::CoreContext;
use crate::crypto::{Identity, PublicKey, Signature};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::Node;

// =============================================================================
// Signed queries
// =============================================================================

/// Query of `/v1/slice/push` and `/v1/sigmas/push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PushQuery {
    pub slice_id: String,
    pub file_id: String,
    /// Body length in bytes.
    pub length: u64,
    /// Unix nanoseconds.
    pub timestamp: i64,
    /// Hex public key of the writer.
    pub pubkey: String,
    /// Hex `(r‖s)` signature.
    pub signature: String,
}

impl PushQuery {
    pub fn message(slice_id: &str, file_id: &str, length: u64, timestamp: i64) -> String {
        format!("{slice_id},{file_id},{length},{timestamp}")
    }

    pub fn sign(identity: &Identity, slice_id: &str, file_id: &str, length: u64, timestamp: i64) -> Result<Self> {
        let signature = identity.sign_message(Self::message(slice_id, file_id, length, timestamp).as_bytes())?;
        Ok(Self {
            slice_id: slice_id.to_string(),
            file_id: file_id.to_string(),
            length,
            timestamp,
            pubkey: identity.public_key().to_hex(),
            signature: signature.to_hex(),
        })
    }

    /// Check the signature and return the signer.
    pub fn verify(&self) -> Result<PublicKey> {
        let message = Self::message(&self.slice_id, &self.file_id, self.length, self.timestamp);
        verify_query(&self.pubkey, &self.signature, &message)
    }
}

/// Query of `/v1/slice/pull` and `/v1/sigmas/pull`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PullQuery {
    pub slice_id: String,
    pub file_id: String,
    pub timestamp: i64,
    pub pubkey: String,
    pub signature: String,
}

impl PullQuery {
    pub fn message(slice_id: &str, file_id: &str, timestamp: i64) -> String {
        format!("{slice_id},{file_id},{timestamp}")
    }

    pub fn sign(identity: &Identity, slice_id: &str, file_id: &str, timestamp: i64) -> Result<Self> {
        let signature = identity.sign_message(Self::message(slice_id, file_id, timestamp).as_bytes())?;
        Ok(Self {
            slice_id: slice_id.to_string(),
            file_id: file_id.to_string(),
            timestamp,
            pubkey: identity.public_key().to_hex(),
            signature: signature.to_hex(),
        })
    }

    pub fn verify(&self) -> Result<PublicKey> {
        let message = Self::message(&self.slice_id, &self.file_id, self.timestamp);
        verify_query(&self.pubkey, &self.signature, &message)
    }
}

fn verify_query(pubkey: &str, signature: &str, message: &str) -> Result<PublicKey> {
    let key = PublicKey::from_hex(pubkey).map_err(|e| Error::bad_signature(e.message))?;
    let signature = Signature::from_hex(signature).map_err(|e| Error::bad_signature(e.message))?;
    key.verify_message(message.as_bytes(), &signature)
        .map_err(|_| Error::bad_signature("request signature does not verify"))?;
    Ok(key)
}

// =============================================================================
// Transport seam
// =============================================================================

/// Wire access to storage nodes.
#[async_trait]
pub trait SliceTransport: Send + Sync {
    async fn push_slice(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()>;

    async fn pull_slice(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>>;

    async fn push_sigmas(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()>;

    async fn pull_sigmas(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>>;
}

/// Run `op` with a per-attempt timeout, retrying `Network` failures up to
/// `retries` more times with exponential backoff.
pub async fn with_retry<T, F, Fut>(
    what: &str,
    retries: u32,
    backoff: Duration,
    timeout: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = backoff;
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(Error::network(format!("{what} timed out after {timeout:?}"))),
        };
        match result {
            Err(e) if e.is(ErrorKind::Network) && attempt < retries => {
                attempt += 1;
                tracing::debug!(what, attempt, error = %e, "retrying after network failure");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            other => return other,
        }
    }
}

/// Signs blob requests as one identity and applies the configured
/// timeouts and retry policy.
#[derive(Clone)]
pub struct BlobClient {
    transport: Arc<dyn SliceTransport>,
    identity: Arc<Identity>,
    ctx: CoreContext,
}

impl std::fmt::Debug for BlobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobClient")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl BlobClient {
    pub fn new(transport: Arc<dyn SliceTransport>, identity: Arc<Identity>, ctx: CoreContext) -> Self {
        Self {
            transport,
            identity,
            ctx,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Same transport and policy, signing as `identity`.
    pub fn as_identity(&self, identity: Arc<Identity>) -> Self {
        Self {
            transport: self.transport.clone(),
            identity,
            ctx: self.ctx.clone(),
        }
    }

    /// Push ciphertext, retrying transient failures.
    pub async fn push_slice(&self, node: &Node, file_id: &str, slice_id: &str, data: &[u8]) -> Result<()> {
        let config = &self.ctx.config;
        with_retry("slice push", config.push_retries, config.push_backoff, config.push_timeout, || async {
            let query = PushQuery::sign(&self.identity, slice_id, file_id, data.len() as u64, self.ctx.now())?;
            self.transport.push_slice(node, &query, data.to_vec()).await
        })
        .await
    }

    pub async fn push_sigmas(&self, node: &Node, file_id: &str, slice_id: &str, data: &[u8]) -> Result<()> {
        let config = &self.ctx.config;
        with_retry("sigmas push", config.push_retries, config.push_backoff, config.push_timeout, || async {
            let query = PushQuery::sign(&self.identity, slice_id, file_id, data.len() as u64, self.ctx.now())?;
            self.transport.push_sigmas(node, &query, data.to_vec()).await
        })
        .await
    }

    /// Single attempt bounded by `pull_timeout`; readers fall through to
    /// the next replica instead of retrying.
    pub async fn pull_slice(&self, node: &Node, file_id: &str, slice_id: &str) -> Result<Vec<u8>> {
        let config = &self.ctx.config;
        with_retry("slice pull", 0, config.push_backoff, config.pull_timeout, || async {
            let query = PullQuery::sign(&self.identity, slice_id, file_id, self.ctx.now())?;
            self.transport.pull_slice(node, &query).await
        })
        .await
    }

    pub async fn pull_sigmas(&self, node: &Node, file_id: &str, slice_id: &str) -> Result<Vec<u8>> {
        let config = &self.ctx.config;
        with_retry("sigmas pull", 0, config.push_backoff, config.pull_timeout, || async {
            let query = PullQuery::sign(&self.identity, slice_id, file_id, self.ctx.now())?;
            self.transport.pull_sigmas(node, &query).await
        })
        .await
    }
}
