// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read side of the slice pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::structure::{self, StructureEntry};
use crate::authz;
use crate::context::{nanos, CoreContext};
use crate::crypto::{sha256_hex, FileKeys, Identity, PublicKey};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::{File, Ledger, Node, PublicSliceMeta};
use crate::transport::{BlobClient, SliceTransport};

/// How the file to read is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    Id(String),
    Name {
        owner: PublicKey,
        namespace: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub file: FileRef,
}

impl ReadOptions {
    pub fn by_id(file_id: impl Into<String>) -> Self {
        Self {
            file: FileRef::Id(file_id.into()),
        }
    }

    pub fn by_name(owner: PublicKey, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: FileRef::Name {
                owner,
                namespace: namespace.into(),
                name: name.into(),
            },
        }
    }
}

pub struct SliceReader {
    identity: Arc<Identity>,
    ledger: Ledger,
    client: BlobClient,
    ctx: CoreContext,
}

impl SliceReader {
    pub fn new(
        identity: Arc<Identity>,
        ledger: Ledger,
        transport: Arc<dyn SliceTransport>,
        ctx: CoreContext,
    ) -> Self {
        let client = BlobClient::new(transport, identity.clone(), ctx.clone());
        Self {
            identity,
            ledger,
            client,
            ctx,
        }
    }

    fn resolve(&self, file: &FileRef) -> Result<File> {
        match file {
            FileRef::Id(id) => self.ledger.get_file_by_id(id),
            FileRef::Name {
                owner,
                namespace,
                name,
            } => self.ledger.get_file_by_name(owner, namespace, name),
        }
    }

    /// Overall deadline: one pull timeout per slice wave.
    fn budget(&self, slices: usize) -> std::time::Duration {
        let waves = slices.div_ceil(self.ctx.config.read_concurrency.max(1)).max(1) as u32;
        self.ctx.config.pull_timeout * (waves + 1)
    }

    /// Reassembled plaintext of the file.
    pub async fn read(&self, opts: &ReadOptions) -> Result<Vec<u8>> {
        let file = self.resolve(&opts.file)?;
        let keys = authz::resolve_file_keys(&self.ledger, &self.identity, &file)?;
        let entries = structure::open(&keys.file_key, &file.structure)?;

        let nodes: HashMap<String, Node> = self
            .ledger
            .list_nodes(false)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let fetch = stream::iter(entries.iter())
            .map(|entry| self.fetch_slice(&file, &keys, &nodes, entry))
            .buffered(self.ctx.config.read_concurrency.max(1))
            .try_fold(Vec::with_capacity(file.length as usize), |mut out, chunk| async move {
                out.extend_from_slice(&chunk);
                Ok(out)
            });

        let mut plaintext = tokio::time::timeout(self.budget(entries.len()), fetch)
            .await
            .map_err(|_| Error::network(format!("read of file {} timed out", file.id)))??;
        plaintext.truncate(file.length as usize);

        info!(file_id = %file.id, length = file.length, slices = entries.len(), "file read");
        Ok(plaintext)
    }

    /// Read into `out` and flush it.
    pub async fn read_into<W: AsyncWrite + Unpin>(&self, opts: &ReadOptions, out: &mut W) -> Result<u64> {
        let plaintext = self.read(opts).await?;
        out.write_all(&plaintext)
            .await
            .map_err(|e| Error::internal(format!("writing plaintext failed: {e}")))?;
        out.flush()
            .await
            .map_err(|e| Error::internal(format!("flushing plaintext failed: {e}")))?;
        Ok(plaintext.len() as u64)
    }

    /// Plaintext of one logical slice from the first replica that checks out.
    async fn fetch_slice(
        &self,
        file: &File,
        keys: &FileKeys,
        nodes: &HashMap<String, Node>,
        entry: &StructureEntry,
    ) -> Result<Vec<u8>> {
        let mut replicas: Vec<&PublicSliceMeta> = file
            .replicas(&entry.slice_id)
            .filter(|r| r.index == entry.index)
            .collect();
        let now = self.ctx.now();
        let timeout = nanos(self.ctx.config.heartbeat_timeout);
        replicas.sort_by_key(|r| {
            let offline = nodes.get(&r.node_id).is_none_or(|n| !n.is_online(now, timeout));
            (offline, r.node_id.clone())
        });

        for replica in replicas {
            let Some(node) = nodes.get(&replica.node_id) else {
                debug!(node_id = %replica.node_id, "replica node not registered");
                continue;
            };
            match self.fetch_replica(file, keys, node, replica).await {
                Ok(plain) => return Ok(plain),
                Err(e) => warn!(
                    file_id = %file.id,
                    slice_id = %entry.slice_id,
                    node_id = %node.id,
                    error = %e,
                    "replica unreadable, trying next"
                ),
            }
        }
        Err(Error::new(
            ErrorKind::SliceUnrecoverable,
            format!("slice {} of file {}", entry.slice_id, file.id),
        ))
    }

    async fn fetch_replica(
        &self,
        file: &File,
        keys: &FileKeys,
        node: &Node,
        replica: &PublicSliceMeta,
    ) -> Result<Vec<u8>> {
        let ciphertext = self.client.pull_slice(node, &file.id, &replica.slice_id).await?;
        if ciphertext.len() as u64 != replica.length || sha256_hex(&ciphertext) != replica.cipher_hash {
            return Err(Error::crypto("ciphertext does not match the ledger hash"));
        }
        keys.slice_key(&replica.slice_id, &replica.node_id)?
            .decrypt(&ciphertext)
    }
}
