// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Write side of the slice pipeline.
//!
//! Slices are placed through a sliding window of `write_concurrency`
//! outstanding slices. Each replica is pushed with retries to its rotation
//! candidate; on exhaustion the next candidate is tried. The file record is
//! committed only after every replica and its authenticators are stored,
//! so a failed or dropped write leaves no ledger record behind (pushed
//! slices become orphans and are evicted by the nodes).

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::placement;
use super::structure::{self, StructureEntry};
use super::FileLocks;
use crate::context::CoreContext;
use crate::crypto::{sha256_hex, FileKey, Identity};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::{index, File, Ledger, Node, PublicSliceMeta, Signed, UpdateExpireTime};
use crate::pdp::pairing::PairingKeys;
use crate::pdp::{merkle, sigmas_of, SigmaBundle};
use crate::transport::{BlobClient, SliceTransport};

/// Parsed write request.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub namespace: String,
    pub name: String,
    /// Unix nanoseconds.
    pub expire_time: i64,
    pub description: String,
    pub ext: String,
}

/// Per-write state shared by the slice tasks.
struct WriteJob {
    file_id: String,
    file_key: FileKey,
    pdp: PairingKeys,
    nodes: Vec<Node>,
    replica: usize,
}

pub struct SliceWriter {
    owner: Arc<Identity>,
    ledger: Ledger,
    client: BlobClient,
    ctx: CoreContext,
    locks: FileLocks,
}

impl SliceWriter {
    pub fn new(
        owner: Arc<Identity>,
        ledger: Ledger,
        transport: Arc<dyn SliceTransport>,
        ctx: CoreContext,
    ) -> Self {
        let client = BlobClient::new(transport, owner.clone(), ctx.clone());
        Self {
            owner,
            ledger,
            client,
            ctx,
            locks: FileLocks::new(),
        }
    }

    /// Share commit locks with other owner-side components.
    pub fn with_locks(mut self, locks: FileLocks) -> Self {
        self.locks = locks;
        self
    }

    fn validate(&self, opts: &WriteOptions, len: u64) -> Result<()> {
        if opts.namespace.is_empty() || opts.name.is_empty() {
            return Err(Error::bad_param("namespace and name are required"));
        }
        index::check_part("namespace", &opts.namespace)?;
        index::check_part("name", &opts.name)?;
        if opts.expire_time <= self.ctx.now() {
            return Err(Error::bad_param("expire_time must be in the future"));
        }
        if len > self.ctx.config.max_file_size {
            return Err(Error::bad_param(format!(
                "file of {len} bytes exceeds the {} byte limit",
                self.ctx.config.max_file_size
            )));
        }
        if self.ctx.config.slice_size == 0 {
            return Err(Error::internal("slice_size must be positive"));
        }
        Ok(())
    }

    /// Buffer `reader` (up to `max_file_size`) and write it.
    pub async fn write_from<R: AsyncRead + Unpin>(&self, opts: &WriteOptions, reader: R) -> Result<String> {
        let limit = self.ctx.config.max_file_size;
        let mut data = Vec::new();
        reader
            .take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(|e| Error::bad_param(format!("reading plaintext failed: {e}")))?;
        self.write(opts, &data).await
    }

    /// Store `plaintext` and commit its file record; returns the file id.
    pub async fn write(&self, opts: &WriteOptions, plaintext: &[u8]) -> Result<String> {
        self.validate(opts, plaintext.len() as u64)?;
        let owner_key = self.owner.public_key();

        let ns = self.ledger.get_ns_by_name(&owner_key, &opts.namespace)?;
        match self.ledger.get_file_by_name(&owner_key, &opts.namespace, &opts.name) {
            Ok(_) => {
                return Err(Error::already_exists(format!(
                    "file {}/{}",
                    opts.namespace, opts.name
                )))
            }
            Err(e) if e.is(ErrorKind::NotFound) => {}
            Err(e) => return Err(e),
        }

        let replica = ns.replica.max(1) as usize;
        let nodes = self.ledger.list_nodes(true)?;
        if nodes.len() < replica {
            return Err(Error::new(
                ErrorKind::InsufficientNodes,
                format!("{} online nodes, namespace needs {replica}", nodes.len()),
            ));
        }

        let file_id = Uuid::new_v4().to_string();
        let job = WriteJob {
            file_key: FileKey::derive(&self.owner, &file_id)?,
            pdp: PairingKeys::derive(&self.owner, &self.ctx.curve)?,
            file_id,
            nodes,
            replica,
        };

        let slice_size = self.ctx.config.slice_size;
        let mut chunks: Vec<Vec<u8>> = plaintext.chunks(slice_size).map(<[u8]>::to_vec).collect();
        if chunks.is_empty() {
            chunks.push(Vec::new());
        }
        let entries: Vec<StructureEntry> = (0..chunks.len() as u64)
            .map(|index| StructureEntry {
                slice_id: Uuid::new_v4().to_string(),
                index,
            })
            .collect();

        let placed: Vec<Vec<PublicSliceMeta>> = stream::iter(entries.iter().zip(chunks))
            .map(|(entry, mut chunk)| {
                chunk.resize(slice_size, 0);
                let job = &job;
                async move { self.place_slice(job, entry, chunk).await }
            })
            .buffer_unordered(self.ctx.config.write_concurrency.max(1))
            .try_collect()
            .await?;

        let mut slices: Vec<PublicSliceMeta> = placed.into_iter().flatten().collect();
        slices.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.node_id.cmp(&b.node_id)));

        let now = self.ctx.now();
        let file = File {
            id: job.file_id.clone(),
            owner: owner_key,
            namespace: opts.namespace.clone(),
            name: opts.name.clone(),
            length: plaintext.len() as u64,
            publish_time: now,
            expire_time: opts.expire_time,
            description: opts.description.clone(),
            ext: opts.ext.clone(),
            structure: structure::seal(&job.file_key, &entries)?,
            slices,
        };

        let _guard = self.locks.lock(&file.id).await;
        self.ledger.publish_file(&Signed::new(&self.owner, file)?)?;

        info!(
            file_id = %job.file_id,
            namespace = %opts.namespace,
            slices = entries.len(),
            replica,
            "file written"
        );
        Ok(job.file_id)
    }

    /// Place every replica of one logical slice.
    async fn place_slice(
        &self,
        job: &WriteJob,
        entry: &StructureEntry,
        chunk: Vec<u8>,
    ) -> Result<Vec<PublicSliceMeta>> {
        let order = placement::candidates(&job.file_id, entry.index, &job.nodes, &[], job.replica)?;
        let mut placed = Vec::with_capacity(job.replica);
        for node in &order {
            if placed.len() == job.replica {
                break;
            }
            match self.store_replica(job, node, entry, &chunk).await {
                Ok(meta) => placed.push(meta),
                Err(e) => warn!(
                    file_id = %job.file_id,
                    slice_id = %entry.slice_id,
                    node_id = %node.id,
                    error = %e,
                    "replica push failed, trying next candidate"
                ),
            }
        }
        if placed.len() < job.replica {
            return Err(Error::new(
                ErrorKind::PushFailed,
                format!("slice {}: {} of {} replicas stored", entry.slice_id, placed.len(), job.replica),
            ));
        }
        Ok(placed)
    }

    async fn store_replica(
        &self,
        job: &WriteJob,
        node: &Node,
        entry: &StructureEntry,
        chunk: &[u8],
    ) -> Result<PublicSliceMeta> {
        let ciphertext = job
            .file_key
            .slice_key(&entry.slice_id, &node.id)?
            .encrypt(chunk)?;
        self.client
            .push_slice(node, &job.file_id, &entry.slice_id, &ciphertext)
            .await?;

        let bundle = SigmaBundle::compute(&job.pdp, &self.ctx.curve, 0, entry.index, &ciphertext)?;
        self.client
            .push_sigmas(node, &job.file_id, &entry.slice_id, &bundle.to_bytes()?)
            .await?;

        debug!(file_id = %job.file_id, slice_id = %entry.slice_id, node_id = %node.id, "replica stored");
        Ok(PublicSliceMeta {
            slice_id: entry.slice_id.clone(),
            node_id: node.id.clone(),
            cipher_hash: sha256_hex(&ciphertext),
            length: ciphertext.len() as u64,
            index: entry.index,
            sigmas_id: Some(sigmas_of(&entry.slice_id)),
            pdp_index: Some(entry.index),
            merkle_root: Some(merkle::root(&ciphertext, self.ctx.config.merkle_range_size)),
        })
    }

    /// `UpdateFileExpireTime` for one of this owner's files.
    pub async fn extend_expire_time(&self, file_id: &str, expire_time: i64) -> Result<File> {
        let _guard = self.locks.lock(file_id).await;
        let payload = UpdateExpireTime {
            file_id: file_id.to_string(),
            expire_time,
            timestamp: self.ctx.now(),
        };
        self.ledger
            .update_file_expire_time(&Signed::new(&self.owner, payload)?)
    }
}
