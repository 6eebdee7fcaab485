// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Slice Clearer
//!
//! Evicts slices this node no longer has to keep:
//! - files past `expire_time + file_retain_period`, found through the
//!   ledger's per-node expiry index starting at the stored
//!   `clear_cursor(node_id)` watermark
//! - replicas whose custody was moved to another node, once older than
//!   `orphan_grace`
//! - orphans: slices pushed for a file that was never committed, once
//!   older than `orphan_grace`

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::NodeService;
use crate::context::{nanos, CoreContext};
use crate::error::{Error, ErrorKind, Result};
use crate::storage::{BlobKind, StorageError};

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub expired: usize,
    pub reassigned: usize,
    pub orphaned: usize,
}

impl ClearReport {
    pub fn total(&self) -> usize {
        self.expired + self.reassigned + self.orphaned
    }
}

pub struct SliceClearer {
    service: NodeService,
    ctx: CoreContext,
}

impl SliceClearer {
    pub fn new(service: NodeService, ctx: CoreContext) -> Self {
        Self { service, ctx }
    }

    fn load_cursor(&self) -> Result<i64> {
        match self.service.store().get(BlobKind::Cursor, self.service.node_id()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .trim()
                .parse()
                .map_err(|_| Error::internal("corrupt clear cursor")),
            Err(StorageError::NotFound(_)) => Ok(i64::MIN),
            Err(e) => Err(e.into()),
        }
    }

    fn save_cursor(&self, watermark: i64) -> Result<()> {
        self.service.store().put(
            BlobKind::Cursor,
            self.service.node_id(),
            watermark.to_string().as_bytes(),
        )?;
        Ok(())
    }

    /// Run one eviction pass.
    pub fn sweep(&self) -> Result<ClearReport> {
        let mut report = ClearReport::default();
        let node_id = self.service.node_id().to_string();
        let now = self.ctx.now();
        let ledger = self.service.ledger();

        // Files whose retention ended since the last watermark.
        let cursor = self.load_cursor()?;
        let boundary = now.saturating_sub(nanos(self.ctx.config.file_retain_period));
        for file in ledger.list_nodes_expire_slice(&node_id, boundary)? {
            if file.expire_time < cursor {
                continue;
            }
            for slice in file.slices.iter().filter(|s| s.node_id == node_id) {
                if self.service.store().exists(BlobKind::Slice, &slice.slice_id)? {
                    self.service.delete_slice(&slice.slice_id)?;
                    report.expired += 1;
                    info!(file_id = %file.id, slice_id = %slice.slice_id, "expired slice evicted");
                }
            }
        }
        if boundary > cursor {
            self.save_cursor(boundary)?;
        }

        // Slices still on disk that the ledger does not place here. A fresh
        // push may precede the ledger commit that lists it, so both cases
        // wait out `orphan_grace`.
        let grace = nanos(self.ctx.config.orphan_grace);
        for slice_id in self.service.list_slices()? {
            let Some(meta) = self.service.slice_meta(&slice_id)? else {
                continue;
            };
            let settled = now.saturating_sub(meta.stored_at) > grace;
            match ledger.get_file_by_id(&meta.file_id) {
                Ok(file) => {
                    let placed_here = file
                        .replicas(&slice_id)
                        .any(|s| s.node_id == node_id);
                    if !placed_here && settled {
                        self.service.delete_slice(&slice_id)?;
                        report.reassigned += 1;
                        info!(file_id = %file.id, slice_id = %slice_id, "reassigned slice evicted");
                    }
                }
                Err(e) if e.is(ErrorKind::NotFound) => {
                    if settled {
                        self.service.delete_slice(&slice_id)?;
                        report.orphaned += 1;
                        info!(file_id = %meta.file_id, slice_id = %slice_id, "orphan slice evicted");
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Sweep every `clear_interval` until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let interval: Duration = self.ctx.config.clear_interval;
        info!(interval_secs = interval.as_secs(), "Slice clearer starting");
        loop {
            match self.sweep() {
                Ok(report) if report.total() > 0 => {
                    info!(
                        expired = report.expired,
                        reassigned = report.reassigned,
                        orphaned = report.orphaned,
                        "Slice clearer: sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Slice clearer: sweep failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Slice clearer shutting down");
                    return;
                }
            }
        }
    }
}
