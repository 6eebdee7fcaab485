// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Migration Monitor
//!
//! Restores the replica count of this owner's files. A replica is lost when
//! its node has been offline for at least `migration_trigger`, or when its
//! last `max_fail_streak` settled challenges all failed. A logical slice with
//! fewer surviving replicas than its namespace's `replica` (which also
//! covers a raised replica factor) is rebuilt:
//!
//! 1. Pull a surviving replica from an online node and check its hash.
//! 2. Decrypt it and re-encrypt under `K_s(slice_id, new_node)`.
//! 3. Push ciphertext and current-round authenticators to the next nodes in
//!    the placement rotation that hold no replica of the slice.
//! 4. Add the new replicas to the file record (old entries stay until
//!    retention drops them) and append a `SliceMigrateRecord` each.
//!
//! A monitor running for an identity that does not own a file cannot
//! re-encrypt; for files on lost nodes it records `MigrationPending` for
//! the owner instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{nanos, CoreContext};
use crate::crypto::{sha256_hex, FileKey, Identity};
use crate::error::{Error, Result};
use crate::ledger::{
    File, Ledger, ListFileOptions, MigrationPending, Node, PublicSliceMeta, Signed,
    SliceMigrateRecord, UpdateFileSlices,
};
use crate::pdp::pairing::PairingKeys;
use crate::pdp::{current_round, merkle, sigmas_of, SigmaBundle};
use crate::pipeline::{placement, FileLocks};
use crate::transport::{BlobClient, SliceTransport};

/// Outcome of one monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Replicas added.
    pub migrated: usize,
    /// `MigrationPending` records written for other owners.
    pub pending: usize,
    /// Logical slices that stayed under-replicated.
    pub failed: usize,
}

impl MigrationReport {
    fn merge(&mut self, other: MigrationReport) {
        self.migrated += other.migrated;
        self.pending += other.pending;
        self.failed += other.failed;
    }
}

/// A replica added for one logical slice, and the node it replaces.
struct Placed {
    meta: PublicSliceMeta,
    from_node: String,
}

pub struct MigrationMonitor {
    identity: Arc<Identity>,
    ledger: Ledger,
    client: BlobClient,
    ctx: CoreContext,
    pdp: PairingKeys,
    locks: FileLocks,
    semaphore: Arc<Semaphore>,
}

impl MigrationMonitor {
    pub fn new(
        identity: Arc<Identity>,
        ledger: Ledger,
        transport: Arc<dyn SliceTransport>,
        ctx: CoreContext,
    ) -> Result<Self> {
        let pdp = PairingKeys::derive(&identity, &ctx.curve)?;
        let client = BlobClient::new(transport, identity.clone(), ctx.clone());
        let semaphore = Arc::new(Semaphore::new(ctx.config.migrate_parallelism.max(1)));
        Ok(Self {
            identity,
            ledger,
            client,
            ctx,
            pdp,
            locks: FileLocks::new(),
            semaphore,
        })
    }

    /// Share commit locks with the writer of the same owner.
    pub fn with_locks(mut self, locks: FileLocks) -> Self {
        self.locks = locks;
        self
    }

    fn node_lost(&self, node: Option<&Node>, now: i64) -> bool {
        let Some(node) = node else {
            return true;
        };
        let offline = !node.is_online(now, nanos(self.ctx.config.heartbeat_timeout));
        offline && node.silent_for(now) >= nanos(self.ctx.config.migration_trigger)
    }

    fn replica_lost(&self, replica: &PublicSliceMeta, nodes: &HashMap<String, Node>, now: i64) -> Result<bool> {
        if self.node_lost(nodes.get(&replica.node_id), now) {
            return Ok(true);
        }
        let streak = self.ledger.fail_streak(&replica.slice_id, &replica.node_id)?;
        Ok(streak >= self.ctx.config.max_fail_streak.max(1))
    }

    // ========== Cycle ==========

    pub async fn tick(&self) -> Result<MigrationReport> {
        let now = self.ctx.now();
        let nodes: HashMap<String, Node> = self
            .ledger
            .list_nodes(false)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let files: Vec<File> = self
            .ledger
            .list_files(&ListFileOptions::owner(self.identity.public_key()))?
            .into_iter()
            .filter(|f| !f.is_expired(now))
            .collect();

        let nodes_ref = &nodes;
        let results = join_all(files.iter().map(|file| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| Error::internal("migration semaphore closed"))?;
            self.migrate_file(file, nodes_ref).await
        }))
        .await;

        let mut report = MigrationReport::default();
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(r) => report.merge(r),
                Err(e) => {
                    report.failed += 1;
                    warn!(file_id = %file.id, error = %e, "Migration monitor: file failed");
                }
            }
        }

        report.pending += self.report_foreign(&nodes, now)?;
        Ok(report)
    }

    /// Rebuild under-replicated slices of one owned file.
    async fn migrate_file(&self, file: &File, nodes: &HashMap<String, Node>) -> Result<MigrationReport> {
        let now = self.ctx.now();
        let heartbeat_timeout = nanos(self.ctx.config.heartbeat_timeout);
        let ns = self.ledger.get_ns_by_name(&file.owner, &file.namespace)?;
        let replica = ns.replica.max(1) as usize;
        let online: Vec<Node> = nodes
            .values()
            .filter(|n| n.is_online(now, heartbeat_timeout))
            .cloned()
            .collect();

        let key = FileKey::derive(&self.identity, &file.id)?;
        let mut report = MigrationReport::default();
        let mut placed = Vec::new();

        for slice_id in file.slice_ids() {
            let replicas: Vec<&PublicSliceMeta> = file.replicas(&slice_id).collect();
            let mut lost = Vec::new();
            let mut surviving = Vec::new();
            for r in &replicas {
                if self.replica_lost(r, nodes, now)? {
                    lost.push(*r);
                } else {
                    surviving.push(*r);
                }
            }
            if surviving.len() >= replica {
                continue;
            }
            let need = replica - surviving.len();

            let sources: Vec<&PublicSliceMeta> = surviving
                .iter()
                .copied()
                .filter(|r| nodes.get(&r.node_id).is_some_and(|n| n.is_online(now, heartbeat_timeout)))
                .collect();
            let Some((chunk, source_node)) = self.recover(file, &key, &sources, nodes).await else {
                report.failed += 1;
                warn!(file_id = %file.id, slice_id = %slice_id, "Migration monitor: no readable replica left");
                continue;
            };

            let holders: Vec<&str> = replicas.iter().map(|r| r.node_id.as_str()).collect();
            let index = replicas[0].index;
            let mut added = 0;
            for target in placement::rotation(&file.id, index, &online, &holders) {
                if added == need {
                    break;
                }
                match self.place(file, &key, replicas[0], &target, &chunk).await {
                    Ok(meta) => {
                        let from_node = lost
                            .get(added)
                            .map(|r| r.node_id.clone())
                            .unwrap_or_else(|| source_node.clone());
                        placed.push(Placed { meta, from_node });
                        added += 1;
                    }
                    Err(e) => warn!(
                        file_id = %file.id,
                        slice_id = %slice_id,
                        node_id = %target.id,
                        error = %e,
                        "Migration monitor: placement failed, trying next node"
                    ),
                }
            }
            if added < need {
                report.failed += 1;
                warn!(
                    file_id = %file.id,
                    slice_id = %slice_id,
                    added,
                    need,
                    "Migration monitor: slice still under-replicated"
                );
            }
        }

        if !placed.is_empty() {
            report.migrated += self.commit(file, placed).await?;
        }
        Ok(report)
    }

    /// Plaintext chunk from the first source whose ciphertext checks out.
    async fn recover(
        &self,
        file: &File,
        key: &FileKey,
        sources: &[&PublicSliceMeta],
        nodes: &HashMap<String, Node>,
    ) -> Option<(Vec<u8>, String)> {
        for source in sources {
            let node = nodes.get(&source.node_id)?;
            let result = async {
                let data = self.client.pull_slice(node, &file.id, &source.slice_id).await?;
                if sha256_hex(&data) != source.cipher_hash {
                    return Err(Error::crypto("ciphertext does not match the ledger hash"));
                }
                key.slice_key(&source.slice_id, &source.node_id)?.decrypt(&data)
            }
            .await;
            match result {
                Ok(chunk) => return Some((chunk, source.node_id.clone())),
                Err(e) => debug!(slice_id = %source.slice_id, node_id = %node.id, error = %e, "migration source unusable"),
            }
        }
        None
    }

    async fn place(
        &self,
        file: &File,
        key: &FileKey,
        template: &PublicSliceMeta,
        target: &Node,
        chunk: &[u8],
    ) -> Result<PublicSliceMeta> {
        let ciphertext = key.slice_key(&template.slice_id, &target.id)?.encrypt(chunk)?;
        self.client
            .push_slice(target, &file.id, &template.slice_id, &ciphertext)
            .await?;

        let index = template.pdp_index.unwrap_or(template.index);
        let round = current_round(file.publish_time, self.ctx.now(), self.ctx.config.pdp_round_period);
        let bundle = SigmaBundle::compute(&self.pdp, &self.ctx.curve, round, index, &ciphertext)?;
        self.client
            .push_sigmas(target, &file.id, &template.slice_id, &bundle.to_bytes()?)
            .await?;

        Ok(PublicSliceMeta {
            slice_id: template.slice_id.clone(),
            node_id: target.id.clone(),
            cipher_hash: sha256_hex(&ciphertext),
            length: ciphertext.len() as u64,
            index: template.index,
            sigmas_id: Some(sigmas_of(&template.slice_id)),
            pdp_index: Some(index),
            merkle_root: Some(merkle::root(&ciphertext, self.ctx.config.merkle_range_size)),
        })
    }

    /// Add the new replicas to the latest file record and audit each move.
    async fn commit(&self, file: &File, placed: Vec<Placed>) -> Result<usize> {
        let _guard = self.locks.lock(&file.id).await;
        let current = self.ledger.get_file_by_id(&file.id)?;
        let mut slices = current.slices.clone();
        let mut added = Vec::new();
        for p in placed {
            if slices
                .iter()
                .any(|s| s.slice_id == p.meta.slice_id && s.node_id == p.meta.node_id)
            {
                continue;
            }
            slices.push(p.meta.clone());
            added.push(p);
        }
        slices.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.node_id.cmp(&b.node_id)));

        let now = self.ctx.now();
        let update = UpdateFileSlices {
            file_id: file.id.clone(),
            slices,
            timestamp: now,
        };
        self.ledger
            .update_file_slices(&Signed::new(&self.identity, update)?)?;

        for p in &added {
            let record = SliceMigrateRecord {
                file_id: file.id.clone(),
                slice_id: p.meta.slice_id.clone(),
                from_node: p.from_node.clone(),
                to_node: p.meta.node_id.clone(),
                ctime: now,
            };
            self.ledger
                .slice_migrate_record(&Signed::new(&self.identity, record)?)?;
            info!(
                file_id = %file.id,
                slice_id = %p.meta.slice_id,
                from_node = %p.from_node,
                to_node = %p.meta.node_id,
                "replica migrated"
            );
        }
        Ok(added.len())
    }

    /// `MigrationPending` for other owners' slices on lost nodes.
    fn report_foreign(&self, nodes: &HashMap<String, Node>, now: i64) -> Result<usize> {
        let me = self.identity.public_key();
        let mut recorded = 0;
        let mut known: HashMap<String, BTreeSet<(String, String, String)>> = HashMap::new();

        for node in nodes.values().filter(|n| self.node_lost(Some(*n), now)) {
            for file in self.ledger.list_nodes_expire_slice(&node.id, i64::MAX)? {
                if file.owner == me || file.is_expired(now) {
                    continue;
                }
                let ns = self.ledger.get_ns_by_name(&file.owner, &file.namespace)?;
                let owner_hex = file.owner.to_hex();
                if !known.contains_key(&owner_hex) {
                    let seen = self
                        .ledger
                        .list_migration_pending(&file.owner)?
                        .into_iter()
                        .map(|p| (p.file_id, p.slice_id, p.from_node))
                        .collect();
                    known.insert(owner_hex.clone(), seen);
                }

                for slice in file.slices.iter().filter(|s| s.node_id == node.id) {
                    let surviving = file
                        .replicas(&slice.slice_id)
                        .filter(|r| !self.node_lost(nodes.get(&r.node_id), now))
                        .count();
                    if surviving >= ns.replica as usize {
                        continue;
                    }
                    let marker = (file.id.clone(), slice.slice_id.clone(), node.id.clone());
                    if known.get(&owner_hex).is_some_and(|s| s.contains(&marker)) {
                        continue;
                    }
                    let pending = MigrationPending {
                        file_id: file.id.clone(),
                        slice_id: slice.slice_id.clone(),
                        owner: file.owner,
                        from_node: node.id.clone(),
                        reporter: me,
                        reason: format!("node {} offline", node.id),
                        ctime: now,
                    };
                    self.ledger
                        .record_migration_pending(&Signed::new(&self.identity, pending)?)?;
                    known.entry(owner_hex.clone()).or_default().insert(marker);
                    recorded += 1;
                    info!(file_id = %file.id, slice_id = %slice.slice_id, node_id = %node.id, "migration deferred to owner");
                }
            }
        }
        Ok(recorded)
    }

    // ========== Loop ==========

    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.ctx.config.migration_interval;
        info!(interval_secs = interval.as_secs(), "Migration monitor starting");
        loop {
            match self.tick().await {
                Ok(report) if report != MigrationReport::default() => info!(
                    migrated = report.migrated,
                    pending = report.pending,
                    failed = report.failed,
                    "Migration monitor: cycle complete"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Migration monitor: cycle failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Migration monitor shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bls12_381::Scalar;

    use super::*;
    use crate::config::CoreConfig;
    use crate::ledger::UpdateNsReplica;
    use crate::pipeline::{ReadOptions, WriteOptions};
    use crate::storage::BlobKind;
    use crate::testutil::Cluster;

    async fn write(cluster: &Cluster, name: &str, data: &[u8]) -> File {
        let opts = WriteOptions {
            namespace: "n".into(),
            name: name.into(),
            expire_time: cluster.now() + 30 * 24 * 3_600_000_000_000,
            ..Default::default()
        };
        let id = cluster.writer().write(&opts, data).await.unwrap();
        cluster.ledger.get_file_by_id(&id).unwrap()
    }

    /// Let `node_id` miss heartbeats past the migration trigger.
    fn lose_node(cluster: &Cluster, node_id: &str) {
        cluster.transport.set_down(node_id, true);
        cluster.advance(CoreConfig::default().migration_trigger + Duration::from_secs(1));
        cluster.heartbeat_all_except(&[node_id]);
    }

    #[tokio::test]
    async fn offline_holder_is_replaced_and_audited() {
        let cluster = Cluster::new(3, 2, 64);
        let file = write(&cluster, "hello.txt", b"hello world\n").await;
        let lost = file.slices[0].node_id.clone();
        let holders: BTreeSet<String> = file.node_ids().into_iter().collect();
        let spare = (0..3)
            .map(|i| cluster.node_id(i))
            .find(|id| !holders.contains(id))
            .unwrap();

        lose_node(&cluster, &lost);
        let report = cluster.migration().tick().await.unwrap();
        assert_eq!(report.migrated, 1);

        let after = cluster.ledger.get_file_by_id(&file.id).unwrap();
        assert_eq!(after.slices.len(), 3);
        assert!(after.slices.iter().any(|s| s.node_id == lost));
        assert!(after.slices.iter().any(|s| s.node_id == spare));

        let records = cluster.ledger.get_slice_migrate_records(&lost).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].to_node, spare);

        let got = cluster
            .reader(cluster.owner.clone())
            .read(&ReadOptions::by_id(&file.id))
            .await
            .unwrap();
        assert_eq!(got, b"hello world\n");
    }

    #[tokio::test]
    async fn briefly_offline_node_is_left_alone() {
        let cluster = Cluster::new(3, 2, 64);
        let file = write(&cluster, "a", b"x").await;
        let node = file.slices[0].node_id.clone();

        cluster.advance(CoreConfig::default().heartbeat_timeout + Duration::from_secs(1));
        cluster.heartbeat_all_except(&[node.as_str()]);
        assert_eq!(cluster.migration().tick().await.unwrap(), MigrationReport::default());
    }

    #[tokio::test]
    async fn migrated_replica_answers_challenges() {
        let cluster = Cluster::new(3, 2, 64);
        let file = write(&cluster, "a", b"payload").await;
        lose_node(&cluster, &file.slices[0].node_id.clone());
        cluster.migration().tick().await.unwrap();

        let after = cluster.ledger.get_file_by_id(&file.id).unwrap();
        let holders: BTreeSet<String> = file.node_ids().into_iter().collect();
        let fresh = after.slices.iter().find(|s| !holders.contains(&s.node_id)).unwrap();
        let node = cluster.ledger.get_node(&fresh.node_id).unwrap();

        let challenge = cluster
            .scheduler()
            .challenge_pairing(&after, &node, &[fresh.slice_id.clone()], &[Scalar::from(5u64)])
            .await
            .unwrap();
        cluster.prover(&node.id).prove_pending().unwrap();
        let settled = cluster.ledger.get_challenge_by_id(&challenge.id).unwrap();
        assert_eq!(settled.status, crate::ledger::ChallengeStatus::Proved);
    }

    #[tokio::test]
    async fn failing_challenges_trigger_migration() {
        let mut config = Cluster::config(64);
        config.max_fail_streak = 1;
        let cluster = Cluster::with_config(3, 2, config);
        let file = write(&cluster, "a", b"payload").await;
        let bad = file.slices[0].clone();

        let store = cluster.service(&bad.node_id).store().clone();
        let mut bytes = store.get(BlobKind::Slice, &bad.slice_id).unwrap();
        bytes[0] ^= 0x80;
        store.put(BlobKind::Slice, &bad.slice_id, &bytes).unwrap();

        let node = cluster.ledger.get_node(&bad.node_id).unwrap();
        cluster
            .scheduler()
            .challenge_pairing(&file, &node, &[bad.slice_id.clone()], &[Scalar::from(9u64)])
            .await
            .unwrap();
        cluster.prover(&bad.node_id).prove_pending().unwrap();

        let report = cluster.migration().tick().await.unwrap();
        assert_eq!(report.migrated, 1);
        let records = cluster.ledger.get_slice_migrate_records(&bad.node_id).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn raised_replica_factor_adds_a_copy() {
        let cluster = Cluster::new(3, 2, 64);
        let file = write(&cluster, "a", &[1u8; 100]).await;
        let payload = UpdateNsReplica {
            owner: cluster.owner.public_key(),
            name: "n".into(),
            replica: 3,
            timestamp: cluster.now(),
        };
        cluster
            .ledger
            .update_ns_replica(&Signed::new(&cluster.owner, payload).unwrap())
            .unwrap();

        let report = cluster.migration().tick().await.unwrap();
        assert_eq!(report.migrated, 2);
        let after = cluster.ledger.get_file_by_id(&file.id).unwrap();
        for slice_id in after.slice_ids() {
            assert_eq!(after.replicas(&slice_id).count(), 3);
        }
    }

    #[tokio::test]
    async fn every_added_copy_gets_its_own_record() {
        let cluster = Cluster::new(3, 1, 64);
        let file = write(&cluster, "a", b"x").await;
        let source = file.slices[0].node_id.clone();
        let payload = UpdateNsReplica {
            owner: cluster.owner.public_key(),
            name: "n".into(),
            replica: 3,
            timestamp: cluster.now(),
        };
        cluster
            .ledger
            .update_ns_replica(&Signed::new(&cluster.owner, payload).unwrap())
            .unwrap();

        let report = cluster.migration().tick().await.unwrap();
        assert_eq!(report.migrated, 2);

        let records = cluster.ledger.get_slice_migrate_records(&source).unwrap();
        assert_eq!(records.len(), 2);
        let targets: BTreeSet<String> = records.iter().map(|r| r.to_node.clone()).collect();
        assert_eq!(targets.len(), 2);
        assert!(!targets.contains(&source));
    }

    #[tokio::test]
    async fn no_spare_node_leaves_the_file_untouched() {
        let cluster = Cluster::new(2, 2, 64);
        let file = write(&cluster, "a", b"x").await;
        lose_node(&cluster, &file.slices[0].node_id.clone());

        let report = cluster.migration().tick().await.unwrap();
        assert_eq!(report.migrated, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(cluster.ledger.get_file_by_id(&file.id).unwrap().slices, file.slices);
    }

    #[tokio::test]
    async fn foreign_monitor_records_pending_once() {
        let cluster = Cluster::new(3, 2, 64);
        let file = write(&cluster, "a", b"x").await;
        lose_node(&cluster, &file.slices[0].node_id.clone());

        let operator = cluster.migration_for(Arc::new(Identity::generate()));
        assert_eq!(operator.tick().await.unwrap().pending, 1);
        assert_eq!(operator.tick().await.unwrap().pending, 0);

        let pending = cluster
            .ledger
            .list_migration_pending(&cluster.owner.public_key())
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_node, file.slices[0].node_id);
    }
}
