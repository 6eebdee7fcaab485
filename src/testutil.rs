// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process cluster for tests: one ledger, `n` storage nodes with
//! in-memory blob stores behind a [`LocalTransport`], and a manual clock.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::context::{CoreContext, ManualClock};
use crate::crypto::Identity;
use crate::ledger::{AddNamespace, Heartbeat, Ledger, MemoryKv, NodeRegistration, Signed};
use crate::migration::MigrationMonitor;
use crate::node::{NodeProver, NodeService};
use crate::pdp::scheduler::ChallengeScheduler;
use crate::pipeline::{SliceReader, SliceWriter};
use crate::storage::{BlobKind, MemoryBlobStore};
use crate::transport::local::LocalTransport;

pub const T0: i64 = 1_700_000_000_000_000_000;

pub struct Cluster {
    pub owner: Arc<Identity>,
    pub ledger: Ledger,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<LocalTransport>,
    pub ctx: CoreContext,
    pub nodes: Vec<Arc<Identity>>,
    pub services: Vec<NodeService>,
}

impl Cluster {
    /// Defaults with a short push backoff and the given slice size.
    pub fn config(slice_size: usize) -> CoreConfig {
        CoreConfig {
            slice_size,
            push_backoff: Duration::from_millis(1),
            ..CoreConfig::default()
        }
    }

    pub fn new(nodes: usize, replica: u32, slice_size: usize) -> Self {
        Self::with_config(nodes, replica, Self::config(slice_size))
    }

    /// `nodes` registered, online storage nodes and namespace `"n"` with
    /// `replica` owned by [`Cluster::owner`].
    pub fn with_config(nodes: usize, replica: u32, config: CoreConfig) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = CoreContext::with_clock(config, clock.clone());
        let ledger = Ledger::new(Arc::new(MemoryKv::new()), ctx.clone());
        let owner = Arc::new(Identity::generate());

        let ns = AddNamespace {
            owner: owner.public_key(),
            name: "n".into(),
            replica,
            description: String::new(),
            timestamp: T0,
        };
        ledger
            .add_file_ns(&Signed::new(&owner, ns).unwrap())
            .unwrap();

        let transport = Arc::new(LocalTransport::new());
        let mut identities = Vec::with_capacity(nodes);
        let mut services = Vec::with_capacity(nodes);
        for i in 0..nodes {
            let identity = Arc::new(Identity::generate());
            let registration = NodeRegistration {
                id: identity.node_id(),
                name: format!("node-{i}"),
                address: format!("local://node-{i}"),
                timestamp: T0,
            };
            ledger
                .add_node(&Signed::new(&identity, registration).unwrap())
                .unwrap();

            let service = NodeService::new(
                identity.node_id(),
                ledger.clone(),
                Arc::new(MemoryBlobStore::new()),
                ctx.clone(),
            );
            transport.register(service.clone());
            identities.push(identity);
            services.push(service);
        }

        Self {
            owner,
            ledger,
            clock,
            transport,
            ctx,
            nodes: identities,
            services,
        }
    }

    pub fn now(&self) -> i64 {
        self.ctx.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Id of the `i`-th node in registration order.
    pub fn node_id(&self, i: usize) -> String {
        self.nodes[i].node_id()
    }

    pub fn service(&self, node_id: &str) -> NodeService {
        self.services
            .iter()
            .find(|s| s.node_id() == node_id)
            .cloned()
            .unwrap_or_else(|| panic!("no node {node_id} in the cluster"))
    }

    /// Slice objects held across every node.
    pub fn stored_slices(&self) -> usize {
        self.services
            .iter()
            .map(|s| s.store().list(BlobKind::Slice).unwrap().len())
            .sum()
    }

    /// Heartbeat every node except `skip` at the current time.
    pub fn heartbeat_all_except(&self, skip: &[&str]) {
        let now = self.now();
        for identity in &self.nodes {
            let node_id = identity.node_id();
            if skip.contains(&node_id.as_str()) {
                continue;
            }
            let hb = Heartbeat {
                node_id,
                timestamp: now,
            };
            self.ledger
                .heartbeat(&Signed::new(identity, hb).unwrap())
                .unwrap();
        }
    }

    pub fn writer(&self) -> SliceWriter {
        SliceWriter::new(
            self.owner.clone(),
            self.ledger.clone(),
            self.transport.clone(),
            self.ctx.clone(),
        )
    }

    pub fn reader(&self, identity: Arc<Identity>) -> SliceReader {
        SliceReader::new(identity, self.ledger.clone(), self.transport.clone(), self.ctx.clone())
    }

    pub fn scheduler(&self) -> ChallengeScheduler {
        ChallengeScheduler::new(
            self.owner.clone(),
            self.ledger.clone(),
            self.transport.clone(),
            self.ctx.clone(),
        )
        .unwrap()
    }

    pub fn prover(&self, node_id: &str) -> NodeProver {
        let identity = self
            .nodes
            .iter()
            .find(|n| n.node_id() == node_id)
            .cloned()
            .unwrap_or_else(|| panic!("no node {node_id} in the cluster"));
        NodeProver::new(identity, self.service(node_id), self.ctx.clone())
    }

    pub fn migration(&self) -> MigrationMonitor {
        self.migration_for(self.owner.clone())
    }

    /// A monitor running under another identity.
    pub fn migration_for(&self, identity: Arc<Identity>) -> MigrationMonitor {
        MigrationMonitor::new(
            identity,
            self.ledger.clone(),
            self.transport.clone(),
            self.ctx.clone(),
        )
        .unwrap()
    }
}

/// End-to-end flows across writer, reader, PDP, migration and authorization.
mod scenarios {
    use bls12_381::Scalar;

    use super::*;
    use crate::authz::AuthClient;
    use crate::error::ErrorKind;
    use crate::ledger::ChallengeStatus;
    use crate::pipeline::{ReadOptions, WriteOptions};

    const HOUR: i64 = 3_600_000_000_000;
    const HELLO: &[u8] = b"hello world\n";

    async fn hello(cluster: &Cluster) -> String {
        let opts = WriteOptions {
            namespace: "n".into(),
            name: "hello.txt".into(),
            expire_time: cluster.now() + 24 * HOUR,
            ..Default::default()
        };
        cluster.writer().write(&opts, HELLO).await.unwrap()
    }

    #[tokio::test]
    async fn upload_then_download() {
        let cluster = Cluster::new(3, 2, 64);
        let file_id = hello(&cluster).await;

        let file = cluster.ledger.get_file_by_id(&file_id).unwrap();
        assert_eq!(file.slice_ids().len(), 1);
        assert_eq!(file.slices.len(), 2);
        assert_ne!(file.slices[0].node_id, file.slices[1].node_id);

        let got = cluster
            .reader(cluster.owner.clone())
            .read(&ReadOptions::by_id(&file_id))
            .await
            .unwrap();
        assert_eq!(got, HELLO);
    }

    #[tokio::test]
    async fn read_survives_a_dead_holder() {
        let cluster = Cluster::new(3, 2, 64);
        let file_id = hello(&cluster).await;
        let file = cluster.ledger.get_file_by_id(&file_id).unwrap();

        cluster.transport.set_down(&file.slices[0].node_id, true);
        let got = cluster
            .reader(cluster.owner.clone())
            .read(&ReadOptions::by_id(&file_id))
            .await
            .unwrap();
        assert_eq!(got, HELLO);
    }

    #[tokio::test]
    async fn long_outage_moves_the_replica() {
        let cluster = Cluster::new(3, 2, 64);
        let file_id = hello(&cluster).await;
        let file = cluster.ledger.get_file_by_id(&file_id).unwrap();
        let lost = file.slices[0].node_id.clone();

        cluster.transport.set_down(&lost, true);
        cluster.advance(cluster.ctx.config.migration_trigger + Duration::from_secs(1));
        cluster.heartbeat_all_except(&[lost.as_str()]);
        cluster.migration().tick().await.unwrap();

        let after = cluster.ledger.get_file_by_id(&file_id).unwrap();
        assert_eq!(after.slices.len(), 3);
        assert!(after.slices.iter().any(|s| s.node_id == lost));

        let records = cluster.ledger.get_slice_migrate_records(&lost).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!file.node_ids().contains(&records[0].to_node));
    }

    #[tokio::test]
    async fn honest_node_passes_and_corrupt_node_fails() {
        let cluster = Cluster::new(3, 2, 64);
        let file_id = hello(&cluster).await;
        let file = cluster.ledger.get_file_by_id(&file_id).unwrap();
        let (good, bad) = (&file.slices[0], &file.slices[1]);

        let store = cluster.service(&bad.node_id).store().clone();
        let mut bytes = store.get(BlobKind::Slice, &bad.slice_id).unwrap();
        bytes[5] ^= 0x01;
        store.put(BlobKind::Slice, &bad.slice_id, &bytes).unwrap();

        let scheduler = cluster.scheduler();
        let mut ids = Vec::new();
        for meta in [good, bad] {
            let node = cluster.ledger.get_node(&meta.node_id).unwrap();
            let challenge = scheduler
                .challenge_pairing(&file, &node, &[meta.slice_id.clone()], &[Scalar::from(7u64)])
                .await
                .unwrap();
            cluster.prover(&meta.node_id).prove_pending().unwrap();
            ids.push(challenge.id);
        }

        let status = |id: &str| cluster.ledger.get_challenge_by_id(id).unwrap().status;
        assert_eq!(status(&ids[0]), ChallengeStatus::Proved);
        assert_eq!(status(&ids[1]), ChallengeStatus::Failed);
    }

    #[tokio::test]
    async fn approval_grants_reads_until_it_expires() {
        let cluster = Cluster::new(3, 2, 64);
        let file_id = hello(&cluster).await;

        let applier = Arc::new(Identity::generate());
        let app = AuthClient::new(applier.clone(), cluster.ledger.clone())
            .apply(&file_id, "read", "quarterly audit")
            .await
            .unwrap();
        AuthClient::new(cluster.owner.clone(), cluster.ledger.clone())
            .approve(&app.id, cluster.now() + HOUR)
            .await
            .unwrap();

        let reader = cluster.reader(applier);
        assert_eq!(reader.read(&ReadOptions::by_id(&file_id)).await.unwrap(), HELLO);

        cluster.advance(Duration::from_secs(3_601));
        let err = reader.read(&ReadOptions::by_id(&file_id)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
