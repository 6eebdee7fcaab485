// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # PDP Scheduler
//!
//! Owner-side loop, one tick per `challenge_interval`:
//! 1. Fail this owner's `ToProve` challenges older than `challenge_timeout`.
//! 2. Collect `(file, node)` groups for unexpired files whose last
//!    challenge is at least one interval old, skipping groups that already
//!    have an open challenge.
//! 3. Challenge the least recently challenged nodes and files first, up to
//!    `challenge_fan_out` slice pairs and `challenge_max_per_round`
//!    challenges.
//!
//! A pairing challenge binds the file's current round. When a node's
//! stored authenticators are from an older round they are recomputed from
//! the replica (after checking its hash) and pushed before the challenge is
//! published.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bls12_381::Scalar;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pairing::{self, PairingKeys};
use super::{current_round, merkle, PdpAlgorithm, SigmaBundle};
use crate::context::{nanos, CoreContext};
use crate::crypto::{sha256_hex, Identity};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::{
    Challenge, ChallengeBody, ChallengeFail, ChallengeStatus, File, Ledger, ListChallengeOptions,
    ListFileOptions, MerkleChallenge, MerkleRange, Node, PairingChallenge, PublicSliceMeta, Signed,
};
use crate::transport::{BlobClient, SliceTransport};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub issued: usize,
    pub timed_out: usize,
}

struct Candidate<'a> {
    file: &'a File,
    node: &'a Node,
    slice_ids: Vec<String>,
    node_last: i64,
    file_last: i64,
}

pub struct ChallengeScheduler {
    owner: Arc<Identity>,
    ledger: Ledger,
    client: BlobClient,
    ctx: CoreContext,
    keys: PairingKeys,
}

impl ChallengeScheduler {
    pub fn new(
        owner: Arc<Identity>,
        ledger: Ledger,
        transport: Arc<dyn SliceTransport>,
        ctx: CoreContext,
    ) -> Result<Self> {
        let keys = PairingKeys::derive(&owner, &ctx.curve)?;
        let client = BlobClient::new(transport, owner.clone(), ctx.clone());
        Ok(Self {
            owner,
            ledger,
            client,
            ctx,
            keys,
        })
    }

    fn replica_on<'a>(file: &'a File, slice_id: &'a str, node_id: &str) -> Result<&'a PublicSliceMeta> {
        file.replicas(slice_id)
            .find(|r| r.node_id == node_id)
            .ok_or_else(|| Error::bad_param(format!("node {node_id} holds no replica of slice {slice_id}")))
    }

    fn open_challenges(&self, file_id: &str) -> Result<Vec<Challenge>> {
        self.ledger.list_challenge_requests(&ListChallengeOptions {
            file_id: Some(file_id.to_string()),
            status: Some(ChallengeStatus::ToProve),
            ..Default::default()
        })
    }

    // ========== Tick ==========

    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let files: Vec<File> = self
            .ledger
            .list_files(&ListFileOptions::owner(self.owner.public_key()))?
            .into_iter()
            .filter(|f| !f.is_expired(now))
            .collect();

        let mut report = TickReport {
            timed_out: self.sweep_overdue(&files)?,
            ..Default::default()
        };

        let online: HashMap<String, Node> = self
            .ledger
            .list_nodes(true)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let mut candidates = self.candidates(&files, &online, now)?;
        candidates.sort_by(|a, b| {
            a.node_last
                .cmp(&b.node_last)
                .then(a.file_last.cmp(&b.file_last))
                .then_with(|| a.file.id.cmp(&b.file.id))
        });

        let mut pairs_left = config.challenge_fan_out;
        for mut candidate in candidates {
            if pairs_left == 0 || report.issued >= config.challenge_max_per_round {
                break;
            }
            let take = config.challenge_slices.max(1).min(pairs_left).min(candidate.slice_ids.len());
            candidate.slice_ids.shuffle(&mut rand::thread_rng());
            candidate.slice_ids.truncate(take);

            match self
                .challenge_replicas(candidate.file, candidate.node, &candidate.slice_ids)
                .await
            {
                Ok(challenge) => {
                    report.issued += 1;
                    pairs_left -= take;
                    debug!(
                        challenge_id = %challenge.id,
                        file_id = %challenge.file_id,
                        node_id = %challenge.target_node,
                        slices = take,
                        "PDP scheduler: challenge issued"
                    );
                }
                Err(e) => warn!(
                    file_id = %candidate.file.id,
                    node_id = %candidate.node.id,
                    error = %e,
                    "PDP scheduler: challenge failed"
                ),
            }
        }
        Ok(report)
    }

    /// Fail every overdue `ToProve` challenge on `files`.
    fn sweep_overdue(&self, files: &[File]) -> Result<usize> {
        let now = self.ctx.now();
        let timeout = nanos(self.ctx.config.challenge_timeout);
        let mut failed = 0;
        for file in files {
            for challenge in self.open_challenges(&file.id)? {
                if !challenge.is_overdue(now, timeout) {
                    continue;
                }
                let payload = ChallengeFail {
                    challenge_id: challenge.id.clone(),
                    timestamp: now,
                };
                match self.ledger.challenge_fail(&Signed::new(&self.owner, payload)?) {
                    Ok(_) => failed += 1,
                    Err(e) if e.is(ErrorKind::AlreadyUpdated) => {}
                    Err(e) => warn!(challenge_id = %challenge.id, error = %e, "PDP scheduler: timeout sweep failed"),
                }
            }
        }
        Ok(failed)
    }

    fn candidates<'a>(
        &self,
        files: &'a [File],
        online: &'a HashMap<String, Node>,
        now: i64,
    ) -> Result<Vec<Candidate<'a>>> {
        let interval = nanos(self.ctx.config.challenge_interval);
        let max_streak = self.ctx.config.max_fail_streak.max(1);
        let mut node_last: HashMap<&str, i64> = HashMap::new();
        let mut out = Vec::new();

        for file in files {
            let file_last = self.ledger.last_challenged_file(&file.id)?;
            if file_last.is_some_and(|t| t.saturating_add(interval) > now) {
                continue;
            }
            let busy: BTreeSet<String> = self
                .open_challenges(&file.id)?
                .into_iter()
                .map(|c| c.target_node)
                .collect();

            for node_id in file.node_ids() {
                let Some(node) = online.get(&node_id) else {
                    continue;
                };
                if busy.contains(&node_id) {
                    continue;
                }
                let last = match node_last.get(node.id.as_str()) {
                    Some(t) => *t,
                    None => {
                        let t = self.ledger.last_challenged_node(&node.id)?.unwrap_or(i64::MIN);
                        node_last.insert(node.id.as_str(), t);
                        t
                    }
                };
                // Replicas past the fail streak are already written off.
                let mut slice_ids = Vec::new();
                for s in file.slices.iter().filter(|s| s.node_id == node.id) {
                    if self.ledger.fail_streak(&s.slice_id, &node.id)? < max_streak {
                        slice_ids.push(s.slice_id.clone());
                    }
                }
                slice_ids.sort();
                slice_ids.dedup();
                if slice_ids.is_empty() {
                    continue;
                }
                out.push(Candidate {
                    file,
                    node,
                    slice_ids,
                    node_last: last,
                    file_last: file_last.unwrap_or(i64::MIN),
                });
            }
        }
        Ok(out)
    }

    // ========== Issuing ==========

    /// Challenge `slice_ids` on `node` with the configured scheme and fresh
    /// random parameters.
    pub async fn challenge_replicas(&self, file: &File, node: &Node, slice_ids: &[String]) -> Result<Challenge> {
        match self.ctx.config.pdp_algorithm {
            PdpAlgorithm::Pairing => {
                let vs: Vec<Scalar> = slice_ids.iter().map(|_| pairing::random_scalar()).collect();
                self.challenge_pairing(file, node, slice_ids, &vs).await
            }
            PdpAlgorithm::Merkle => {
                let range_size = self.ctx.config.merkle_range_size;
                let mut rng = rand::thread_rng();
                let ranges = slice_ids
                    .iter()
                    .map(|slice_id| {
                        let meta = Self::replica_on(file, slice_id, &node.id)?;
                        let count = merkle::range_count(meta.length as usize, range_size) as u64;
                        Ok(MerkleRange {
                            slice_id: slice_id.clone(),
                            range_index: rng.gen_range(0..count.max(1)),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.challenge_merkle(file, node, ranges)
            }
        }
    }

    /// Pairing challenge over `slice_ids` with coefficients `vs`.
    pub async fn challenge_pairing(
        &self,
        file: &File,
        node: &Node,
        slice_ids: &[String],
        vs: &[Scalar],
    ) -> Result<Challenge> {
        if slice_ids.len() != vs.len() {
            return Err(Error::bad_param("one coefficient per challenged slice"));
        }
        let now = self.ctx.now();
        let round = current_round(file.publish_time, now, self.ctx.config.pdp_round_period);
        let r_j = self.keys.round_randomizer(&self.ctx.curve, round)?;

        let mut indices = Vec::with_capacity(slice_ids.len());
        for slice_id in slice_ids {
            let meta = Self::replica_on(file, slice_id, &node.id)?;
            let index = meta.pdp_index.unwrap_or(meta.index);
            if let Err(e) = self.ensure_sigmas(file, node, meta, index, round).await {
                if e.is(ErrorKind::Network) {
                    return Err(e);
                }
                warn!(
                    file_id = %file.id,
                    slice_id = %slice_id,
                    node_id = %node.id,
                    error = %e,
                    "PDP scheduler: challenging over stale authenticators"
                );
            }
            indices.push(index);
        }

        let body = ChallengeBody::Pairing(PairingChallenge {
            indices,
            vs: vs.iter().map(pairing::scalar_to_hex).collect(),
            rand_seed: pairing::scalar_to_hex(&r_j),
            public: self.keys.public().to_hex(),
            sigma: None,
            mu: None,
        });
        self.publish(file, node, slice_ids.to_vec(), round, body)
    }

    /// Merkle challenge over explicit ranges.
    pub fn challenge_merkle(&self, file: &File, node: &Node, ranges: Vec<MerkleRange>) -> Result<Challenge> {
        let slice_ids: BTreeSet<String> = ranges.iter().map(|r| r.slice_id.clone()).collect();
        let round = current_round(file.publish_time, self.ctx.now(), self.ctx.config.pdp_round_period);
        let body = ChallengeBody::Merkle(MerkleChallenge {
            ranges,
            hash_of_proof: None,
            proofs: None,
        });
        self.publish(file, node, slice_ids.into_iter().collect(), round, body)
    }

    fn publish(
        &self,
        file: &File,
        node: &Node,
        slice_ids: Vec<String>,
        round: i64,
        body: ChallengeBody,
    ) -> Result<Challenge> {
        let challenge = Challenge {
            id: Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            slice_ids,
            file_owner: self.owner.public_key(),
            target_node: node.id.clone(),
            round,
            challenge_time: self.ctx.now(),
            answer_time: None,
            status: ChallengeStatus::ToProve,
            body,
        };
        self.ledger
            .challenge_request(&Signed::new(&self.owner, challenge)?)
    }

    /// Make sure `node` holds authenticators for `round`; returns whether
    /// they had to be recomputed.
    async fn ensure_sigmas(
        &self,
        file: &File,
        node: &Node,
        meta: &PublicSliceMeta,
        index: u64,
        round: i64,
    ) -> Result<bool> {
        match self.client.pull_sigmas(node, &file.id, &meta.slice_id).await {
            Ok(bytes) => {
                if SigmaBundle::from_bytes(&bytes).is_ok_and(|b| b.round == round && b.index == index) {
                    return Ok(false);
                }
            }
            Err(e) if e.is(ErrorKind::Network) => return Err(e),
            Err(e) => debug!(slice_id = %meta.slice_id, error = %e, "sigmas unavailable"),
        }

        let data = self.client.pull_slice(node, &file.id, &meta.slice_id).await?;
        if sha256_hex(&data) != meta.cipher_hash {
            return Err(Error::crypto(format!(
                "replica of slice {} on {} does not match its hash",
                meta.slice_id, node.id
            )));
        }
        let bundle = SigmaBundle::compute(&self.keys, &self.ctx.curve, round, index, &data)?;
        self.client
            .push_sigmas(node, &file.id, &meta.slice_id, &bundle.to_bytes()?)
            .await?;
        info!(file_id = %file.id, slice_id = %meta.slice_id, node_id = %node.id, round, "sigmas refreshed");
        Ok(true)
    }

    // ========== Loop ==========

    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.ctx.config.challenge_interval;
        info!(interval_secs = interval.as_secs(), "PDP scheduler starting");
        loop {
            match self.tick().await {
                Ok(report) if report.issued > 0 || report.timed_out > 0 => info!(
                    issued = report.issued,
                    timed_out = report.timed_out,
                    "PDP scheduler: tick complete"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "PDP scheduler: tick failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!("PDP scheduler shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::CoreConfig;
    use crate::pipeline::WriteOptions;
    use crate::storage::BlobKind;
    use crate::testutil::Cluster;

    async fn written(cluster: &Cluster, name: &str, len: usize) -> File {
        let opts = WriteOptions {
            namespace: "n".into(),
            name: name.into(),
            expire_time: cluster.now() + 30 * 24 * 3_600_000_000_000,
            ..Default::default()
        };
        let id = cluster.writer().write(&opts, &vec![7u8; len]).await.unwrap();
        cluster.ledger.get_file_by_id(&id).unwrap()
    }

    fn node_of(cluster: &Cluster, file: &File, i: usize) -> Node {
        cluster.ledger.get_node(&file.slices[i].node_id).unwrap()
    }

    #[tokio::test]
    async fn pairing_challenge_with_fixed_coefficient_is_proved() {
        let cluster = Cluster::new(3, 2, 64);
        let file = written(&cluster, "a", 12).await;
        let node = node_of(&cluster, &file, 0);

        let challenge = cluster
            .scheduler()
            .challenge_pairing(&file, &node, &[file.slices[0].slice_id.clone()], &[Scalar::from(7u64)])
            .await
            .unwrap();
        assert_eq!(challenge.status, ChallengeStatus::ToProve);

        assert_eq!(cluster.prover(&node.id).prove_pending().unwrap(), 1);
        let settled = cluster.ledger.get_challenge_by_id(&challenge.id).unwrap();
        assert_eq!(settled.status, ChallengeStatus::Proved);
        assert!(settled.answer_time.is_some());
    }

    #[tokio::test]
    async fn corrupted_replica_fails_pairing_challenge() {
        let cluster = Cluster::new(3, 2, 64);
        let file = written(&cluster, "a", 12).await;
        let meta = &file.slices[1];
        let store = cluster.service(&meta.node_id).store().clone();
        let mut bytes = store.get(BlobKind::Slice, &meta.slice_id).unwrap();
        bytes[3] ^= 0x01;
        store.put(BlobKind::Slice, &meta.slice_id, &bytes).unwrap();

        let node = node_of(&cluster, &file, 1);
        let challenge = cluster
            .scheduler()
            .challenge_pairing(&file, &node, &[meta.slice_id.clone()], &[Scalar::from(7u64)])
            .await
            .unwrap();
        cluster.prover(&node.id).prove_pending().unwrap();

        let settled = cluster.ledger.get_challenge_by_id(&challenge.id).unwrap();
        assert_eq!(settled.status, ChallengeStatus::Failed);
    }

    #[tokio::test]
    async fn merkle_challenge_is_proved() {
        let mut config = Cluster::config(64);
        config.pdp_algorithm = PdpAlgorithm::Merkle;
        config.merkle_range_size = 16;
        let cluster = Cluster::with_config(1, 1, config);
        let file = written(&cluster, "m", 100).await;
        assert_eq!(file.slice_ids().len(), 2);

        let report = cluster.scheduler().tick().await.unwrap();
        assert_eq!(report.issued, 1);
        let node_id = &file.slices[0].node_id;
        cluster.prover(node_id).prove_pending().unwrap();

        let proved = cluster
            .ledger
            .list_challenge_requests(&ListChallengeOptions {
                file_id: Some(file.id.clone()),
                status: Some(ChallengeStatus::Proved),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(proved.len(), 1);
        assert!(matches!(proved[0].body, ChallengeBody::Merkle(_)));
    }

    #[tokio::test]
    async fn tick_skips_recently_challenged_files_and_open_groups() {
        let cluster = Cluster::new(2, 2, 64);
        written(&cluster, "a", 10).await;
        let scheduler = cluster.scheduler();

        assert_eq!(scheduler.tick().await.unwrap().issued, 2);
        assert_eq!(scheduler.tick().await.unwrap().issued, 0);
    }

    #[tokio::test]
    async fn written_off_replicas_are_not_challenged_again() {
        let mut config = Cluster::config(64);
        config.max_fail_streak = 1;
        let cluster = Cluster::with_config(2, 2, config);
        let file = written(&cluster, "a", 10).await;
        let (good, bad) = (&file.slices[0], &file.slices[1]);
        let store = cluster.service(&bad.node_id).store().clone();
        let mut bytes = store.get(BlobKind::Slice, &bad.slice_id).unwrap();
        bytes[3] ^= 0x01;
        store.put(BlobKind::Slice, &bad.slice_id, &bytes).unwrap();

        let scheduler = cluster.scheduler();
        assert_eq!(scheduler.tick().await.unwrap().issued, 2);
        for meta in [good, bad] {
            cluster.prover(&meta.node_id).prove_pending().unwrap();
        }
        assert_eq!(cluster.ledger.fail_streak(&bad.slice_id, &bad.node_id).unwrap(), 1);

        cluster.advance(cluster.ctx.config.challenge_interval + Duration::from_secs(1));
        cluster.heartbeat_all_except(&[]);
        assert_eq!(scheduler.tick().await.unwrap().issued, 1);

        let open = cluster
            .ledger
            .list_challenge_requests(&ListChallengeOptions {
                status: Some(ChallengeStatus::ToProve),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].target_node, good.node_id);
    }

    #[tokio::test]
    async fn tick_respects_the_per_round_cap() {
        let mut config = Cluster::config(64);
        config.challenge_max_per_round = 1;
        let cluster = Cluster::with_config(2, 2, config);
        written(&cluster, "a", 10).await;
        written(&cluster, "b", 10).await;

        assert_eq!(cluster.scheduler().tick().await.unwrap().issued, 1);
    }

    #[tokio::test]
    async fn overdue_challenges_are_failed_by_the_sweep() {
        let cluster = Cluster::new(2, 1, 64);
        written(&cluster, "a", 10).await;
        let scheduler = cluster.scheduler();
        assert_eq!(scheduler.tick().await.unwrap().issued, 1);

        cluster.advance(CoreConfig::default().challenge_timeout + Duration::from_secs(1));
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.timed_out, 1);

        let failed = cluster
            .ledger
            .list_challenge_requests(&ListChallengeOptions {
                status: Some(ChallengeStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn new_round_refreshes_sigmas_before_challenging() {
        let cluster = Cluster::new(2, 1, 64);
        let file = written(&cluster, "a", 10).await;
        let node = node_of(&cluster, &file, 0);

        cluster.advance(CoreConfig::default().pdp_round_period + Duration::from_secs(1));
        let challenge = cluster
            .scheduler()
            .challenge_pairing(&file, &node, &[file.slices[0].slice_id.clone()], &[Scalar::from(3u64)])
            .await
            .unwrap();
        assert_eq!(challenge.round, 1);

        let stored = cluster.service(&node.id).read_sigmas(&file.slices[0].slice_id).unwrap();
        assert_eq!(SigmaBundle::from_bytes(&stored).unwrap().round, 1);

        cluster.prover(&node.id).prove_pending().unwrap();
        let settled = cluster.ledger.get_challenge_by_id(&challenge.id).unwrap();
        assert_eq!(settled.status, ChallengeStatus::Proved);
    }
}
