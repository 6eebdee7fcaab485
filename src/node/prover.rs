// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage-node side of PDP: answer every `ToProve` challenge aimed at
//! this node from the slices and sigmas it holds.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NodeService;
use crate::context::CoreContext;
use crate::crypto::Identity;
use crate::error::{ErrorKind, Result};
use crate::ledger::{
    AnswerBody, Challenge, ChallengeAnswer, ChallengeBody, ChallengeStatus, ListChallengeOptions,
    Signed,
};
use crate::pdp::merkle;
use crate::pdp::pairing::{self, ProofInput};
use crate::pdp::SigmaBundle;

pub struct NodeProver {
    identity: Arc<Identity>,
    service: NodeService,
    ctx: CoreContext,
}

impl NodeProver {
    pub fn new(identity: Arc<Identity>, service: NodeService, ctx: CoreContext) -> Self {
        Self {
            identity,
            service,
            ctx,
        }
    }

    /// Compute the proof for one challenge from local storage.
    pub fn answer(&self, challenge: &Challenge) -> Result<ChallengeAnswer> {
        let answer = match &challenge.body {
            ChallengeBody::Pairing(p) => {
                let r_j = pairing::scalar_from_hex(&p.rand_seed)?;
                let mut slices = Vec::with_capacity(challenge.slice_ids.len());
                let mut sigmas = Vec::with_capacity(challenge.slice_ids.len());
                for slice_id in &challenge.slice_ids {
                    slices.push(self.service.read_slice(slice_id)?);
                    let bundle = SigmaBundle::from_bytes(&self.service.read_sigmas(slice_id)?)?;
                    if bundle.round != challenge.round {
                        debug!(
                            slice_id = %slice_id,
                            stored_round = bundle.round,
                            round = challenge.round,
                            "sigmas are from another round"
                        );
                    }
                    sigmas.push(pairing::g1_from_hex(&bundle.sigma)?);
                }
                let inputs = p
                    .vs
                    .iter()
                    .zip(sigmas)
                    .zip(&slices)
                    .map(|((v, sigma), slice)| {
                        Ok(ProofInput {
                            coefficient: pairing::scalar_from_hex(v)?,
                            sigma,
                            slice,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let (sigma, mu) = pairing::prove(&self.ctx.curve, &inputs, &r_j);
                AnswerBody::Pairing {
                    sigma: pairing::g1_to_hex(&sigma),
                    mu: pairing::g1_to_hex(&mu),
                }
            }
            ChallengeBody::Merkle(m) => {
                let range_size = self.ctx.config.merkle_range_size;
                let proofs = m
                    .ranges
                    .iter()
                    .map(|r| {
                        let data = self.service.read_slice(&r.slice_id)?;
                        merkle::prove(&r.slice_id, &data, range_size, r.range_index)
                    })
                    .collect::<Result<Vec<_>>>()?;
                AnswerBody::Merkle { proofs }
            }
        };
        Ok(ChallengeAnswer {
            challenge_id: challenge.id.clone(),
            target_node: self.service.node_id().to_string(),
            answer,
            timestamp: self.ctx.now(),
        })
    }

    /// Answer all open challenges for this node; returns how many were
    /// submitted.
    pub fn prove_pending(&self) -> Result<usize> {
        let opts = ListChallengeOptions {
            target_node: Some(self.service.node_id().to_string()),
            status: Some(ChallengeStatus::ToProve),
            ..Default::default()
        };
        let mut answered = 0;
        for challenge in self.service.ledger().list_challenge_requests(&opts)? {
            let answer = match self.answer(&challenge) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(
                        challenge_id = %challenge.id,
                        file_id = %challenge.file_id,
                        error = %e,
                        "Prover: cannot build proof"
                    );
                    continue;
                }
            };
            match self
                .service
                .ledger()
                .challenge_answer(&Signed::new(&self.identity, answer)?)
            {
                Ok(settled) => {
                    answered += 1;
                    debug!(challenge_id = %settled.id, status = settled.status.as_str(), "Prover: answer submitted");
                }
                Err(e) if e.is(ErrorKind::AlreadyUpdated) => {}
                Err(e) => warn!(challenge_id = %challenge.id, error = %e, "Prover: answer rejected"),
            }
        }
        Ok(answered)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.ctx.config.prove_interval;
        info!(interval_secs = interval.as_secs(), "PDP prover starting");
        loop {
            if let Err(e) = self.prove_pending() {
                warn!(error = %e, "PDP prover: sweep failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!("PDP prover shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::{self, T0};
    use crate::ledger::{MerkleChallenge, MerkleRange, PublicSliceMeta};
    use crate::storage::MemoryBlobStore;
    use crate::transport::PushQuery;

    fn fixture(data: &[u8]) -> (NodeProver, Identity) {
        let (ledger, _) = test_support::ledger();
        let owner = Identity::generate();
        let node = Arc::new(Identity::generate());
        test_support::add_ns(&ledger, &owner, "n", 1);
        test_support::add_node(&ledger, &node);

        let range_size = ledger.context().config.merkle_range_size;
        let meta = PublicSliceMeta {
            merkle_root: Some(merkle::root(data, range_size)),
            length: data.len() as u64,
            ..test_support::slice("s1", &node.node_id(), 0)
        };
        let mut f = test_support::file(&owner, "f1", "a", vec![meta], T0);
        f.length = data.len() as u64;
        ledger.publish_file(&Signed::new(&owner, f).unwrap()).unwrap();

        let service = NodeService::new(
            node.node_id(),
            ledger.clone(),
            Arc::new(MemoryBlobStore::new()),
            ledger.context().clone(),
        );
        let q = PushQuery::sign(&owner, "s1", "f1", data.len() as u64, T0).unwrap();
        service.push_slice(&q, data).unwrap();
        (NodeProver::new(node, service, ledger.context().clone()), owner)
    }

    fn merkle_challenge(prover: &NodeProver, owner: &Identity, id: &str) {
        let c = Challenge {
            id: id.into(),
            file_id: "f1".into(),
            slice_ids: vec!["s1".into()],
            file_owner: owner.public_key(),
            target_node: prover.service.node_id().to_string(),
            round: 0,
            challenge_time: T0,
            answer_time: None,
            status: ChallengeStatus::ToProve,
            body: ChallengeBody::Merkle(MerkleChallenge {
                ranges: vec![MerkleRange {
                    slice_id: "s1".into(),
                    range_index: 1,
                }],
                hash_of_proof: None,
                proofs: None,
            }),
        };
        prover
            .service
            .ledger()
            .challenge_request(&Signed::new(owner, c).unwrap())
            .unwrap();
    }

    #[test]
    fn merkle_challenge_is_answered_and_proved() {
        let (prover, owner) = fixture(&vec![5u8; 3000]);
        merkle_challenge(&prover, &owner, "c1");

        assert_eq!(prover.prove_pending().unwrap(), 1);
        let c = prover.service.ledger().get_challenge_by_id("c1").unwrap();
        assert_eq!(c.status, ChallengeStatus::Proved);

        // Nothing left to answer.
        assert_eq!(prover.prove_pending().unwrap(), 0);
    }

    #[test]
    fn corrupted_slice_fails_merkle_challenge() {
        let (prover, owner) = fixture(&vec![5u8; 3000]);
        let mut data = prover.service.read_slice("s1").unwrap();
        data[1500] ^= 0xff;
        prover
            .service
            .store()
            .put(crate::storage::BlobKind::Slice, "s1", &data)
            .unwrap();
        merkle_challenge(&prover, &owner, "c1");

        prover.prove_pending().unwrap();
        let c = prover.service.ledger().get_challenge_by_id("c1").unwrap();
        assert_eq!(c.status, ChallengeStatus::Failed);
    }

    #[test]
    fn missing_sigmas_leave_pairing_challenge_open() {
        let (prover, owner) = fixture(&vec![1u8; 64]);
        let curve = prover.ctx.curve;
        let keys = pairing::PairingKeys::derive(&owner, &curve).unwrap();
        let r_j = keys.round_randomizer(&curve, 0).unwrap();
        let c = Challenge {
            id: "c2".into(),
            file_id: "f1".into(),
            slice_ids: vec!["s1".into()],
            file_owner: owner.public_key(),
            target_node: prover.service.node_id().to_string(),
            round: 0,
            challenge_time: T0,
            answer_time: None,
            status: ChallengeStatus::ToProve,
            body: ChallengeBody::Pairing(crate::ledger::PairingChallenge {
                indices: vec![0],
                vs: vec![pairing::scalar_to_hex(&bls12_381::Scalar::from(7u64))],
                rand_seed: pairing::scalar_to_hex(&r_j),
                public: keys.public().to_hex(),
                sigma: None,
                mu: None,
            }),
        };
        prover
            .service
            .ledger()
            .challenge_request(&Signed::new(&owner, c).unwrap())
            .unwrap();

        assert_eq!(prover.prove_pending().unwrap(), 0);
        let c = prover.service.ledger().get_challenge_by_id("c2").unwrap();
        assert_eq!(c.status, ChallengeStatus::ToProve);
    }
}
