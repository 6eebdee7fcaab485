// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PDP challenge records and their status transitions.
//!
//! `ToProve → Proved` on a timely valid answer, `ToProve → Failed` on an
//! invalid answer or once `challenge_timeout` has elapsed. Both end states
//! are terminal.

use super::index;
use super::kv::WriteBatch;
use super::models::{
    AnswerBody, Challenge, ChallengeAnswer, ChallengeBody, ChallengeFail, ChallengeStatus, File,
    ListChallengeOptions, MerkleChallenge, PairingChallenge, Signed,
};
use super::Ledger;
use crate::context::nanos;
use crate::crypto::canonical::digest_of;
use crate::error::{Error, Result};
use crate::pdp::merkle::{self, MerkleProof};
use crate::pdp::pairing::{self, PairingPublic};

impl Ledger {
    // ========== Request ==========

    /// `ChallengeRequest`: owner-signed, created `ToProve`.
    pub fn challenge_request(&self, req: &Signed<Challenge>) -> Result<Challenge> {
        let c = &req.payload;
        let file = self.get_file_by_id(&c.file_id)?;
        req.verify(&file.owner)?;

        if c.file_owner != file.owner {
            return Err(Error::bad_param("challenge names the wrong file owner"));
        }
        if c.id.is_empty() || c.slice_ids.is_empty() {
            return Err(Error::bad_param("challenge needs an id and at least one slice"));
        }
        if c.status != ChallengeStatus::ToProve || c.answer_time.is_some() {
            return Err(Error::bad_param("a new challenge must be to_prove"));
        }
        if c.round < 0 {
            return Err(Error::bad_param("round must not be negative"));
        }
        for slice_id in &c.slice_ids {
            if !file.replicas(slice_id).any(|s| s.node_id == c.target_node) {
                return Err(Error::bad_param(format!(
                    "node {} holds no replica of slice {slice_id}",
                    c.target_node
                )));
            }
        }
        match &c.body {
            ChallengeBody::Pairing(p) => {
                if p.indices.len() != c.slice_ids.len() || p.vs.len() != p.indices.len() {
                    return Err(Error::bad_param("indices and coefficients must align with slices"));
                }
                if p.sigma.is_some() || p.mu.is_some() {
                    return Err(Error::bad_param("a new challenge carries no proof"));
                }
            }
            ChallengeBody::Merkle(m) => {
                if m.ranges.is_empty() || m.ranges.iter().any(|r| !c.slice_ids.contains(&r.slice_id)) {
                    return Err(Error::bad_param("merkle ranges must name challenged slices"));
                }
                if m.proofs.is_some() || m.hash_of_proof.is_some() {
                    return Err(Error::bad_param("a new challenge carries no proof"));
                }
            }
        }

        let mut batch = WriteBatch::new();
        batch
            .create(index::challenge(&c.id), Self::encode(c)?)
            .put(index::challenge_by_node(&c.target_node, c.challenge_time, &c.id), Vec::new())
            .put(index::challenge_by_file(&c.file_id, c.challenge_time, &c.id), Vec::new());
        self.commit(batch)?;

        tracing::debug!(
            challenge_id = %c.id,
            file_id = %c.file_id,
            node_id = %c.target_node,
            algorithm = %c.algorithm(),
            "challenge issued"
        );
        Ok(c.clone())
    }

    // ========== Answer ==========

    /// `ChallengeAnswer`: signed by the target node. Late or invalid answers
    /// move the challenge to `Failed`.
    pub fn challenge_answer(&self, req: &Signed<ChallengeAnswer>) -> Result<Challenge> {
        let answer = &req.payload;
        let key = index::challenge(&answer.challenge_id);
        let (mut challenge, raw) =
            self.require::<Challenge>(&key, &format!("challenge {}", answer.challenge_id))?;

        if challenge.target_node != answer.target_node {
            return Err(Error::bad_param("answer is not from the challenged node"));
        }
        let node = self.get_node(&challenge.target_node)?;
        req.verify(&node.public_key()?)?;

        if challenge.status.is_terminal() {
            return Err(Error::already_updated(format!(
                "challenge {} is already {}",
                challenge.id,
                challenge.status.as_str()
            )));
        }

        let now = self.now();
        let late = challenge.is_overdue(now, nanos(self.ctx.config.challenge_timeout));
        let valid = match (&mut challenge.body, &answer.answer) {
            (ChallengeBody::Pairing(p), AnswerBody::Pairing { sigma, mu }) => {
                let ok = !late && self.check_pairing(p, sigma, mu);
                p.sigma = Some(sigma.clone());
                p.mu = Some(mu.clone());
                ok
            }
            (ChallengeBody::Merkle(m), AnswerBody::Merkle { proofs }) => {
                let file = self.get_file_by_id(&challenge.file_id)?;
                let ok = !late && check_merkle(&file, &challenge.target_node, m, proofs);
                m.hash_of_proof = Some(digest_of(proofs));
                m.proofs = Some(proofs.clone());
                ok
            }
            _ => return Err(Error::bad_param("answer scheme does not match the challenge")),
        };

        challenge.status = if valid {
            ChallengeStatus::Proved
        } else {
            ChallengeStatus::Failed
        };
        challenge.answer_time = Some(now);

        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), Some(raw)).put(key, Self::encode(&challenge)?);
        self.commit(batch)?;

        if valid {
            tracing::info!(challenge_id = %challenge.id, node_id = %challenge.target_node, "challenge proved");
        } else {
            tracing::warn!(
                challenge_id = %challenge.id,
                node_id = %challenge.target_node,
                file_id = %challenge.file_id,
                late,
                "challenge failed"
            );
        }
        Ok(challenge)
    }

    fn check_pairing(&self, p: &PairingChallenge, sigma: &str, mu: &str) -> bool {
        let result = (|| -> Result<bool> {
            let public = PairingPublic::from_hex(&p.public)?;
            let coefficients = p
                .vs
                .iter()
                .map(|v| pairing::scalar_from_hex(v))
                .collect::<Result<Vec<_>>>()?;
            let sigma = pairing::g1_from_hex(sigma)?;
            let mu = pairing::g1_from_hex(mu)?;
            pairing::verify(&self.ctx.curve, &public, &p.indices, &coefficients, &sigma, &mu)
        })();
        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "malformed pairing proof");
            false
        })
    }

    // ========== Timeout ==========

    /// `ChallengeFail`: the file owner fails an overdue challenge.
    pub fn challenge_fail(&self, req: &Signed<ChallengeFail>) -> Result<Challenge> {
        let key = index::challenge(&req.payload.challenge_id);
        let (mut challenge, raw) =
            self.require::<Challenge>(&key, &format!("challenge {}", req.payload.challenge_id))?;
        req.verify(&challenge.file_owner)?;

        if challenge.status.is_terminal() {
            return Err(Error::already_updated(format!("challenge {} already settled", challenge.id)));
        }
        if !challenge.is_overdue(self.now(), nanos(self.ctx.config.challenge_timeout)) {
            return Err(Error::bad_param("challenge is not overdue"));
        }

        challenge.status = ChallengeStatus::Failed;
        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), Some(raw)).put(key, Self::encode(&challenge)?);
        self.commit(batch)?;

        tracing::warn!(challenge_id = %challenge.id, node_id = %challenge.target_node, "challenge timed out");
        Ok(challenge)
    }

    // ========== Queries ==========

    /// `GetChallengeByID`.
    pub fn get_challenge_by_id(&self, id: &str) -> Result<Challenge> {
        Ok(self.require(&index::challenge(id), &format!("challenge {id}"))?.0)
    }

    /// `ListChallengeRequests`: newest first.
    pub fn list_challenge_requests(&self, opts: &ListChallengeOptions) -> Result<Vec<Challenge>> {
        let prefix = match (&opts.target_node, &opts.file_id) {
            (Some(node), _) => index::challenge_by_node_prefix(node),
            (None, Some(file)) => index::challenge_by_file_prefix(file),
            (None, None) => return self.list_all_challenges(opts),
        };

        let limit = opts.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (key, _) in self.scan(&prefix)? {
            if out.len() >= limit {
                break;
            }
            let parts = index::decompose(&key);
            let (Some(time), Some(id)) = (parts.get(2).and_then(|t| index::parse_desc_time(t)), parts.get(3))
            else {
                continue;
            };
            if opts.to.is_some_and(|to| time >= to) {
                continue;
            }
            if opts.from.is_some_and(|from| time < from) {
                break;
            }
            if let Some(challenge) = self.load::<Challenge>(&index::challenge(id))? {
                if opts.matches(&challenge) {
                    out.push(challenge);
                }
            }
        }
        Ok(out)
    }

    fn list_all_challenges(&self, opts: &ListChallengeOptions) -> Result<Vec<Challenge>> {
        let mut all: Vec<Challenge> = self
            .scan_values::<Challenge>(&index::challenge_prefix())?
            .into_iter()
            .filter(|c| opts.matches(c))
            .collect();
        all.sort_by(|a, b| b.challenge_time.cmp(&a.challenge_time).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = opts.limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    /// `GetChallengeNum`: count of challenges matching `opts`, ignoring `limit`.
    pub fn get_challenge_num(&self, opts: &ListChallengeOptions) -> Result<usize> {
        let opts = ListChallengeOptions {
            limit: None,
            ..opts.clone()
        };
        Ok(self.list_challenge_requests(&opts)?.len())
    }

    /// Time `node_id` was last challenged.
    pub fn last_challenged_node(&self, node_id: &str) -> Result<Option<i64>> {
        self.first_index_time(&index::challenge_by_node_prefix(node_id))
    }

    /// Time any replica of `file_id` was last challenged.
    pub fn last_challenged_file(&self, file_id: &str) -> Result<Option<i64>> {
        self.first_index_time(&index::challenge_by_file_prefix(file_id))
    }

    fn first_index_time(&self, prefix: &[u8]) -> Result<Option<i64>> {
        let entries = self.scan(prefix)?;
        Ok(entries
            .first()
            .and_then(|(key, _)| index::decompose(key).get(2).and_then(|t| index::parse_desc_time(t))))
    }

    /// Consecutive `Failed` challenges covering `slice_id` on `node_id`,
    /// counted back from the most recent settled one.
    pub fn fail_streak(&self, slice_id: &str, node_id: &str) -> Result<usize> {
        let opts = ListChallengeOptions {
            target_node: Some(node_id.to_string()),
            ..Default::default()
        };
        let mut streak = 0;
        for c in self.list_challenge_requests(&opts)? {
            if !c.slice_ids.iter().any(|s| s == slice_id) {
                continue;
            }
            match c.status {
                ChallengeStatus::ToProve => continue,
                ChallengeStatus::Failed => streak += 1,
                ChallengeStatus::Proved => break,
            }
        }
        Ok(streak)
    }
}

/// Every challenged range must be answered by a proof that reaches the
/// replica's recorded Merkle root.
fn check_merkle(file: &File, target_node: &str, challenge: &MerkleChallenge, proofs: &[MerkleProof]) -> bool {
    challenge.ranges.iter().all(|range| {
        let Some(root) = file
            .replicas(&range.slice_id)
            .find(|s| s.node_id == target_node)
            .and_then(|s| s.merkle_root.as_deref())
        else {
            return false;
        };
        proofs
            .iter()
            .find(|p| p.slice_id == range.slice_id && p.range_index == range.range_index)
            .is_some_and(|p| merkle::verify(p, root).unwrap_or(false))
    })
}
