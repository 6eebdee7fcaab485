// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Records
//!
//! Records persisted on the ledger and the signed payloads that create or
//! update them. Every payload implements [`CanonicalQuery`]; the ledger
//! verifies a [`Signed`] wrapper against the party allowed to act.
//!
//! ## Record Categories
//!
//! - **Files**: [`File`], [`PublicSliceMeta`], [`SliceMigrateRecord`], [`MigrationPending`]
//! - **Namespaces**: [`Namespace`]
//! - **Nodes**: [`Node`]
//! - **Challenges**: [`Challenge`] with a tagged [`ChallengeBody`]
//! - **Authorizations**: [`FileAuthApplication`]

use serde::{Deserialize, Serialize};

use crate::crypto::canonical::{digest_of, opt, CanonicalQuery};
use crate::crypto::{Identity, PublicKey, Signature};
use crate::error::{Error, Result};
use crate::pdp::merkle::MerkleProof;
use crate::pdp::pairing::PairingPublicHex;
use crate::pdp::PdpAlgorithm;

// =============================================================================
// Signed wrapper
// =============================================================================

/// A payload plus the detached signature over its canonical query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub payload: T,
    pub signature: Signature,
}

impl<T: CanonicalQuery> Signed<T> {
    pub fn new(identity: &Identity, payload: T) -> Result<Self> {
        let signature = identity.sign(&payload)?;
        Ok(Self { payload, signature })
    }

    /// Verify that `signer` produced this signature; signer mismatch is
    /// `Unauthorized`.
    pub fn verify(&self, signer: &PublicKey) -> Result<()> {
        signer
            .verify(&self.payload, &self.signature)
            .map_err(|e| Error::unauthorized(format!("signature check failed: {}", e.message)))
    }
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

// =============================================================================
// Files
// =============================================================================

/// Placement of one replica of one logical slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSliceMeta {
    pub slice_id: String,
    pub node_id: String,
    /// Hex SHA-256 of the replica ciphertext.
    pub cipher_hash: String,
    /// Ciphertext length.
    pub length: u64,
    /// Position of the logical slice in the file structure.
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigmas_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdp_index: Option<u64>,
    /// Hex Merkle root over the replica ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
}

impl CanonicalQuery for PublicSliceMeta {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("slice_id", self.slice_id.clone()),
            ("node_id", self.node_id.clone()),
            ("cipher_hash", self.cipher_hash.clone()),
            ("length", self.length.to_string()),
            ("index", self.index.to_string()),
            ("sigmas_id", opt(&self.sigmas_id)),
            ("pdp_index", opt(&self.pdp_index)),
            ("merkle_root", opt(&self.merkle_root)),
        ]
    }
}

/// File record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub owner: PublicKey,
    pub namespace: String,
    pub name: String,
    /// Plaintext length.
    pub length: u64,
    pub publish_time: i64,
    pub expire_time: i64,
    pub description: String,
    pub ext: String,
    /// Structure sealed under the file key.
    #[serde(with = "hex::serde")]
    pub structure: Vec<u8>,
    pub slices: Vec<PublicSliceMeta>,
}

impl File {
    /// Replicas of one logical slice.
    pub fn replicas<'a>(&'a self, slice_id: &'a str) -> impl Iterator<Item = &'a PublicSliceMeta> + 'a {
        self.slices.iter().filter(move |s| s.slice_id == slice_id)
    }

    /// Distinct logical slice ids, in first-seen order.
    pub fn slice_ids(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        self.slices
            .iter()
            .filter(|s| seen.insert(s.slice_id.clone()))
            .map(|s| s.slice_id.clone())
            .collect()
    }

    /// Distinct nodes holding any replica.
    pub fn node_ids(&self) -> Vec<String> {
        let set: std::collections::BTreeSet<_> = self.slices.iter().map(|s| s.node_id.clone()).collect();
        set.into_iter().collect()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_time <= now
    }
}

impl CanonicalQuery for File {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("owner", self.owner.to_hex()),
            ("namespace", self.namespace.clone()),
            ("name", self.name.clone()),
            ("length", self.length.to_string()),
            ("publish_time", self.publish_time.to_string()),
            ("expire_time", self.expire_time.to_string()),
            ("description", self.description.clone()),
            ("ext", self.ext.clone()),
            ("structure", hex::encode(&self.structure)),
            ("slices", digest_of(&self.slices)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateExpireTime {
    pub file_id: String,
    pub expire_time: i64,
    pub timestamp: i64,
}

impl CanonicalQuery for UpdateExpireTime {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("file_id", self.file_id.clone()),
            ("expire_time", self.expire_time.to_string()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// Replace the replica set of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFileSlices {
    pub file_id: String,
    pub slices: Vec<PublicSliceMeta>,
    pub timestamp: i64,
}

impl CanonicalQuery for UpdateFileSlices {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("file_id", self.file_id.clone()),
            ("slices", digest_of(&self.slices)),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// Audit record of one replica moved between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceMigrateRecord {
    pub file_id: String,
    pub slice_id: String,
    pub from_node: String,
    pub to_node: String,
    pub ctime: i64,
}

impl CanonicalQuery for SliceMigrateRecord {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("file_id", self.file_id.clone()),
            ("slice_id", self.slice_id.clone()),
            ("from_node", self.from_node.clone()),
            ("to_node", self.to_node.clone()),
            ("ctime", self.ctime.to_string()),
        ]
    }
}

/// A migration that needs the file key and was deferred to the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPending {
    pub file_id: String,
    pub slice_id: String,
    pub owner: PublicKey,
    pub from_node: String,
    pub reporter: PublicKey,
    pub reason: String,
    pub ctime: i64,
}

impl CanonicalQuery for MigrationPending {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("file_id", self.file_id.clone()),
            ("slice_id", self.slice_id.clone()),
            ("owner", self.owner.to_hex()),
            ("from_node", self.from_node.clone()),
            ("reporter", self.reporter.to_hex()),
            ("reason", self.reason.clone()),
            ("ctime", self.ctime.to_string()),
        ]
    }
}

/// Filter for `ListFiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFileOptions {
    pub owner: PublicKey,
    pub namespace: Option<String>,
    /// Inclusive lower bound on `publish_time`.
    pub from: Option<i64>,
    /// Exclusive upper bound on `publish_time`.
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

impl ListFileOptions {
    pub fn owner(owner: PublicKey) -> Self {
        Self {
            owner,
            namespace: None,
            from: None,
            to: None,
            limit: None,
        }
    }
}

// =============================================================================
// Namespaces
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub owner: PublicKey,
    pub name: String,
    pub replica: u32,
    pub file_total_num: u64,
    pub create_time: i64,
    pub update_time: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNamespace {
    pub owner: PublicKey,
    pub name: String,
    pub replica: u32,
    pub description: String,
    pub timestamp: i64,
}

impl CanonicalQuery for AddNamespace {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("owner", self.owner.to_hex()),
            ("name", self.name.clone()),
            ("replica", self.replica.to_string()),
            ("description", self.description.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNsReplica {
    pub owner: PublicKey,
    pub name: String,
    pub replica: u32,
    pub timestamp: i64,
}

impl CanonicalQuery for UpdateNsReplica {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("owner", self.owner.to_hex()),
            ("name", self.name.clone()),
            ("replica", self.replica.to_string()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Hex public key.
    pub id: String,
    pub name: String,
    /// Base URL of the node's blob API.
    pub address: String,
    /// Explicit online flag; see [`Node::is_online`].
    pub online: bool,
    pub reg_time: i64,
    /// Last heartbeat or status change.
    pub update_at: i64,
}

impl Node {
    /// Online when flagged so and heard from within `heartbeat_timeout`.
    pub fn is_online(&self, now: i64, heartbeat_timeout: i64) -> bool {
        self.online && now.saturating_sub(self.update_at) <= heartbeat_timeout
    }

    /// Time since the node was last heard from.
    pub fn silent_for(&self, now: i64) -> i64 {
        now.saturating_sub(self.update_at).max(0)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_hex(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub timestamp: i64,
}

impl CanonicalQuery for NodeRegistration {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("name", self.name.clone()),
            ("address", self.address.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// `NodeOnline` / `NodeOffline` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusChange {
    pub node_id: String,
    pub online: bool,
    pub timestamp: i64,
}

impl CanonicalQuery for NodeStatusChange {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("node_id", self.node_id.clone()),
            ("online", self.online.to_string()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub timestamp: i64,
}

impl CanonicalQuery for Heartbeat {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("node_id", self.node_id.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

// =============================================================================
// Challenges
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    ToProve,
    Proved,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::ToProve => "to_prove",
            ChallengeStatus::Proved => "proved",
            ChallengeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChallengeStatus::ToProve)
    }
}

/// One challenged Merkle range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRange {
    pub slice_id: String,
    pub range_index: u64,
}

/// Pairing challenge parameters and, once answered, the proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    /// Logical index of each challenged slice, aligned with `slice_ids`.
    pub indices: Vec<u64>,
    /// Hex scalar coefficients, aligned with `indices`.
    pub vs: Vec<String>,
    /// Hex of the round randomizer `r_j`.
    pub rand_seed: String,
    pub public: PairingPublicHex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleChallenge {
    pub ranges: Vec<MerkleRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_of_proof: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proofs: Option<Vec<MerkleProof>>,
}

/// Scheme-specific challenge fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ChallengeBody {
    Pairing(PairingChallenge),
    Merkle(MerkleChallenge),
}

impl ChallengeBody {
    pub fn algorithm(&self) -> PdpAlgorithm {
        match self {
            ChallengeBody::Pairing(_) => PdpAlgorithm::Pairing,
            ChallengeBody::Merkle(_) => PdpAlgorithm::Merkle,
        }
    }

    /// Request-time fields only; proofs are signed by the answer.
    fn request_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            ChallengeBody::Pairing(p) => vec![
                ("indices", join(&p.indices)),
                ("vs", join(&p.vs)),
                ("rand_seed", p.rand_seed.clone()),
                ("pdp_pubkey", p.public.pk.clone()),
                ("u", p.public.u.clone()),
                ("v", p.public.v.clone()),
            ],
            ChallengeBody::Merkle(m) => vec![(
                "ranges",
                m.ranges
                    .iter()
                    .map(|r| format!("{}:{}", r.slice_id, r.range_index))
                    .collect::<Vec<_>>()
                    .join(","),
            )],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub file_id: String,
    pub slice_ids: Vec<String>,
    pub file_owner: PublicKey,
    pub target_node: String,
    pub round: i64,
    pub challenge_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_time: Option<i64>,
    pub status: ChallengeStatus,
    pub body: ChallengeBody,
}

impl Challenge {
    pub fn algorithm(&self) -> PdpAlgorithm {
        self.body.algorithm()
    }

    pub fn is_overdue(&self, now: i64, timeout: i64) -> bool {
        self.status == ChallengeStatus::ToProve && now.saturating_sub(self.challenge_time) > timeout
    }
}

impl CanonicalQuery for Challenge {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("id", self.id.clone()),
            ("file_id", self.file_id.clone()),
            ("slice_ids", self.slice_ids.join(",")),
            ("file_owner", self.file_owner.to_hex()),
            ("target_node", self.target_node.clone()),
            ("round", self.round.to_string()),
            ("challenge_time", self.challenge_time.to_string()),
            ("algorithm", self.algorithm().to_string()),
        ];
        pairs.extend(self.body.request_pairs());
        pairs
    }
}

/// Prover's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AnswerBody {
    Pairing { sigma: String, mu: String },
    Merkle { proofs: Vec<MerkleProof> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeAnswer {
    pub challenge_id: String,
    pub target_node: String,
    pub answer: AnswerBody,
    pub timestamp: i64,
}

impl CanonicalQuery for ChallengeAnswer {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("challenge_id", self.challenge_id.clone()),
            ("target_node", self.target_node.clone()),
            ("timestamp", self.timestamp.to_string()),
        ];
        match &self.answer {
            AnswerBody::Pairing { sigma, mu } => {
                pairs.push(("algorithm", PdpAlgorithm::Pairing.to_string()));
                pairs.push(("sigma", sigma.clone()));
                pairs.push(("mu", mu.clone()));
            }
            AnswerBody::Merkle { proofs } => {
                pairs.push(("algorithm", PdpAlgorithm::Merkle.to_string()));
                pairs.push(("proofs", digest_of(proofs)));
            }
        }
        pairs
    }
}

/// Owner-signed request to fail an overdue challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeFail {
    pub challenge_id: String,
    pub timestamp: i64,
}

impl CanonicalQuery for ChallengeFail {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("challenge_id", self.challenge_id.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// Filter for `ListChallengeRequests` and `GetChallengeNum`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChallengeOptions {
    pub target_node: Option<String>,
    pub file_id: Option<String>,
    pub status: Option<ChallengeStatus>,
    /// Inclusive lower bound on `challenge_time`.
    pub from: Option<i64>,
    /// Exclusive upper bound on `challenge_time`.
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

impl ListChallengeOptions {
    pub fn matches(&self, c: &Challenge) -> bool {
        self.target_node.as_ref().is_none_or(|n| *n == c.target_node)
            && self.file_id.as_ref().is_none_or(|f| *f == c.file_id)
            && self.status.is_none_or(|s| s == c.status)
            && self.from.is_none_or(|t| c.challenge_time >= t)
            && self.to.is_none_or(|t| c.challenge_time < t)
    }
}

// =============================================================================
// Authorizations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unapproved,
    Approved,
    Rejected,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Unapproved => "unapproved",
            AuthStatus::Approved => "approved",
            AuthStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthStatus::Unapproved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAuthApplication {
    pub id: String,
    pub file_id: String,
    pub applier: PublicKey,
    pub authorizer: PublicKey,
    pub name: String,
    pub description: String,
    pub status: AuthStatus,
    /// Hex ECIES envelope to `applier`, present once approved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    pub create_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<i64>,
}

impl FileAuthApplication {
    /// Approved and not yet expired.
    pub fn is_effective(&self, now: i64) -> bool {
        self.status == AuthStatus::Approved && self.expire_time.is_some_and(|e| e > now)
    }
}

impl CanonicalQuery for FileAuthApplication {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("file_id", self.file_id.clone()),
            ("applier", self.applier.to_hex()),
            ("authorizer", self.authorizer.to_hex()),
            ("name", self.name.clone()),
            ("description", self.description.clone()),
            ("status", self.status.as_str().to_string()),
            ("auth_key", opt(&self.auth_key)),
            ("reject_reason", opt(&self.reject_reason)),
            ("create_time", self.create_time.to_string()),
            ("approval_time", opt(&self.approval_time)),
            ("expire_time", opt(&self.expire_time)),
        ]
    }
}

/// `ConfirmFileAuthApplication` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmFileAuth {
    pub application_id: String,
    pub status: AuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    pub timestamp: i64,
}

impl CanonicalQuery for ConfirmFileAuth {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("application_id", self.application_id.clone()),
            ("status", self.status.as_str().to_string()),
            ("expire_time", opt(&self.expire_time)),
            ("auth_key", opt(&self.auth_key)),
            ("reject_reason", opt(&self.reject_reason)),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// `RejectFileAuthApplication` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectFileAuth {
    pub application_id: String,
    pub reject_reason: String,
    pub timestamp: i64,
}

impl CanonicalQuery for RejectFileAuth {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("application_id", self.application_id.clone()),
            ("reject_reason", self.reject_reason.clone()),
            ("timestamp", self.timestamp.to_string()),
        ]
    }
}

/// Filter for `ListFileAuthApplications`; at least one party must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFileAuthOptions {
    pub applier: Option<PublicKey>,
    pub authorizer: Option<PublicKey>,
    pub file_id: Option<String>,
    pub status: Option<AuthStatus>,
    pub limit: Option<usize>,
}

impl ListFileAuthOptions {
    pub fn matches(&self, a: &FileAuthApplication) -> bool {
        self.applier.is_none_or(|p| p == a.applier)
            && self.authorizer.is_none_or(|p| p == a.authorizer)
            && self.file_id.as_ref().is_none_or(|f| *f == a.file_id)
            && self.status.is_none_or(|s| s == a.status)
    }
}
