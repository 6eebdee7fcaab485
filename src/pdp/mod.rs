// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provable data possession.
//!
//! Two schemes share the challenge record shape:
//! - [`pairing`]: BLS12-381 homomorphic authenticators, the default
//! - [`merkle`]: inclusion proofs over ciphertext ranges
//!
//! [`scheduler`] issues challenges and sweeps overdue ones; the storage-node
//! side of the protocol lives in [`crate::node::prover`].

pub mod merkle;
pub mod pairing;
pub mod scheduler;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::nanos;
use crate::error::{Error, Result};
use pairing::{CurveParams, PairingKeys};

/// Challenge scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdpAlgorithm {
    Pairing,
    Merkle,
}

impl PdpAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdpAlgorithm::Pairing => "pairing",
            PdpAlgorithm::Merkle => "merkle",
        }
    }
}

impl fmt::Display for PdpAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdpAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pairing" => Ok(PdpAlgorithm::Pairing),
            "merkle" => Ok(PdpAlgorithm::Merkle),
            other => Err(Error::bad_param(format!("unknown PDP algorithm: {other}"))),
        }
    }
}

/// Authenticator bundle stored next to a slice as `sigmas_of(slice_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigmaBundle {
    pub round: i64,
    /// Logical index `i` the authenticator was computed for.
    pub index: u64,
    /// Hex of the compressed G1 authenticator.
    pub sigma: String,
}

impl SigmaBundle {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::bad_param(format!("invalid sigma bundle: {e}")))
    }

    /// Authenticator of `slice` at logical `index` for `round`.
    pub fn compute(
        keys: &PairingKeys,
        curve: &CurveParams,
        round: i64,
        index: u64,
        slice: &[u8],
    ) -> Result<Self> {
        let r_j = keys.round_randomizer(curve, round)?;
        let sigma = keys.sigma(curve, index, slice, &r_j)?;
        Ok(Self {
            round,
            index,
            sigma: pairing::g1_to_hex(&sigma),
        })
    }
}

/// Side-object identifier of a slice's authenticators.
pub fn sigmas_of(slice_id: &str) -> String {
    format!("{slice_id}.sigmas")
}

/// Round `j` of a file published at `publish_time`, never negative.
pub fn current_round(publish_time: i64, now: i64, period: Duration) -> i64 {
    let period = nanos(period).max(1);
    (now.saturating_sub(publish_time) / period).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_parses_case_insensitively() {
        assert_eq!("Pairing".parse::<PdpAlgorithm>().unwrap(), PdpAlgorithm::Pairing);
        assert_eq!("merkle".parse::<PdpAlgorithm>().unwrap(), PdpAlgorithm::Merkle);
        assert!("rsa".parse::<PdpAlgorithm>().is_err());
    }

    #[test]
    fn round_counts_whole_periods() {
        let period = Duration::from_secs(10);
        let s = 1_000_000_000i64;
        assert_eq!(current_round(0, 0, period), 0);
        assert_eq!(current_round(0, 9 * s, period), 0);
        assert_eq!(current_round(0, 10 * s, period), 1);
        assert_eq!(current_round(0, 35 * s, period), 3);
        assert_eq!(current_round(100 * s, 0, period), 0);
    }

    #[test]
    fn computed_bundle_verifies_as_single_slice_proof() {
        let curve = CurveParams::default();
        let keys = PairingKeys::derive(&crate::crypto::Identity::generate(), &curve).unwrap();
        let slice = b"ciphertext bytes";
        let bundle = SigmaBundle::compute(&keys, &curve, 3, 9, slice).unwrap();
        assert_eq!((bundle.round, bundle.index), (3, 9));

        let r_j = keys.round_randomizer(&curve, 3).unwrap();
        let v = bls12_381::Scalar::from(7u64);
        let input = pairing::ProofInput {
            coefficient: v,
            sigma: pairing::g1_from_hex(&bundle.sigma).unwrap(),
            slice,
        };
        let (sigma, mu) = pairing::prove(&curve, &[input], &r_j);
        assert!(pairing::verify(&curve, &keys.public(), &[9], &[v], &sigma, &mu).unwrap());
    }

    #[test]
    fn sigma_bundle_round_trips() {
        let bundle = SigmaBundle {
            round: 2,
            index: 4,
            sigma: "ab".into(),
        };
        assert_eq!(SigmaBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap(), bundle);
    }
}
