// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pairing-based provable data possession over BLS12-381.
//!
//! Per owner: `sk`, `pk = sk·G2` and the scalars `U`, `V`, all derived from
//! the owner's identity. For slice `m_i` at logical index `i` in round `j`:
//!
//! ```text
//! r_j = H_int(j·sk·G1)
//! h_i = H(m_i ‖ r_j)
//! σ_i = sk·(H_G1(H(V ‖ i)) + h_i·U·G1)
//! ```
//!
//! A prover answers coefficients `{v_i}` with `σ = Σ v_i·σ_i` and
//! `μ = (Σ v_i·h_i)·G1`; the verifier checks
//! `e(σ, G2) == e(Σ v_i·H_G1(H(V ‖ i)) + U·μ, pk)`.

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::keys::kdf;
use crate::crypto::Identity;
use crate::error::{Error, Result};

pub const G1_COMPRESSED_LEN: usize = 48;
pub const G2_COMPRESSED_LEN: usize = 96;

const HASH_TO_G1_DST: &[u8] = b"dstore-pdp-h2g1";
const MAX_HASH_ATTEMPTS: u32 = 1024;

/// Group generators shared by every PDP computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveParams {
    pub g1: G1Affine,
    pub g2: G2Affine,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            g1: G1Affine::generator(),
            g2: G2Affine::generator(),
        }
    }
}

// ========== Hashing ==========

fn wide_scalar(digest: &[u8]) -> Scalar {
    let mut wide = [0u8; 64];
    let n = digest.len().min(64);
    wide[..n].copy_from_slice(&digest[..n]);
    Scalar::from_bytes_wide(&wide)
}

/// Hash arbitrary bytes to a scalar modulo `r`.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    wide_scalar(&Sha256::digest(data))
}

/// `H_int`: hash a G1 point to a scalar.
pub fn hash_point(point: &G1Affine) -> Scalar {
    hash_to_scalar(&point.to_compressed())
}

/// `H_G1`: try-and-increment hash onto the prime-order subgroup of G1.
pub fn hash_to_g1(data: &[u8]) -> Result<G1Affine> {
    for attempt in 0..MAX_HASH_ATTEMPTS {
        let mut candidate = [0u8; G1_COMPRESSED_LEN];
        for (block, chunk) in candidate.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(HASH_TO_G1_DST);
            hasher.update(attempt.to_be_bytes());
            hasher.update([block as u8]);
            hasher.update(data);
            let digest = hasher.finalize();
            chunk.copy_from_slice(&digest[..chunk.len()]);
        }
        // Compressed form, not infinity; the sort bit stays random.
        candidate[0] = (candidate[0] & 0x3f) | 0x80;

        let decoded: Option<G1Affine> = G1Affine::from_compressed_unchecked(&candidate).into();
        if let Some(point) = decoded {
            let cleared = G1Projective::from(point).clear_cofactor();
            if !bool::from(cleared.is_identity()) {
                return Ok(G1Affine::from(cleared));
            }
        }
    }
    Err(Error::crypto("hash_to_g1 exhausted attempts"))
}

/// `H(m_i ‖ r_j)`.
pub fn slice_hash(slice: &[u8], r_j: &Scalar) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(slice);
    hasher.update(r_j.to_bytes());
    wide_scalar(&hasher.finalize())
}

/// `H_G1(H(V ‖ i))`.
pub fn index_point(v: &Scalar, index: u64) -> Result<G1Affine> {
    let mut hasher = Sha256::new();
    hasher.update(v.to_bytes());
    hasher.update(index.to_be_bytes());
    hash_to_g1(&hasher.finalize())
}

/// Scalar for a signed round number. Rounds are never negative.
pub fn round_scalar(round: i64) -> Result<Scalar> {
    let round = u64::try_from(round).map_err(|_| Error::bad_param("round must be non-negative"))?;
    Ok(Scalar::from(round))
}

/// Uniformly random scalar, used for challenge coefficients.
pub fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    Scalar::from_bytes_wide(&wide)
}

// ========== Encoding ==========

pub fn scalar_to_hex(s: &Scalar) -> String {
    hex::encode(s.to_bytes())
}

pub fn scalar_from_hex(s: &str) -> Result<Scalar> {
    let bytes: [u8; 32] = hex::decode(s)
        .map_err(|e| Error::bad_param(format!("invalid scalar hex: {e}")))?
        .try_into()
        .map_err(|_| Error::bad_param("scalar must be 32 bytes"))?;
    Option::from(Scalar::from_bytes(&bytes)).ok_or_else(|| Error::bad_param("scalar out of range"))
}

pub fn g1_to_hex(p: &G1Affine) -> String {
    hex::encode(p.to_compressed())
}

pub fn g1_from_hex(s: &str) -> Result<G1Affine> {
    let bytes: [u8; G1_COMPRESSED_LEN] = hex::decode(s)
        .map_err(|e| Error::bad_param(format!("invalid G1 hex: {e}")))?
        .try_into()
        .map_err(|_| Error::bad_param("G1 point must be 48 bytes"))?;
    Option::from(G1Affine::from_compressed(&bytes)).ok_or_else(|| Error::crypto("invalid G1 point"))
}

pub fn g2_to_hex(p: &G2Affine) -> String {
    hex::encode(p.to_compressed())
}

pub fn g2_from_hex(s: &str) -> Result<G2Affine> {
    let bytes: [u8; G2_COMPRESSED_LEN] = hex::decode(s)
        .map_err(|e| Error::bad_param(format!("invalid G2 hex: {e}")))?
        .try_into()
        .map_err(|_| Error::bad_param("G2 point must be 96 bytes"))?;
    Option::from(G2Affine::from_compressed(&bytes)).ok_or_else(|| Error::crypto("invalid G2 point"))
}

// ========== Keys ==========

fn derive_scalar(owner: &Identity, label: &str) -> Result<Scalar> {
    let mut wide = [0u8; 64];
    kdf(&owner.secret_bytes(), label, b"bls12-381", &mut wide)?;
    let scalar = Scalar::from_bytes_wide(&wide);
    if scalar == Scalar::zero() {
        return Err(Error::crypto("derived PDP scalar is zero"));
    }
    Ok(scalar)
}

/// Verification material published with every pairing challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingPublic {
    pub pk: G2Affine,
    pub u: Scalar,
    pub v: Scalar,
}

/// Hex form of [`PairingPublic`] as it is stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPublicHex {
    pub pk: String,
    pub u: String,
    pub v: String,
}

impl PairingPublic {
    pub fn to_hex(&self) -> PairingPublicHex {
        PairingPublicHex {
            pk: g2_to_hex(&self.pk),
            u: scalar_to_hex(&self.u),
            v: scalar_to_hex(&self.v),
        }
    }

    pub fn from_hex(h: &PairingPublicHex) -> Result<Self> {
        Ok(Self {
            pk: g2_from_hex(&h.pk)?,
            u: scalar_from_hex(&h.u)?,
            v: scalar_from_hex(&h.v)?,
        })
    }
}

/// An owner's PDP key material.
#[derive(Clone)]
pub struct PairingKeys {
    sk: Scalar,
    public: PairingPublic,
}

impl std::fmt::Debug for PairingKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingKeys")
            .field("pk", &g2_to_hex(&self.public.pk))
            .finish()
    }
}

impl PairingKeys {
    /// Derive the owner's PDP keys from their identity.
    pub fn derive(owner: &Identity, curve: &CurveParams) -> Result<Self> {
        let sk = derive_scalar(owner, "pdp-sk")?;
        let u = derive_scalar(owner, "pdp-u")?;
        let v = derive_scalar(owner, "pdp-v")?;
        let pk = G2Affine::from(G2Projective::from(curve.g2) * sk);
        Ok(Self {
            sk,
            public: PairingPublic { pk, u, v },
        })
    }

    pub fn public(&self) -> PairingPublic {
        self.public
    }

    /// `r_j = H_int(j·sk·G1)`.
    pub fn round_randomizer(&self, curve: &CurveParams, round: i64) -> Result<Scalar> {
        let j = round_scalar(round)?;
        let point = G1Affine::from(G1Projective::from(curve.g1) * (j * self.sk));
        Ok(hash_point(&point))
    }

    /// Authenticator `σ_i` for one slice.
    pub fn sigma(
        &self,
        curve: &CurveParams,
        index: u64,
        slice: &[u8],
        r_j: &Scalar,
    ) -> Result<G1Affine> {
        let h = slice_hash(slice, r_j);
        let base = G1Projective::from(index_point(&self.public.v, index)?)
            + G1Projective::from(curve.g1) * (h * self.public.u);
        Ok(G1Affine::from(base * self.sk))
    }
}

// ========== Prove / verify ==========

/// One challenged slice as the prover sees it.
pub struct ProofInput<'a> {
    pub coefficient: Scalar,
    pub sigma: G1Affine,
    pub slice: &'a [u8],
}

/// Aggregate `(σ, μ)` over the challenged slices.
pub fn prove(curve: &CurveParams, inputs: &[ProofInput<'_>], r_j: &Scalar) -> (G1Affine, G1Affine) {
    let mut sigma = G1Projective::identity();
    let mut mu_scalar = Scalar::zero();
    for input in inputs {
        sigma += G1Projective::from(input.sigma) * input.coefficient;
        mu_scalar += input.coefficient * slice_hash(input.slice, r_j);
    }
    let mu = G1Projective::from(curve.g1) * mu_scalar;
    (G1Affine::from(sigma), G1Affine::from(mu))
}

/// Check an aggregate proof against the owner's public material.
pub fn verify(
    curve: &CurveParams,
    public: &PairingPublic,
    indices: &[u64],
    coefficients: &[Scalar],
    sigma: &G1Affine,
    mu: &G1Affine,
) -> Result<bool> {
    if indices.len() != coefficients.len() || indices.is_empty() {
        return Err(Error::bad_param("indices and coefficients must be non-empty and aligned"));
    }
    let mut rhs = G1Projective::from(*mu) * public.u;
    for (index, v_i) in indices.iter().zip(coefficients) {
        rhs += G1Projective::from(index_point(&public.v, *index)?) * v_i;
    }
    let lhs = pairing(sigma, &curve.g2);
    let rhs = pairing(&G1Affine::from(rhs), &public.pk);
    Ok(lhs == rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (CurveParams, PairingKeys) {
        let curve = CurveParams::default();
        let keys = PairingKeys::derive(&Identity::generate(), &curve).unwrap();
        (curve, keys)
    }

    #[test]
    fn hash_to_g1_is_deterministic_and_in_subgroup() {
        let a = hash_to_g1(b"abc").unwrap();
        assert_eq!(a, hash_to_g1(b"abc").unwrap());
        assert_ne!(a, hash_to_g1(b"abd").unwrap());
        assert!(bool::from(a.is_torsion_free()));
        assert!(bool::from(a.is_on_curve()));
    }

    #[test]
    fn keys_are_deterministic_per_owner() {
        let curve = CurveParams::default();
        let owner = Identity::generate();
        let a = PairingKeys::derive(&owner, &curve).unwrap();
        let b = PairingKeys::derive(&owner, &curve).unwrap();
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn single_slice_proof_with_coefficient_seven_verifies() {
        let (curve, keys) = setup();
        let r_j = keys.round_randomizer(&curve, 0).unwrap();
        let slice = b"ciphertext bytes of one slice";
        let sigma_i = keys.sigma(&curve, 0, slice, &r_j).unwrap();

        let v = Scalar::from(7u64);
        let (sigma, mu) = prove(
            &curve,
            &[ProofInput {
                coefficient: v,
                sigma: sigma_i,
                slice,
            }],
            &r_j,
        );
        assert!(verify(&curve, &keys.public(), &[0], &[v], &sigma, &mu).unwrap());
    }

    #[test]
    fn aggregated_proof_over_several_slices_verifies() {
        let (curve, keys) = setup();
        let r_j = keys.round_randomizer(&curve, 3).unwrap();
        let slices: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 64]).collect();
        let coefficients: Vec<Scalar> = (0..3).map(|_| random_scalar()).collect();

        let inputs: Vec<ProofInput<'_>> = slices
            .iter()
            .enumerate()
            .map(|(i, s)| ProofInput {
                coefficient: coefficients[i],
                sigma: keys.sigma(&curve, i as u64, s, &r_j).unwrap(),
                slice: s,
            })
            .collect();
        let (sigma, mu) = prove(&curve, &inputs, &r_j);
        assert!(verify(&curve, &keys.public(), &[0, 1, 2], &coefficients, &sigma, &mu).unwrap());
    }

    #[test]
    fn corrupted_slice_fails_verification() {
        let (curve, keys) = setup();
        let r_j = keys.round_randomizer(&curve, 1).unwrap();
        let slice = vec![42u8; 128];
        let sigma_i = keys.sigma(&curve, 5, &slice, &r_j).unwrap();

        let mut corrupted = slice.clone();
        corrupted[17] ^= 0xff;
        let v = Scalar::from(7u64);
        let (sigma, mu) = prove(
            &curve,
            &[ProofInput {
                coefficient: v,
                sigma: sigma_i,
                slice: &corrupted,
            }],
            &r_j,
        );
        assert!(!verify(&curve, &keys.public(), &[5], &[v], &sigma, &mu).unwrap());
    }

    #[test]
    fn sigma_from_another_round_fails_verification() {
        let (curve, keys) = setup();
        let r0 = keys.round_randomizer(&curve, 0).unwrap();
        let r1 = keys.round_randomizer(&curve, 1).unwrap();
        assert_ne!(r0, r1);

        let slice = b"slice";
        let stale = keys.sigma(&curve, 0, slice, &r0).unwrap();
        let v = Scalar::from(7u64);
        let (sigma, mu) = prove(
            &curve,
            &[ProofInput {
                coefficient: v,
                sigma: stale,
                slice,
            }],
            &r1,
        );
        assert!(!verify(&curve, &keys.public(), &[0], &[v], &sigma, &mu).unwrap());
    }

    #[test]
    fn negative_round_is_rejected() {
        let (curve, keys) = setup();
        assert!(keys.round_randomizer(&curve, -1).is_err());
    }

    #[test]
    fn public_material_hex_round_trip() {
        let (_, keys) = setup();
        let hex = keys.public().to_hex();
        assert_eq!(PairingPublic::from_hex(&hex).unwrap(), keys.public());
    }
}
