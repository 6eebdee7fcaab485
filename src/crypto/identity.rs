// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! P-256 ECDSA identities.
//!
//! A public key is the 64-byte uncompressed `X‖Y` point (no SEC1 tag); a node
//! identifier is its lowercase hex. Signatures are 64 bytes `r‖s` and are
//! always computed over a SHA-256 digest supplied by the caller.

use std::fmt;
use std::str::FromStr;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::canonical::CanonicalQuery;
use crate::error::{Error, Result};

pub const PUBLIC_KEY_LEN: usize = 64;
pub const SIGNATURE_LEN: usize = 64;
pub const SECRET_KEY_LEN: usize = 32;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Uncompressed P-256 public key without the SEC1 tag byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::bad_param(format!("public key must be {PUBLIC_KEY_LEN} bytes")))?;
        let key = Self(arr);
        key.verifying_key()?;
        Ok(key)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::bad_param(format!("invalid public key hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Node identifier derived from this key.
    pub fn node_id(&self) -> String {
        self.to_hex()
    }

    fn sec1_bytes(&self) -> [u8; PUBLIC_KEY_LEN + 1] {
        let mut sec1 = [0u8; PUBLIC_KEY_LEN + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.0);
        sec1
    }

    pub(crate) fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.sec1_bytes())
            .map_err(|_| Error::bad_param("public key is not a P-256 point"))
    }

    pub(crate) fn to_p256(&self) -> Result<p256::PublicKey> {
        p256::PublicKey::from_sec1_bytes(&self.sec1_bytes())
            .map_err(|_| Error::bad_param("public key is not a P-256 point"))
    }

    pub(crate) fn from_p256(key: &p256::PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        arr.copy_from_slice(&point.as_bytes()[1..]);
        Self(arr)
    }

    /// Verify `signature` over a SHA-256 digest.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &Signature) -> Result<()> {
        let sig = EcdsaSignature::from_slice(&signature.0)
            .map_err(|_| Error::bad_signature("malformed signature"))?;
        self.verifying_key()?
            .verify_prehash(digest, &sig)
            .map_err(|_| Error::bad_signature("signature does not verify"))
    }

    /// Verify `signature` over `SHA-256(message)`.
    pub fn verify_message(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.verify_digest(&sha256(message), signature)
    }

    /// Verify `signature` over the canonical query of `payload`.
    pub fn verify<T: CanonicalQuery + ?Sized>(&self, payload: &T, signature: &Signature) -> Result<()> {
        self.verify_digest(&payload.signing_digest(), signature)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..12])
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// 64-byte `r‖s` ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| Error::bad_signature(format!("signature must be {SIGNATURE_LEN} bytes")))?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::bad_signature(format!("invalid signature hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..12])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// A participant's key pair: requester, storage node or executor.
#[derive(Clone)]
pub struct Identity {
    signing: SigningKey,
    public: PublicKey,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Load from a raw 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing = SigningKey::from_slice(bytes)
            .map_err(|_| Error::bad_param("private key is not a valid P-256 scalar"))?;
        Ok(Self::from_signing_key(signing))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::bad_param(format!("invalid private key hex: {e}")))?;
        Self::from_secret_bytes(&bytes)
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let point = signing.verifying_key().to_encoded_point(false);
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        arr.copy_from_slice(&point.as_bytes()[1..]);
        Self {
            signing,
            public: PublicKey(arr),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn node_id(&self) -> String {
        self.public.node_id()
    }

    /// Raw secret scalar. Only used for key derivation.
    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        self.signing.to_bytes().into()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }

    pub(crate) fn nonzero_scalar(&self) -> &p256::NonZeroScalar {
        self.signing.as_nonzero_scalar()
    }

    /// Sign a SHA-256 digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature> {
        let sig: EcdsaSignature = self
            .signing
            .sign_prehash(digest)
            .map_err(|e| Error::crypto(format!("signing failed: {e}")))?;
        Signature::from_bytes(&sig.to_bytes())
    }

    /// Sign `SHA-256(message)`.
    pub fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        self.sign_digest(&sha256(message))
    }

    /// Sign the canonical query of `payload`.
    pub fn sign<T: CanonicalQuery + ?Sized>(&self, payload: &T) -> Result<Signature> {
        self.sign_digest(&payload.signing_digest())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("public", &self.public).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_64_bytes_and_round_trips_hex() {
        let id = Identity::generate();
        let pk = id.public_key();
        assert_eq!(pk.to_hex().len(), 128);
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert_eq!(id.node_id(), pk.to_hex());
    }

    #[test]
    fn secret_round_trip_restores_same_identity() {
        let id = Identity::generate();
        let restored = Identity::from_hex(&id.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), id.public_key());
    }

    #[test]
    fn signature_verifies_only_for_signed_message() {
        let id = Identity::generate();
        let sig = id.sign_message(b"slice,file,12,100").unwrap();
        assert_eq!(sig.as_bytes().len(), SIGNATURE_LEN);
        assert!(id.public_key().verify_message(b"slice,file,12,100", &sig).is_ok());

        let err = id
            .public_key()
            .verify_message(b"slice,file,13,100", &sig)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BadSignature);
    }

    #[test]
    fn signature_from_other_key_is_rejected() {
        let a = Identity::generate();
        let b = Identity::generate();
        let sig = a.sign_message(b"hello").unwrap();
        assert!(b.public_key().verify_message(b"hello", &sig).is_err());
    }

    #[test]
    fn rejects_malformed_public_key() {
        assert!(PublicKey::from_bytes(&[1u8; 10]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 64]).is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let id = Identity::generate();
        let json = serde_json::to_string(&id.public_key()).unwrap();
        assert_eq!(json, format!("\"{}\"", id.public_key().to_hex()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id.public_key());
    }
}
