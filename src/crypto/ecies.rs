// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECIES over P-256.
//!
//! Wire format: `ephemeral_pubkey (64) ‖ AES-256-GCM ciphertext`. The AES
//! key and nonce come from the KDF over the ECDH shared secret, bound to the
//! ephemeral and recipient public keys.

use p256::ecdh::{diffie_hellman, EphemeralSecret};
use rand::rngs::OsRng;

use super::identity::{Identity, PublicKey, PUBLIC_KEY_LEN};
use super::keys::{kdf, SliceKey, KEY_LEN, NONCE_LEN};
use crate::error::{Error, Result};

const ECIES_LABEL: &str = "ecies-p256-aes256gcm";

fn derive_key(shared: &[u8], ephemeral: &PublicKey, recipient: &PublicKey) -> Result<SliceKey> {
    let mut context = Vec::with_capacity(2 * PUBLIC_KEY_LEN);
    context.extend_from_slice(ephemeral.as_bytes());
    context.extend_from_slice(recipient.as_bytes());

    let mut material = [0u8; KEY_LEN + NONCE_LEN];
    kdf(shared, ECIES_LABEL, &context, &mut material)?;
    SliceKey::from_bytes(&material)
}

/// Encrypt `plaintext` to `recipient`.
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let recipient_point = recipient.to_p256()?;
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_pub = PublicKey::from_p256(&ephemeral.public_key());
    let shared = ephemeral.diffie_hellman(&recipient_point);

    let key = derive_key(shared.raw_secret_bytes(), &ephemeral_pub, recipient)?;
    let ciphertext = key.encrypt(plaintext)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an envelope produced by [`encrypt`] for `identity`.
pub fn decrypt(identity: &Identity, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < PUBLIC_KEY_LEN {
        return Err(Error::crypto("ecies envelope too short"));
    }
    let (eph_bytes, ciphertext) = envelope.split_at(PUBLIC_KEY_LEN);
    let ephemeral_pub = PublicKey::from_bytes(eph_bytes)
        .map_err(|_| Error::crypto("ecies ephemeral key is not a curve point"))?;
    let eph_point = ephemeral_pub.to_p256()?;

    let shared = diffie_hellman(identity.nonzero_scalar(), eph_point.as_affine());
    let key = derive_key(
        shared.raw_secret_bytes(),
        &ephemeral_pub,
        &identity.public_key(),
    )?;
    key.decrypt(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_to_recipient() {
        let recipient = Identity::generate();
        let envelope = encrypt(&recipient.public_key(), b"{\"firstEncSecret\":\"k\"}").unwrap();
        assert_eq!(
            decrypt(&recipient, &envelope).unwrap(),
            b"{\"firstEncSecret\":\"k\"}"
        );
    }

    #[test]
    fn other_identity_cannot_decrypt() {
        let recipient = Identity::generate();
        let intruder = Identity::generate();
        let envelope = encrypt(&recipient.public_key(), b"secret").unwrap();
        let err = decrypt(&intruder, &envelope).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Crypto);
    }

    #[test]
    fn envelopes_are_randomized() {
        let recipient = Identity::generate();
        let a = encrypt(&recipient.public_key(), b"same").unwrap();
        let b = encrypt(&recipient.public_key(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn short_envelope_is_rejected() {
        let recipient = Identity::generate();
        assert!(decrypt(&recipient, &[0u8; 10]).is_err());
    }
}
