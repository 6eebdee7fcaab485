// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deterministic file and slice keys.
//!
//! - `K_f = KDF(owner_secret, "file-key", file_id)`
//! - `K_s = KDF(K_f, "slice-key", slice_id ‖ 0x00 ‖ node_id)`, 32 key bytes
//!   followed by a 12 byte nonce
//!
//! The KDF is HMAC-SHA256 in counter mode. Distinct replicas of one logical
//! slice therefore encrypt to distinct ciphertexts.

use std::collections::BTreeMap;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;

use super::identity::Identity;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

const FILE_KEY_LABEL: &str = "file-key";
const SLICE_KEY_LABEL: &str = "slice-key";

/// HMAC-SHA256 counter-mode KDF filling `out`.
pub fn kdf(secret: &[u8], label: &str, context: &[u8], out: &mut [u8]) -> Result<()> {
    let mut counter: u32 = 1;
    let mut offset = 0;
    while offset < out.len() {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| Error::crypto(format!("invalid kdf secret: {e}")))?;
        mac.update(&counter.to_be_bytes());
        mac.update(label.as_bytes());
        mac.update(&[0u8]);
        mac.update(context);
        let block = mac.finalize().into_bytes();

        let take = (out.len() - offset).min(block.len());
        out[offset..offset + take].copy_from_slice(&block[..take]);
        offset += take;
        counter += 1;
    }
    Ok(())
}

fn aes(key: &[u8; KEY_LEN]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

// =============================================================================
// File key
// =============================================================================

/// Per-file AES-256 key.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey([u8; KEY_LEN]);

impl FileKey {
    /// Derive the file key for `file_id` from the owner's secret.
    pub fn derive(owner: &Identity, file_id: &str) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        kdf(&owner.secret_bytes(), FILE_KEY_LABEL, file_id.as_bytes(), &mut key)?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::crypto(format!("file key must be {KEY_LEN} bytes")))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive the replica key for `(slice_id, node_id)`.
    pub fn slice_key(&self, slice_id: &str, node_id: &str) -> Result<SliceKey> {
        let mut context = Vec::with_capacity(slice_id.len() + node_id.len() + 1);
        context.extend_from_slice(slice_id.as_bytes());
        context.push(0);
        context.extend_from_slice(node_id.as_bytes());

        let mut material = [0u8; KEY_LEN + NONCE_LEN];
        kdf(&self.0, SLICE_KEY_LABEL, &context, &mut material)?;
        SliceKey::from_bytes(&material)
    }

    /// Encrypt with a random nonce; output is `nonce ‖ ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = aes(&self.0)
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::crypto("file key encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Inverse of [`FileKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(Error::crypto("sealed data shorter than nonce"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        aes(&self.0)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::crypto("file key decryption failed"))
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileKey(..)")
    }
}

impl Serialize for FileKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(&self.0))
    }
}

impl<'de> Deserialize<'de> for FileKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = Base64::decode_vec(&s).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

// =============================================================================
// Slice key
// =============================================================================

/// Per-replica AES-256 key and its fixed nonce.
///
/// Each key encrypts exactly one plaintext, the slice it was derived for.
#[derive(Clone, PartialEq, Eq)]
pub struct SliceKey {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl SliceKey {
    /// Parse `key ‖ nonce`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN + NONCE_LEN {
            return Err(Error::crypto(format!(
                "slice key must be {} bytes",
                KEY_LEN + NONCE_LEN
            )));
        }
        let mut key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        nonce.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, nonce })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_LEN + NONCE_LEN);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.nonce);
        out
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aes(&self.key)
            .encrypt(Nonce::from_slice(&self.nonce), plaintext)
            .map_err(|_| Error::crypto("slice encryption failed"))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        aes(&self.key)
            .decrypt(Nonce::from_slice(&self.nonce), ciphertext)
            .map_err(|_| Error::crypto("slice decryption failed"))
    }
}

impl fmt::Debug for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SliceKey(..)")
    }
}

impl Serialize for SliceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(&self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for SliceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = Base64::decode_vec(&s).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

// =============================================================================
// Key set for one file
// =============================================================================

/// `slice_id → node_id → K_s`.
pub type SliceKeyMap = BTreeMap<String, BTreeMap<String, SliceKey>>;

/// Everything needed to read one file.
#[derive(Debug, Clone)]
pub struct FileKeys {
    pub file_key: FileKey,
    pub slice_keys: SliceKeyMap,
}

impl FileKeys {
    pub fn new(file_key: FileKey) -> Self {
        Self {
            file_key,
            slice_keys: BTreeMap::new(),
        }
    }

    /// Derive `K_f` and every listed replica key from the owner identity.
    pub fn derive<'a>(
        owner: &Identity,
        file_id: &str,
        replicas: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        let mut keys = Self::new(FileKey::derive(owner, file_id)?);
        for (slice_id, node_id) in replicas {
            let key = keys.file_key.slice_key(slice_id, node_id)?;
            keys.insert(slice_id, node_id, key);
        }
        Ok(keys)
    }

    pub fn insert(&mut self, slice_id: &str, node_id: &str, key: SliceKey) {
        self.slice_keys
            .entry(slice_id.to_string())
            .or_default()
            .insert(node_id.to_string(), key);
    }

    /// Key for one replica; derived from `K_f` when not listed.
    pub fn slice_key(&self, slice_id: &str, node_id: &str) -> Result<SliceKey> {
        if let Some(key) = self
            .slice_keys
            .get(slice_id)
            .and_then(|nodes| nodes.get(node_id))
        {
            return Ok(key.clone());
        }
        self.file_key.slice_key(slice_id, node_id)
    }
}
