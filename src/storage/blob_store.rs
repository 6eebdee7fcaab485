// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blob backends for the node-local object store.
//!
//! Writes go to a temp file first and are renamed into place, so a reader
//! never observes a half-written slice. Deleting a missing key succeeds.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::RwLock;

use super::StoragePaths;
use crate::error::{Error, ErrorKind};

/// Error type for object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// Key would escape the store directory.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage not initialized")]
    NotInitialized,

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        let kind = match &e {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::InvalidKey(_) => ErrorKind::BadParam,
            StorageError::IntegrityViolation(_) => ErrorKind::Crypto,
            StorageError::Io(_) | StorageError::NotInitialized => ErrorKind::Internal,
        };
        Error::new(kind, e.to_string())
    }
}

/// Object namespaces inside one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlobKind {
    /// Slice ciphertext, keyed by `slice_id`.
    Slice,
    /// Authenticator bundle, keyed by `slice_id`.
    Sigmas,
    /// JSON bookkeeping written by the node on push.
    SliceMeta,
    /// Eviction watermarks.
    Cursor,
}

impl BlobKind {
    pub const ALL: [BlobKind; 4] = [
        BlobKind::Slice,
        BlobKind::Sigmas,
        BlobKind::SliceMeta,
        BlobKind::Cursor,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            BlobKind::Slice => "slices",
            BlobKind::Sigmas => "sigmas",
            BlobKind::SliceMeta => "slice_meta",
            BlobKind::Cursor => "cursors",
        }
    }
}

/// Keys are ids and hex strings; anything path-like is refused.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let ok = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Node-local object store.
pub trait BlobStore: Send + Sync {
    fn put(&self, kind: BlobKind, key: &str, data: &[u8]) -> StorageResult<()>;

    /// `NotFound` when absent.
    fn get(&self, kind: BlobKind, key: &str) -> StorageResult<Vec<u8>>;

    /// Idempotent: deleting a missing key succeeds.
    fn delete(&self, kind: BlobKind, key: &str) -> StorageResult<()>;

    fn exists(&self, kind: BlobKind, key: &str) -> StorageResult<bool>;

    /// Keys of one kind, sorted.
    fn list(&self, kind: BlobKind) -> StorageResult<Vec<String>>;

    /// Write-read-delete probe.
    fn health_check(&self) -> StorageResult<()> {
        let key = "health_check";
        let probe = b"health_check_data";
        self.put(BlobKind::Cursor, key, probe)?;
        let read = self.get(BlobKind::Cursor, key)?;
        self.delete(BlobKind::Cursor, key)?;
        if read != probe {
            return Err(StorageError::IntegrityViolation(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Filesystem backend
// =============================================================================

/// Object store on a local directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    paths: StoragePaths,
    initialized: bool,
}

impl FsBlobStore {
    /// Does NOT create the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create every kind directory. Safe to call multiple times.
    pub fn initialize(&mut self) -> StorageResult<()> {
        for kind in BlobKind::ALL {
            fs::create_dir_all(self.paths.kind_dir(kind))?;
        }
        self.initialized = true;
        Ok(())
    }

    fn ensure_ready(&self, key: &str) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        validate_key(key)
    }
}

fn not_found(e: io::Error, what: String) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(what)
    } else {
        StorageError::Io(e)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, kind: BlobKind, key: &str, data: &[u8]) -> StorageResult<()> {
        self.ensure_ready(key)?;
        let path = self.paths.object(kind, key);
        let temp_path = self
            .paths
            .kind_dir(kind)
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, kind: BlobKind, key: &str) -> StorageResult<Vec<u8>> {
        self.ensure_ready(key)?;
        let what = format!("{}/{key}", kind.dir_name());
        let mut file = File::open(self.paths.object(kind, key)).map_err(|e| not_found(e, what))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn delete(&self, kind: BlobKind, key: &str) -> StorageResult<()> {
        self.ensure_ready(key)?;
        match fs::remove_file(self.paths.object(kind, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, kind: BlobKind, key: &str) -> StorageResult<bool> {
        self.ensure_ready(key)?;
        Ok(self.paths.object(kind, key).is_file())
    }

    fn list(&self, kind: BlobKind) -> StorageResult<Vec<String>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let dir = self.paths.kind_dir(kind);
        if !Path::new(&dir).exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Process-local object store used by tests and the in-process cluster.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<(BlobKind, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Io(io::Error::other("blob store lock poisoned"))
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, kind: BlobKind, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert((kind, key.to_string()), data.to_vec());
        Ok(())
    }

    fn get(&self, kind: BlobKind, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        self.objects
            .read()
            .map_err(|_| poisoned())?
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{key}", kind.dir_name())))
    }

    fn delete(&self, kind: BlobKind, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .remove(&(kind, key.to_string()));
        Ok(())
    }

    fn exists(&self, kind: BlobKind, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .contains_key(&(kind, key.to_string())))
    }

    fn list(&self, kind: BlobKind) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
