// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger key/value primitives.
//!
//! `put-if-absent`, `put`, `get` and lexicographic `range(prefix)`, plus an
//! atomic [`WriteBatch`]: every create and expectation in a batch is checked
//! before anything is written, so a conflicting batch leaves no trace.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// A create hit an existing key.
    #[error("key already exists: {0}")]
    Exists(String),

    /// An optimistic expectation no longer holds.
    #[error("key changed concurrently: {0}")]
    Changed(String),

    #[error("ledger read failed: {0}")]
    Read(String),

    #[error("ledger write failed: {0}")]
    Write(String),
}

pub type KvResult<T> = Result<T, KvError>;

impl From<KvError> for Error {
    fn from(e: KvError) -> Self {
        let kind = match &e {
            KvError::Exists(_) => ErrorKind::AlreadyExists,
            KvError::Changed(_) => ErrorKind::LedgerConflict,
            KvError::Read(_) => ErrorKind::ReadLedger,
            KvError::Write(_) => ErrorKind::WriteLedger,
        };
        Error::new(kind, e.to_string())
    }
}

/// Printable form of a composite key.
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).replace('\0', "/")
}

/// One operation in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert; fails the whole batch if the key exists.
    Create { key: Vec<u8>, value: Vec<u8> },
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// Fails the whole batch unless the key currently holds `value`.
    Expect { key: Vec<u8>, value: Option<Vec<u8>> },
}

/// Ordered, all-or-nothing group of writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Create { key, value });
        self
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key });
        self
    }

    pub fn expect(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Expect { key, value });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Check creates and expectations against `lookup`.
    pub fn check<F>(&self, mut lookup: F) -> KvResult<()>
    where
        F: FnMut(&[u8]) -> KvResult<Option<Vec<u8>>>,
    {
        for op in &self.ops {
            match op {
                BatchOp::Create { key, .. } => {
                    if lookup(key)?.is_some() {
                        return Err(KvError::Exists(display_key(key)));
                    }
                }
                BatchOp::Expect { key, value } => {
                    if lookup(key)? != *value {
                        return Err(KvError::Changed(display_key(key)));
                    }
                }
                BatchOp::Put { .. } | BatchOp::Delete { .. } => {}
            }
        }
        Ok(())
    }
}

/// Exclusive upper bound for a prefix scan. Composite keys are UTF-8 and
/// never contain `0xFF`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xFF);
    end
}

/// Ledger backend.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Entries with `start <= key < end`, in key order.
    fn range(&self, start: &[u8], end: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply `batch` atomically.
    fn commit(&self, batch: WriteBatch) -> KvResult<()>;

    fn scan_prefix(&self, prefix: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.range(prefix, &prefix_end(prefix))
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut batch = WriteBatch::new();
        batch.create(key.to_vec(), value.to_vec());
        self.commit(batch)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.commit(batch)
    }
}

/// In-process ledger, used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::Read("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::Read("lock poisoned".into()))?;
        Ok(entries
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> KvResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::Write("lock poisoned".into()))?;
        batch.check(|key| Ok(entries.get(key).cloned()))?;

        for op in batch.ops {
            match op {
                BatchOp::Create { key, value } | BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
                BatchOp::Expect { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_if_absent_rejects_second_create() {
        let kv = MemoryKv::new();
        kv.put_if_absent(b"a", b"1").unwrap();
        let err = kv.put_if_absent(b"a", b"2").unwrap_err();
        assert!(matches!(err, KvError::Exists(_)));
        assert_eq!(kv.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn conflicting_batch_writes_nothing() {
        let kv = MemoryKv::new();
        kv.put(b"taken", b"x").unwrap();

        let mut batch = WriteBatch::new();
        batch
            .create(b"fresh".to_vec(), b"1".to_vec())
            .create(b"taken".to_vec(), b"2".to_vec());
        assert!(kv.commit(batch).is_err());
        assert_eq!(kv.get(b"fresh").unwrap(), None);
        assert_eq!(kv.get(b"taken").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn expectation_detects_concurrent_change() {
        let kv = MemoryKv::new();
        kv.put(b"k", b"v1").unwrap();

        let mut stale = WriteBatch::new();
        stale
            .expect(b"k".to_vec(), Some(b"v0".to_vec()))
            .put(b"k".to_vec(), b"v2".to_vec());
        assert!(matches!(kv.commit(stale).unwrap_err(), KvError::Changed(_)));

        let mut fresh = WriteBatch::new();
        fresh
            .expect(b"k".to_vec(), Some(b"v1".to_vec()))
            .put(b"k".to_vec(), b"v2".to_vec());
        kv.commit(fresh).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let kv = MemoryKv::new();
        kv.put(b"\0a\0b\0", b"1").unwrap();
        kv.put(b"\0a\0a\0", b"2").unwrap();
        kv.put(b"\0b\0a\0", b"3").unwrap();

        let hits = kv.scan_prefix(b"\0a\0").unwrap();
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"\0a\0a\0".to_vec(), b"\0a\0b\0".to_vec()]);
    }

    #[test]
    fn kv_errors_map_to_error_kinds() {
        let e: Error = KvError::Exists("k".into()).into();
        assert_eq!(e.kind, ErrorKind::AlreadyExists);
        let e: Error = KvError::Changed("k".into()).into();
        assert_eq!(e.kind, ErrorKind::LedgerConflict);
    }
}
