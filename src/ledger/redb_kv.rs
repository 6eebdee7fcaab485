// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger backend on redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `ledger`: composite key → serialized record or index marker
//!
//! Each [`WriteBatch`] runs in one write transaction, so its checks and
//! writes are serialized against every other batch.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::kv::{BatchOp, KvError, KvResult, KvStore, WriteBatch};

// =============================================================================
// Table Definitions
// =============================================================================

const LEDGER: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ledger");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RedbKvError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn read_err(e: impl Into<RedbKvError>) -> KvError {
    KvError::Read(e.into().to_string())
}

fn write_err(e: impl Into<RedbKvError>) -> KvError {
    KvError::Write(e.into().to_string())
}

// =============================================================================
// RedbKv
// =============================================================================

/// Ledger store in a single redb file.
pub struct RedbKv {
    db: Database,
}

impl RedbKv {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, RedbKvError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so read transactions never fail.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LEDGER)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl KvStore for RedbKv {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(LEDGER).map_err(read_err)?;
        let value = table.get(key).map_err(read_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn range(&self, start: &[u8], end: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(LEDGER).map_err(read_err)?;

        let mut out = Vec::new();
        for entry in table.range(start..end).map_err(read_err)? {
            let (k, v) = entry.map_err(read_err)?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(out)
    }

    fn commit(&self, batch: WriteBatch) -> KvResult<()> {
        let write_txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut table = write_txn.open_table(LEDGER).map_err(write_err)?;

            // Dropping the transaction without commit aborts it.
            batch.check(|key| {
                let current = table.get(key).map_err(read_err)?;
                Ok(current.map(|v| v.value().to_vec()))
            })?;

            for op in batch.ops() {
                match op {
                    BatchOp::Create { key, value } | BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(write_err)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(write_err)?;
                    }
                    BatchOp::Expect { .. } => {}
                }
            }
        }
        write_txn.commit().map_err(write_err)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (RedbKv, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = RedbKv::open(&dir.path().join("ledger.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn put_and_get() {
        let (db, _dir) = temp_db();
        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);
    }

    #[test]
    fn failed_batch_is_rolled_back() {
        let (db, _dir) = temp_db();
        db.put_if_absent(b"exists", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put(b"side-effect".to_vec(), b"x".to_vec())
            .create(b"exists".to_vec(), b"2".to_vec());
        assert!(matches!(db.commit(batch), Err(KvError::Exists(_))));
        assert_eq!(db.get(b"side-effect").unwrap(), None);
    }

    #[test]
    fn prefix_scan_returns_keys_in_order() {
        let (db, _dir) = temp_db();
        for k in [b"\0p\0c\0", b"\0p\0a\0", b"\0q\0a\0", b"\0p\0b\0"] {
            db.put(k, b"").unwrap();
        }
        let keys: Vec<_> = db
            .scan_prefix(b"\0p\0")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![b"\0p\0a\0".to_vec(), b"\0p\0b\0".to_vec(), b"\0p\0c\0".to_vec()]
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let (db, _dir) = temp_db();
        db.put(b"k", b"v").unwrap();
        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec()).delete(b"k".to_vec());
        db.commit(batch).unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let db = RedbKv::open(&path).unwrap();
            db.put(b"persist", b"yes").unwrap();
        }
        let db = RedbKv::open(&path).unwrap();
        assert_eq!(db.get(b"persist").unwrap(), Some(b"yes".to_vec()));
    }
}
