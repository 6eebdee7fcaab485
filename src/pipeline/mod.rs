// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Slice Pipeline
//!
//! Write: chunk → derive `K_f` and per-replica `K_s` → AES-GCM → place
//! replicas by rotation → push ciphertext and authenticators → commit the
//! file record. Read: resolve keys → open the structure → pull, check and
//! decrypt each slice → reassemble in order.
//!
//! This core runs pure replication: every logical slice is stored as
//! `replica(namespace)` independently keyed copies.

pub mod placement;
pub mod reader;
pub mod structure;
pub mod writer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub use reader::{FileRef, ReadOptions, SliceReader};
pub use structure::StructureEntry;
pub use writer::{SliceWriter, WriteOptions};

/// Advisory per-`file_id` locks held around ledger commits of one file.
#[derive(Clone, Default)]
pub struct FileLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl std::fmt::Debug for FileLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLocks").finish_non_exhaustive()
    }
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, file_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(file_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_file_waits_other_file_does_not() {
        let locks = FileLocks::new();
        let held = locks.lock("f1").await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("f2")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock("f1")).await;
        assert!(same.is_err());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.lock("f1")).await;
        assert!(again.is_ok());
    }
}
