// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File records, replica sets and migration bookkeeping.

use std::collections::{BTreeMap, BTreeSet};

use super::index;
use super::kv::{KvError, WriteBatch};
use super::models::{
    File, ListFileOptions, MigrationPending, Namespace, PublicSliceMeta, Signed,
    SliceMigrateRecord, UpdateExpireTime, UpdateFileSlices,
};
use super::Ledger;
use crate::crypto::PublicKey;
use crate::error::{Error, Result};

/// Check the replica invariant for a slice set.
///
/// Every logical slice needs `min_per_slice` replicas on distinct nodes, and
/// all replicas of one slice share `length` and `index`. Replica keys differ
/// per node, so `cipher_hash` is checked per replica by readers instead.
fn validate_slices(slices: &[PublicSliceMeta], min_per_slice: &BTreeMap<String, usize>) -> Result<()> {
    let mut groups: BTreeMap<&str, Vec<&PublicSliceMeta>> = BTreeMap::new();
    for s in slices {
        if s.slice_id.is_empty() || s.node_id.is_empty() {
            return Err(Error::bad_param("slice meta needs slice_id and node_id"));
        }
        index::check_part("slice_id", &s.slice_id)?;
        index::check_part("node_id", &s.node_id)?;
        groups.entry(s.slice_id.as_str()).or_default().push(s);
    }

    for (slice_id, replicas) in &groups {
        let nodes: BTreeSet<&str> = replicas.iter().map(|r| r.node_id.as_str()).collect();
        if nodes.len() != replicas.len() {
            return Err(Error::bad_param(format!("slice {slice_id} has two replicas on one node")));
        }
        let first = replicas[0];
        if replicas
            .iter()
            .any(|r| r.length != first.length || r.index != first.index)
        {
            return Err(Error::bad_param(format!("replicas of slice {slice_id} disagree")));
        }
    }

    for (slice_id, min) in min_per_slice {
        let have = groups.get(slice_id.as_str()).map(Vec::len).unwrap_or(0);
        if have < *min {
            return Err(Error::bad_param(format!(
                "slice {slice_id} has {have} replicas, needs {min}"
            )));
        }
    }
    Ok(())
}

impl Ledger {
    // ========== Publish ==========

    /// `PublishFile`: commit a file record with all its replicas, signed by
    /// the owner. File id and `(owner, namespace, name)` are both
    /// put-if-absent.
    pub fn publish_file(&self, req: &Signed<File>) -> Result<()> {
        let file = &req.payload;
        req.verify(&file.owner)?;

        if file.id.is_empty() || file.name.is_empty() {
            return Err(Error::bad_param("file id and name are required"));
        }
        index::check_part("file id", &file.id)?;
        index::check_part("namespace", &file.namespace)?;
        index::check_part("file name", &file.name)?;
        if file.slices.is_empty() {
            return Err(Error::bad_param("file has no slices"));
        }
        let now = self.now();
        if file.expire_time <= now {
            return Err(Error::bad_param("expire_time must be in the future"));
        }

        let owner = file.owner.to_hex();
        let (mut ns, ns_raw) = self.require::<Namespace>(
            &index::namespace(&owner, &file.namespace),
            &format!("namespace {}", file.namespace),
        )?;

        let replica = ns.replica as usize;
        let required: BTreeMap<String, usize> = file.slice_ids().into_iter().map(|id| (id, replica)).collect();
        validate_slices(&file.slices, &required)?;

        let distinct_len: u64 = required
            .keys()
            .filter_map(|id| file.replicas(id).next())
            .map(|s| s.length)
            .sum();
        if distinct_len < file.length {
            return Err(Error::bad_param("slices are shorter than the file"));
        }

        ns.file_total_num += 1;
        ns.update_time = now;

        let mut batch = WriteBatch::new();
        batch
            .create(index::file_by_id(&file.id), Self::encode(file)?)
            .create(
                index::file_by_name(&owner, &file.namespace, &file.name),
                file.id.as_bytes().to_vec(),
            )
            .put(
                index::file_by_owner_time(&owner, &file.namespace, file.publish_time, &file.id),
                Vec::new(),
            )
            .put(index::file_expire(&owner, file.expire_time, &file.id), Vec::new())
            .expect(index::namespace(&owner, &file.namespace), Some(ns_raw))
            .put(index::namespace(&owner, &file.namespace), Self::encode(&ns)?);
        for node_id in file.node_ids() {
            batch.put(index::node_slice_expire(&node_id, file.expire_time, &file.id), Vec::new());
        }

        self.commit(batch).map_err(|e| {
            if e.is(crate::error::ErrorKind::AlreadyExists) {
                Error::already_exists(format!("file {} / {}", file.id, file.name))
            } else {
                e
            }
        })?;

        tracing::info!(file_id = %file.id, namespace = %file.namespace, slices = file.slices.len(), "file published");
        Ok(())
    }

    // ========== Lookups ==========

    /// `GetFileByID`.
    pub fn get_file_by_id(&self, file_id: &str) -> Result<File> {
        Ok(self.require(&index::file_by_id(file_id), &format!("file {file_id}"))?.0)
    }

    /// `GetFileByName`.
    pub fn get_file_by_name(&self, owner: &PublicKey, namespace: &str, name: &str) -> Result<File> {
        let id = self
            .kv
            .get(&index::file_by_name(&owner.to_hex(), namespace, name))?
            .ok_or_else(|| Error::not_found(format!("file {namespace}/{name}")))?;
        self.get_file_by_id(&String::from_utf8_lossy(&id))
    }

    /// `ListFiles`: an owner's files, newest first.
    pub fn list_files(&self, opts: &ListFileOptions) -> Result<Vec<File>> {
        let prefix = index::file_by_owner_prefix(&opts.owner.to_hex(), opts.namespace.as_deref());
        let limit = opts.limit.unwrap_or(usize::MAX);

        let mut files = Vec::new();
        for (key, _) in self.scan(&prefix)? {
            // [kind, owner, ns, desc_time, file_id]
            let parts = index::decompose(&key);
            let (Some(time), Some(file_id)) = (parts.get(3), parts.get(4)) else {
                continue;
            };
            let Some(publish_time) = index::parse_desc_time(time) else {
                continue;
            };
            if opts.to.is_some_and(|to| publish_time >= to) {
                continue;
            }
            // Descending order: once below `from`, nothing later qualifies
            // within this namespace.
            if opts.from.is_some_and(|from| publish_time < from) {
                if opts.namespace.is_some() {
                    break;
                }
                continue;
            }
            if let Some(file) = self.load::<File>(&index::file_by_id(file_id))? {
                files.push(file);
            }
            if files.len() >= limit {
                break;
            }
        }
        Ok(files)
    }

    /// `ListExpiredFiles`: an owner's files with `expire_time < before`,
    /// oldest expiry first.
    pub fn list_expired_files(&self, owner: &PublicKey, before: i64) -> Result<Vec<File>> {
        let mut files = Vec::new();
        for (key, _) in self.scan(&index::file_expire_prefix(&owner.to_hex()))? {
            let parts = index::decompose(&key);
            let (Some(time), Some(file_id)) = (parts.get(2), parts.get(3)) else {
                continue;
            };
            match time.parse::<i64>() {
                Ok(t) if t < before => {}
                _ => break,
            }
            if let Some(file) = self.load::<File>(&index::file_by_id(file_id))? {
                files.push(file);
            }
        }
        Ok(files)
    }

    // ========== Updates ==========

    /// `UpdateFileExpireTime`: extend a file's lifetime.
    pub fn update_file_expire_time(&self, req: &Signed<UpdateExpireTime>) -> Result<File> {
        let (mut file, raw) = self.require::<File>(
            &index::file_by_id(&req.payload.file_id),
            &format!("file {}", req.payload.file_id),
        )?;
        req.verify(&file.owner)?;

        let new_expire = req.payload.expire_time;
        if new_expire == file.expire_time {
            return Err(Error::already_updated("expire_time unchanged"));
        }
        if new_expire < file.expire_time {
            return Err(Error::bad_param("expire_time can only be extended"));
        }

        let owner = file.owner.to_hex();
        let mut batch = WriteBatch::new();
        batch
            .expect(index::file_by_id(&file.id), Some(raw))
            .delete(index::file_expire(&owner, file.expire_time, &file.id))
            .put(index::file_expire(&owner, new_expire, &file.id), Vec::new());
        for node_id in file.node_ids() {
            batch
                .delete(index::node_slice_expire(&node_id, file.expire_time, &file.id))
                .put(index::node_slice_expire(&node_id, new_expire, &file.id), Vec::new());
        }

        file.expire_time = new_expire;
        batch.put(index::file_by_id(&file.id), Self::encode(&file)?);
        self.commit(batch)?;
        Ok(file)
    }

    /// `UpdateFilePublicSliceMeta`: replace the replica set, signed by the
    /// owner.
    ///
    /// The set may only grow or shed surplus replicas: each logical slice
    /// keeps at least `min(current, replica)` replicas, and no logical slice
    /// appears or disappears.
    pub fn update_file_slices(&self, req: &Signed<UpdateFileSlices>) -> Result<File> {
        let (mut file, raw) = self.require::<File>(
            &index::file_by_id(&req.payload.file_id),
            &format!("file {}", req.payload.file_id),
        )?;
        req.verify(&file.owner)?;

        let new_slices = &req.payload.slices;
        if *new_slices == file.slices {
            return Ok(file);
        }

        let ns: Namespace = self
            .load(&index::namespace(&file.owner.to_hex(), &file.namespace))?
            .ok_or_else(|| Error::not_found(format!("namespace {}", file.namespace)))?;

        let old_ids: BTreeSet<String> = file.slice_ids().into_iter().collect();
        let new_ids: BTreeSet<String> = new_slices.iter().map(|s| s.slice_id.clone()).collect();
        if old_ids != new_ids {
            return Err(Error::bad_param("logical slices cannot be added or removed"));
        }

        let required: BTreeMap<String, usize> = old_ids
            .iter()
            .map(|id| {
                let current = file.replicas(id).count();
                (id.clone(), current.min(ns.replica as usize))
            })
            .collect();
        validate_slices(new_slices, &required)?;

        // Replicas of one slice must keep their content identity.
        for s in new_slices {
            if let Some(old) = file.replicas(&s.slice_id).next() {
                if old.length != s.length || old.index != s.index {
                    return Err(Error::bad_param(format!("slice {} changed shape", s.slice_id)));
                }
            }
        }

        let old_nodes: BTreeSet<String> = file.node_ids().into_iter().collect();
        let mut batch = WriteBatch::new();
        batch.expect(index::file_by_id(&file.id), Some(raw));

        file.slices = new_slices.clone();
        let new_nodes: BTreeSet<String> = file.node_ids().into_iter().collect();
        for gone in old_nodes.difference(&new_nodes) {
            batch.delete(index::node_slice_expire(gone, file.expire_time, &file.id));
        }
        for added in new_nodes.difference(&old_nodes) {
            batch.put(index::node_slice_expire(added, file.expire_time, &file.id), Vec::new());
        }
        batch.put(index::file_by_id(&file.id), Self::encode(&file)?);
        self.commit(batch)?;
        Ok(file)
    }

    // ========== Migration bookkeeping ==========

    /// `SliceMigrateRecord`: append an audit record, signed by the file owner.
    pub fn slice_migrate_record(&self, req: &Signed<SliceMigrateRecord>) -> Result<()> {
        let record = &req.payload;
        let file = self.get_file_by_id(&record.file_id)?;
        req.verify(&file.owner)?;

        let key = index::slice_migrate(&record.from_node, record.ctime, &record.slice_id, &record.to_node);
        let value = Self::encode(record)?;
        match self.kv.put_if_absent(&key, &value) {
            Ok(()) => Ok(()),
            // A resubmitted identical record is a no-op.
            Err(KvError::Exists(_)) if self.kv.get(&key)?.as_deref() == Some(value.as_slice()) => Ok(()),
            Err(KvError::Exists(_)) => Err(Error::already_exists(format!(
                "migrate record for slice {} from {} to {}",
                record.slice_id, record.from_node, record.to_node
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// `GetSliceMigrateRecords`: migrations away from `from_node`, newest first.
    pub fn get_slice_migrate_records(&self, from_node: &str) -> Result<Vec<SliceMigrateRecord>> {
        self.scan_values(&index::slice_migrate_prefix(from_node))
    }

    /// `ListNodesExpireSlice`: files with a replica on `node_id` whose
    /// `expire_time < before`.
    pub fn list_nodes_expire_slice(&self, node_id: &str, before: i64) -> Result<Vec<File>> {
        let mut files = Vec::new();
        for (key, _) in self.scan(&index::node_slice_expire_prefix(node_id))? {
            let parts = index::decompose(&key);
            let (Some(time), Some(file_id)) = (parts.get(2), parts.get(3)) else {
                continue;
            };
            match time.parse::<i64>() {
                Ok(t) if t < before => {}
                _ => break,
            }
            if let Some(file) = self.load::<File>(&index::file_by_id(file_id))? {
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Record a migration that has to wait for the owner's file key.
    pub fn record_migration_pending(&self, req: &Signed<MigrationPending>) -> Result<()> {
        let pending = &req.payload;
        req.verify(&pending.reporter)?;

        let file = self.get_file_by_id(&pending.file_id)?;
        if file.owner != pending.owner {
            return Err(Error::bad_param("pending migration names the wrong owner"));
        }
        let key = index::migration_pending(
            &pending.owner.to_hex(),
            pending.ctime,
            &pending.file_id,
            &pending.slice_id,
        );
        self.kv.put_if_absent(&key, &Self::encode(pending)?)?;
        Ok(())
    }

    /// Deferred migrations for an owner, newest first.
    pub fn list_migration_pending(&self, owner: &PublicKey) -> Result<Vec<MigrationPending>> {
        self.scan_values(&index::migration_pending_prefix(&owner.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::crypto::Identity;
    use crate::error::ErrorKind;

    fn publish(ledger: &Ledger, owner: &Identity, file: File) -> Result<()> {
        ledger.publish_file(&Signed::new(owner, file).unwrap())
    }

    #[test]
    fn separator_in_file_name_is_rejected() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        let err = publish(&ledger, &owner, file(&owner, "f1", "b\0c", vec![slice("s1", "a", 0)], T0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParam);
        assert_eq!(ledger.get_file_by_id("f1").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn publish_then_lookup_by_id_and_name() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 2);

        let f = file(&owner, "f1", "hello.txt", vec![slice("s1", "a", 0), slice("s1", "b", 0)], T0);
        publish(&ledger, &owner, f.clone()).unwrap();

        assert_eq!(ledger.get_file_by_id("f1").unwrap(), f);
        assert_eq!(ledger.get_file_by_name(&owner.public_key(), "n", "hello.txt").unwrap(), f);
        assert_eq!(ledger.get_ns_by_name(&owner.public_key(), "n").unwrap().file_total_num, 1);
    }

    #[test]
    fn duplicate_name_is_rejected_and_leaves_no_record() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);

        publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0)).unwrap();
        let err = publish(&ledger, &owner, file(&owner, "f2", "x", vec![slice("s2", "a", 0)], T0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert!(ledger.get_file_by_id("f2").unwrap_err().is(ErrorKind::NotFound));
    }

    #[test]
    fn under_replicated_file_is_rejected() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 2);

        let err = publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParam);

        let same_node = vec![slice("s1", "a", 0), slice("s1", "a", 0)];
        assert!(publish(&ledger, &owner, file(&owner, "f1", "x", same_node, T0)).is_err());
    }

    #[test]
    fn publish_signed_by_someone_else_is_unauthorized() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        let mallory = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);

        let f = file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0);
        let err = ledger.publish_file(&Signed::new(&mallory, f).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn list_files_is_newest_first_with_filters() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        for i in 0..4i64 {
            let f = file(&owner, &format!("f{i}"), &format!("name{i}"), vec![slice(&format!("s{i}"), "a", 0)], T0 + i);
            publish(&ledger, &owner, f).unwrap();
        }

        let all = ledger.list_files(&ListFileOptions::owner(owner.public_key())).unwrap();
        let ids: Vec<_> = all.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f3", "f2", "f1", "f0"]);

        let window = ledger
            .list_files(&ListFileOptions {
                namespace: Some("n".into()),
                from: Some(T0 + 1),
                to: Some(T0 + 3),
                ..ListFileOptions::owner(owner.public_key())
            })
            .unwrap();
        let ids: Vec<_> = window.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f2", "f1"]);
    }

    #[test]
    fn expire_time_only_extends_and_reindexes() {
        let (ledger, clock) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        let f = file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0);
        let expire = f.expire_time;
        publish(&ledger, &owner, f).unwrap();

        let shorten = UpdateExpireTime {
            file_id: "f1".into(),
            expire_time: expire - 1,
            timestamp: T0,
        };
        assert!(ledger
            .update_file_expire_time(&Signed::new(&owner, shorten).unwrap())
            .unwrap_err()
            .is(ErrorKind::BadParam));

        let extend = UpdateExpireTime {
            file_id: "f1".into(),
            expire_time: expire + 100,
            timestamp: T0,
        };
        ledger.update_file_expire_time(&Signed::new(&owner, extend).unwrap()).unwrap();

        clock.set(expire + 50);
        assert!(ledger.list_expired_files(&owner.public_key(), expire + 50).unwrap().is_empty());
        assert_eq!(ledger.list_expired_files(&owner.public_key(), expire + 101).unwrap().len(), 1);
        assert_eq!(ledger.list_nodes_expire_slice("a", expire + 101).unwrap().len(), 1);
        assert!(ledger.list_nodes_expire_slice("a", expire + 100).unwrap().is_empty());
    }

    #[test]
    fn slice_updates_add_before_remove() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 2);
        publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0), slice("s1", "b", 0)], T0)).unwrap();

        let update = |slices: Vec<PublicSliceMeta>| {
            let payload = UpdateFileSlices {
                file_id: "f1".into(),
                slices,
                timestamp: T0,
            };
            ledger.update_file_slices(&Signed::new(&owner, payload).unwrap())
        };

        // Swapping b for c in one step would drop below replica.
        assert!(update(vec![slice("s1", "a", 0)]).is_err());

        let grown = update(vec![slice("s1", "a", 0), slice("s1", "b", 0), slice("s1", "c", 0)]).unwrap();
        assert_eq!(grown.slices.len(), 3);
        assert_eq!(ledger.list_nodes_expire_slice("c", i64::MAX).unwrap().len(), 1);

        let shed = update(vec![slice("s1", "a", 0), slice("s1", "c", 0)]).unwrap();
        assert_eq!(shed.slices.len(), 2);
        assert!(ledger.list_nodes_expire_slice("b", i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn migrate_records_list_by_source_node() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0)).unwrap();

        let record = SliceMigrateRecord {
            file_id: "f1".into(),
            slice_id: "s1".into(),
            from_node: "a".into(),
            to_node: "c".into(),
            ctime: T0,
        };
        ledger.slice_migrate_record(&Signed::new(&owner, record.clone()).unwrap()).unwrap();
        assert_eq!(ledger.get_slice_migrate_records("a").unwrap(), vec![record]);
        assert!(ledger.get_slice_migrate_records("c").unwrap().is_empty());
    }

    #[test]
    fn migrate_records_keep_each_target_of_one_source() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0)).unwrap();

        let record = |to: &str| SliceMigrateRecord {
            file_id: "f1".into(),
            slice_id: "s1".into(),
            from_node: "a".into(),
            to_node: to.into(),
            ctime: T0,
        };
        for to in ["b", "c"] {
            ledger.slice_migrate_record(&Signed::new(&owner, record(to)).unwrap()).unwrap();
        }
        assert_eq!(ledger.get_slice_migrate_records("a").unwrap().len(), 2);

        // Resubmitting an identical record is accepted once more.
        ledger.slice_migrate_record(&Signed::new(&owner, record("b")).unwrap()).unwrap();
        assert_eq!(ledger.get_slice_migrate_records("a").unwrap().len(), 2);
    }

    #[test]
    fn pending_migrations_are_listed_for_owner() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        let agent = Identity::generate();
        add_ns(&ledger, &owner, "n", 1);
        publish(&ledger, &owner, file(&owner, "f1", "x", vec![slice("s1", "a", 0)], T0)).unwrap();

        let pending = MigrationPending {
            file_id: "f1".into(),
            slice_id: "s1".into(),
            owner: owner.public_key(),
            from_node: "a".into(),
            reporter: agent.public_key(),
            reason: "node offline".into(),
            ctime: T0,
        };
        ledger.record_migration_pending(&Signed::new(&agent, pending.clone()).unwrap()).unwrap();
        assert_eq!(ledger.list_migration_pending(&owner.public_key()).unwrap(), vec![pending]);
    }
}
