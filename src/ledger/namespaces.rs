// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Namespaces: per-owner file groups carrying the replica factor.

use super::index;
use super::kv::{KvError, WriteBatch};
use super::models::{AddNamespace, Namespace, Signed, UpdateNsReplica};
use super::Ledger;
use crate::crypto::PublicKey;
use crate::error::{Error, Result};

impl Ledger {
    /// `AddFileNs`.
    pub fn add_file_ns(&self, req: &Signed<AddNamespace>) -> Result<Namespace> {
        let p = &req.payload;
        req.verify(&p.owner)?;

        if p.name.is_empty() {
            return Err(Error::bad_param("namespace name is required"));
        }
        index::check_part("namespace name", &p.name)?;
        if p.replica == 0 {
            return Err(Error::bad_param("replica must be at least 1"));
        }

        let now = self.now();
        let ns = Namespace {
            owner: p.owner,
            name: p.name.clone(),
            replica: p.replica,
            file_total_num: 0,
            create_time: now,
            update_time: now,
            description: p.description.clone(),
        };
        self.kv
            .put_if_absent(&index::namespace(&p.owner.to_hex(), &p.name), &Self::encode(&ns)?)
            .map_err(|e| match e {
                KvError::Exists(_) => Error::already_exists(format!("namespace {}", p.name)),
                other => other.into(),
            })?;
        Ok(ns)
    }

    /// `UpdateNsReplica`: raise the replica factor. Lowering is refused.
    pub fn update_ns_replica(&self, req: &Signed<UpdateNsReplica>) -> Result<Namespace> {
        let p = &req.payload;
        req.verify(&p.owner)?;

        let key = index::namespace(&p.owner.to_hex(), &p.name);
        let (mut ns, raw) = self.require::<Namespace>(&key, &format!("namespace {}", p.name))?;
        if p.replica == ns.replica {
            return Err(Error::already_updated(format!("namespace {} replica unchanged", p.name)));
        }
        if p.replica < ns.replica {
            return Err(Error::bad_param("replica can only be increased"));
        }

        ns.replica = p.replica;
        ns.update_time = self.now();
        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), Some(raw)).put(key, Self::encode(&ns)?);
        self.commit(batch)?;

        tracing::info!(namespace = %ns.name, replica = ns.replica, "namespace replica raised");
        Ok(ns)
    }

    /// `ListFileNs`.
    pub fn list_file_ns(&self, owner: &PublicKey) -> Result<Vec<Namespace>> {
        self.scan_values(&index::namespace_prefix(&owner.to_hex()))
    }

    /// `GetNsByName`.
    pub fn get_ns_by_name(&self, owner: &PublicKey, name: &str) -> Result<Namespace> {
        Ok(self
            .require(&index::namespace(&owner.to_hex(), name), &format!("namespace {name}"))?
            .0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::crypto::Identity;
    use crate::error::ErrorKind;

    fn raise(ledger: &Ledger, owner: &Identity, replica: u32) -> Result<Namespace> {
        let payload = UpdateNsReplica {
            owner: owner.public_key(),
            name: "n".into(),
            replica,
            timestamp: T0,
        };
        ledger.update_ns_replica(&Signed::new(owner, payload).unwrap())
    }

    #[test]
    fn separator_in_namespace_name_is_rejected() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        let ns = AddNamespace {
            owner: owner.public_key(),
            name: "a\0b".into(),
            replica: 1,
            description: String::new(),
            timestamp: T0,
        };
        let err = ledger.add_file_ns(&Signed::new(&owner, ns).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParam);
        assert!(ledger.list_file_ns(&owner.public_key()).unwrap().is_empty());
    }

    #[test]
    fn namespace_create_is_put_if_absent() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 2);

        let again = AddNamespace {
            owner: owner.public_key(),
            name: "n".into(),
            replica: 3,
            description: String::new(),
            timestamp: T0,
        };
        let err = ledger.add_file_ns(&Signed::new(&owner, again).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(ledger.get_ns_by_name(&owner.public_key(), "n").unwrap().replica, 2);
    }

    #[test]
    fn zero_replica_is_rejected() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        let payload = AddNamespace {
            owner: owner.public_key(),
            name: "n".into(),
            replica: 0,
            description: String::new(),
            timestamp: T0,
        };
        assert!(ledger.add_file_ns(&Signed::new(&owner, payload).unwrap()).is_err());
    }

    #[test]
    fn replica_only_increases() {
        let (ledger, _) = ledger();
        let owner = Identity::generate();
        add_ns(&ledger, &owner, "n", 2);

        assert_eq!(raise(&ledger, &owner, 3).unwrap().replica, 3);
        assert_eq!(raise(&ledger, &owner, 3).unwrap_err().kind, ErrorKind::AlreadyUpdated);
        assert_eq!(raise(&ledger, &owner, 1).unwrap_err().kind, ErrorKind::BadParam);
    }

    #[test]
    fn list_is_scoped_to_owner() {
        let (ledger, _) = ledger();
        let a = Identity::generate();
        let b = Identity::generate();
        add_ns(&ledger, &a, "n1", 1);
        add_ns(&ledger, &a, "n2", 1);
        add_ns(&ledger, &b, "n1", 1);

        let names: Vec<_> = ledger
            .list_file_ns(&a.public_key())
            .unwrap()
            .into_iter()
            .map(|ns| ns.name)
            .collect();
        assert_eq!(names, vec!["n1", "n2"]);
    }
}
