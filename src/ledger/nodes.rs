// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage node registry, status and heartbeats.

use chrono::DateTime;

use super::index;
use super::kv::WriteBatch;
use super::models::{Heartbeat, Node, NodeRegistration, NodeStatusChange, Signed};
use super::Ledger;
use crate::context::nanos;
use crate::crypto::PublicKey;
use crate::error::{Error, ErrorKind, Result};

/// UTC day (`YYYY-MM-DD`) of a nanosecond timestamp.
pub fn utc_day(ts: i64) -> String {
    DateTime::from_timestamp_nanos(ts).format("%Y-%m-%d").to_string()
}

impl Ledger {
    /// `AddNode`: self-registration, signed by the node key.
    pub fn add_node(&self, req: &Signed<NodeRegistration>) -> Result<Node> {
        let p = &req.payload;
        let key = PublicKey::from_hex(&p.id)?;
        req.verify(&key)?;

        if p.address.is_empty() {
            return Err(Error::bad_param("node address is required"));
        }

        let now = self.now();
        let node = Node {
            id: p.id.clone(),
            name: p.name.clone(),
            address: p.address.clone(),
            online: true,
            reg_time: now,
            update_at: now,
        };
        let mut batch = WriteBatch::new();
        batch
            .create(index::node(&node.id), Self::encode(&node)?)
            .put(index::node_list(now, &node.id), Vec::new());
        self.commit(batch).map_err(|e| {
            if e.is(ErrorKind::AlreadyExists) {
                Error::already_exists(format!("node {}", node.id))
            } else {
                e
            }
        })?;

        tracing::info!(node_id = %node.id, address = %node.address, "node registered");
        Ok(node)
    }

    fn set_online(&self, req: &Signed<NodeStatusChange>, online: bool) -> Result<Node> {
        let p = &req.payload;
        if p.online != online {
            return Err(Error::bad_param("status change does not match operation"));
        }
        let key = index::node(&p.node_id);
        let (mut node, raw) = self.require::<Node>(&key, &format!("node {}", p.node_id))?;
        req.verify(&node.public_key()?)?;

        let now = self.now();
        if online && node.is_online(now, self.heartbeat_timeout()) {
            return Ok(node);
        }
        if !online && !node.online {
            return Ok(node);
        }

        node.online = online;
        node.update_at = now;
        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), Some(raw)).put(key, Self::encode(&node)?);
        self.commit(batch)?;

        tracing::info!(node_id = %node.id, online, "node status changed");
        Ok(node)
    }

    /// `NodeOnline`. A no-op for a node that is already online.
    pub fn node_online(&self, req: &Signed<NodeStatusChange>) -> Result<Node> {
        self.set_online(req, true)
    }

    /// `NodeOffline`.
    pub fn node_offline(&self, req: &Signed<NodeStatusChange>) -> Result<Node> {
        self.set_online(req, false)
    }

    /// `Heartbeat`: refresh liveness and bump the per-day counter.
    pub fn heartbeat(&self, req: &Signed<Heartbeat>) -> Result<Node> {
        let p = &req.payload;
        let key = index::node(&p.node_id);
        let (mut node, raw) = self.require::<Node>(&key, &format!("node {}", p.node_id))?;
        req.verify(&node.public_key()?)?;

        let now = self.now();
        if (now - p.timestamp).abs() > nanos(self.ctx.config.request_skew) {
            return Err(Error::bad_param("heartbeat timestamp outside accepted skew"));
        }
        if p.timestamp < node.update_at {
            return Err(Error::already_updated("stale heartbeat"));
        }

        let day_key = index::heartbeat(&node.id, &utc_day(p.timestamp));
        let current = self.kv.get(&day_key)?;
        let count = current
            .as_deref()
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0);

        node.update_at = p.timestamp;
        let mut batch = WriteBatch::new();
        batch
            .expect(key.clone(), Some(raw))
            .put(key, Self::encode(&node)?)
            .expect(day_key.clone(), current)
            .put(day_key, (count + 1).to_be_bytes().to_vec());
        self.commit(batch)?;
        Ok(node)
    }

    /// `GetHeartbeatNum`: heartbeats from `node_id` on UTC `day`.
    pub fn get_heartbeat_num(&self, node_id: &str, day: &str) -> Result<u64> {
        let count = self
            .kv
            .get(&index::heartbeat(node_id, day))?
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(0);
        Ok(count)
    }

    /// `GetNode`.
    pub fn get_node(&self, node_id: &str) -> Result<Node> {
        Ok(self.require(&index::node(node_id), &format!("node {node_id}"))?.0)
    }

    /// `ListNodes`: newest registration first; `online_only` applies the
    /// heartbeat timeout.
    pub fn list_nodes(&self, online_only: bool) -> Result<Vec<Node>> {
        let now = self.now();
        let timeout = self.heartbeat_timeout();
        let mut nodes = Vec::new();
        for (key, _) in self.scan(&index::node_list_prefix())? {
            let Some(node_id) = index::last_part(&key) else {
                continue;
            };
            if let Some(node) = self.load::<Node>(&index::node(&node_id))? {
                if !online_only || node.is_online(now, timeout) {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    /// Whether `node_id` is registered and online right now.
    pub fn is_node_online(&self, node_id: &str) -> Result<bool> {
        Ok(self
            .load::<Node>(&index::node(node_id))?
            .is_some_and(|n| n.is_online(self.now(), self.heartbeat_timeout())))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::test_support::*;
    use super::*;
    use crate::crypto::Identity;

    fn status(ledger: &Ledger, node: &Identity, online: bool) -> Signed<NodeStatusChange> {
        Signed::new(
            node,
            NodeStatusChange {
                node_id: node.node_id(),
                online,
                timestamp: ledger.now(),
            },
        )
        .unwrap()
    }

    fn beat(ledger: &Ledger, node: &Identity, ts: i64) -> Result<Node> {
        let payload = Heartbeat {
            node_id: node.node_id(),
            timestamp: ts,
        };
        ledger.heartbeat(&Signed::new(node, payload).unwrap())
    }

    #[test]
    fn add_node_twice_yields_already_exists() {
        let (ledger, _) = ledger();
        let node = Identity::generate();
        add_node(&ledger, &node);

        let payload = NodeRegistration {
            id: node.node_id(),
            name: "again".into(),
            address: "http://x".into(),
            timestamp: T0,
        };
        let err = ledger.add_node(&Signed::new(&node, payload).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
    }

    #[test]
    fn add_node_must_be_signed_by_node_key() {
        let (ledger, _) = ledger();
        let node = Identity::generate();
        let other = Identity::generate();
        let payload = NodeRegistration {
            id: node.node_id(),
            name: "n".into(),
            address: "http://x".into(),
            timestamp: T0,
        };
        let err = ledger.add_node(&Signed::new(&other, payload).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn node_online_for_online_node_is_noop() {
        let (ledger, _) = ledger();
        let node = Identity::generate();
        let registered = add_node(&ledger, &node);
        let again = ledger.node_online(&status(&ledger, &node, true)).unwrap();
        assert_eq!(again, registered);
    }

    #[test]
    fn offline_then_online_round_trip() {
        let (ledger, clock) = ledger();
        let node = Identity::generate();
        add_node(&ledger, &node);

        ledger.node_offline(&status(&ledger, &node, false)).unwrap();
        assert!(!ledger.is_node_online(&node.node_id()).unwrap());
        assert!(ledger.list_nodes(true).unwrap().is_empty());

        clock.advance(Duration::from_secs(5));
        ledger.node_online(&status(&ledger, &node, true)).unwrap();
        assert!(ledger.is_node_online(&node.node_id()).unwrap());
    }

    #[test]
    fn heartbeat_lapse_marks_node_offline() {
        let (ledger, clock) = ledger();
        let node = Identity::generate();
        add_node(&ledger, &node);
        assert_eq!(ledger.list_nodes(true).unwrap().len(), 1);

        clock.advance(Duration::from_secs(91));
        assert!(ledger.list_nodes(true).unwrap().is_empty());
        assert_eq!(ledger.list_nodes(false).unwrap().len(), 1);

        beat(&ledger, &node, ledger.now()).unwrap();
        assert_eq!(ledger.list_nodes(true).unwrap().len(), 1);
    }

    #[test]
    fn heartbeats_are_counted_per_day() {
        let (ledger, clock) = ledger();
        let node = Identity::generate();
        add_node(&ledger, &node);

        for _ in 0..3 {
            clock.advance(Duration::from_secs(30));
            beat(&ledger, &node, ledger.now()).unwrap();
        }
        let day = utc_day(ledger.now());
        assert_eq!(ledger.get_heartbeat_num(&node.node_id(), &day).unwrap(), 3);
        assert_eq!(ledger.get_heartbeat_num(&node.node_id(), "1999-01-01").unwrap(), 0);
    }

    #[test]
    fn stale_or_skewed_heartbeats_are_rejected() {
        let (ledger, clock) = ledger();
        let node = Identity::generate();
        add_node(&ledger, &node);
        clock.advance(Duration::from_secs(10));
        beat(&ledger, &node, ledger.now()).unwrap();

        let stale = beat(&ledger, &node, ledger.now() - 1).unwrap_err();
        assert_eq!(stale.kind, ErrorKind::AlreadyUpdated);

        let skewed = beat(&ledger, &node, ledger.now() + nanos(Duration::from_secs(3600))).unwrap_err();
        assert_eq!(skewed.kind, ErrorKind::BadParam);
    }

    #[test]
    fn utc_day_formats_date() {
        assert_eq!(utc_day(0), "1970-01-01");
        assert_eq!(utc_day(T0), "2023-11-14");
    }
}
