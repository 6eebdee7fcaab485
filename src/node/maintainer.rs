// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Node Maintainer
//!
//! Keeps this node's ledger presence current:
//! 1. On startup, `AddNode` if the node is unknown, `NodeOnline` if it was
//!    set offline.
//! 2. Every `heartbeat_interval`, a signed `Heartbeat`.
//! 3. On shutdown, `NodeOffline`.
//!
//! `AlreadyExists` and `AlreadyUpdated` from the ledger are treated as
//! success so restarts and concurrent retries converge.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{nanos, CoreContext};
use crate::crypto::Identity;
use crate::error::{ErrorKind, Result};
use crate::ledger::{Heartbeat, Ledger, Node, NodeRegistration, NodeStatusChange, Signed};

pub struct NodeMaintainer {
    identity: Arc<Identity>,
    name: String,
    address: String,
    ledger: Ledger,
    ctx: CoreContext,
}

impl NodeMaintainer {
    pub fn new(
        identity: Arc<Identity>,
        name: impl Into<String>,
        address: impl Into<String>,
        ledger: Ledger,
        ctx: CoreContext,
    ) -> Self {
        Self {
            identity,
            name: name.into(),
            address: address.into(),
            ledger,
            ctx,
        }
    }

    pub fn node_id(&self) -> String {
        self.identity.node_id()
    }

    /// Make sure the node is registered and marked online.
    pub fn register(&self) -> Result<Node> {
        let node_id = self.node_id();
        match self.ledger.get_node(&node_id) {
            Ok(node) if node.is_online(self.ctx.now(), nanos(self.ctx.config.heartbeat_timeout)) => Ok(node),
            Ok(_) => self.set_online(true),
            Err(e) if e.is(ErrorKind::NotFound) => {
                let payload = NodeRegistration {
                    id: node_id.clone(),
                    name: self.name.clone(),
                    address: self.address.clone(),
                    timestamp: self.ctx.now(),
                };
                match self.ledger.add_node(&Signed::new(&self.identity, payload)?) {
                    Ok(node) => Ok(node),
                    Err(e) if e.is(ErrorKind::AlreadyExists) => self.ledger.get_node(&node_id),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn set_online(&self, online: bool) -> Result<Node> {
        let payload = NodeStatusChange {
            node_id: self.node_id(),
            online,
            timestamp: self.ctx.now(),
        };
        let signed = Signed::new(&self.identity, payload)?;
        let result = if online {
            self.ledger.node_online(&signed)
        } else {
            self.ledger.node_offline(&signed)
        };
        match result {
            Err(e) if e.is(ErrorKind::AlreadyUpdated) => self.ledger.get_node(&self.node_id()),
            other => other,
        }
    }

    pub fn heartbeat(&self) -> Result<Node> {
        let payload = Heartbeat {
            node_id: self.node_id(),
            timestamp: self.ctx.now(),
        };
        match self.ledger.heartbeat(&Signed::new(&self.identity, payload)?) {
            Err(e) if e.is(ErrorKind::AlreadyUpdated) => self.ledger.get_node(&self.node_id()),
            other => other,
        }
    }

    pub fn go_offline(&self) -> Result<Node> {
        self.set_online(false)
    }

    /// Heartbeat until cancelled, then announce `NodeOffline`.
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.ctx.config.heartbeat_interval;
        info!(
            node_id = %self.node_id(),
            interval_secs = interval.as_secs(),
            "Node maintainer starting"
        );

        if let Err(e) = self.register() {
            warn!(node_id = %self.node_id(), error = %e, "Node maintainer: registration failed");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => break,
            }
            if let Err(e) = self.heartbeat() {
                warn!(node_id = %self.node_id(), error = %e, "Node maintainer: heartbeat failed");
                if e.is(ErrorKind::BadParam) || e.is(ErrorKind::NotFound) {
                    if let Err(e) = self.register() {
                        warn!(error = %e, "Node maintainer: re-registration failed");
                    }
                }
            }
        }

        match self.go_offline() {
            Ok(_) => info!(node_id = %self.node_id(), "Node maintainer shutting down"),
            Err(e) => warn!(node_id = %self.node_id(), error = %e, "Node maintainer: offline announcement failed"),
        }
    }
}
