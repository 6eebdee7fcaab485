// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process [`SliceTransport`] routing calls straight to node services.
//!
//! Used by the test cluster; a node marked down answers every call with a
//! `Network` error, like an unreachable host.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{PullQuery, PushQuery, SliceTransport};
use crate::error::{Error, Result};
use crate::ledger::Node;
use crate::node::NodeService;

#[derive(Debug, Default)]
pub struct LocalTransport {
    nodes: RwLock<BTreeMap<String, NodeService>>,
    down: RwLock<BTreeSet<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: NodeService) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(service.node_id().to_string(), service);
        }
    }

    /// Make a node unreachable (`true`) or reachable again.
    pub fn set_down(&self, node_id: &str, down: bool) {
        if let Ok(mut set) = self.down.write() {
            if down {
                set.insert(node_id.to_string());
            } else {
                set.remove(node_id);
            }
        }
    }

    fn service(&self, node: &Node) -> Result<NodeService> {
        let down = self
            .down
            .read()
            .map_err(|_| Error::internal("transport lock poisoned"))?;
        if down.contains(&node.id) {
            return Err(Error::network(format!("node {} is unreachable", node.id)));
        }
        self.nodes
            .read()
            .map_err(|_| Error::internal("transport lock poisoned"))?
            .get(&node.id)
            .cloned()
            .ok_or_else(|| Error::network(format!("no route to node {}", node.id)))
    }
}

#[async_trait]
impl SliceTransport for LocalTransport {
    async fn push_slice(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()> {
        self.service(node)?.push_slice(query, &body)
    }

    async fn pull_slice(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>> {
        self.service(node)?.pull_slice(query)
    }

    async fn push_sigmas(&self, node: &Node, query: &PushQuery, body: Vec<u8>) -> Result<()> {
        self.service(node)?.push_sigmas(query, &body)
    }

    async fn pull_sigmas(&self, node: &Node, query: &PullQuery) -> Result<Vec<u8>> {
        self.service(node)?.pull_sigmas(query)
    }
}
