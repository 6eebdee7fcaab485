// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::node::NodeService;

/// Shared state of the blob API handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub node: NodeService,
}

impl AppState {
    pub fn new(node: NodeService) -> Self {
        Self { node }
    }
}
