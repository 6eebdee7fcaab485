// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage node runtime.
//!
//! - [`service`]: signed push/pull checks over the local object store
//! - [`maintainer`]: registration, heartbeats, offline on shutdown
//! - [`clearer`]: eviction of expired, reassigned and orphaned slices
//! - [`prover`]: answers PDP challenges aimed at this node

pub mod clearer;
pub mod maintainer;
pub mod prover;
pub mod service;

pub use clearer::{ClearReport, SliceClearer};
pub use maintainer::NodeMaintainer;
pub use prover::NodeProver;
pub use service::{NodeHealth, NodeService, StoredSliceMeta};
