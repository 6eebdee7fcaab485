// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};

use crate::node::NodeHealth;
use crate::state::AppState;

/// Health check endpoint handler.
///
/// Returns 200 when both the object store and the ledger answer, 503
/// otherwise.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Node is healthy", body = NodeHealth),
        (status = 503, description = "Node is degraded", body = NodeHealth)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<NodeHealth>) {
    let report = state.node.health();
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
