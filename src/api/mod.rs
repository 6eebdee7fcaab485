// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{error::ErrorBody, node::NodeHealth, state::AppState};

pub mod health;
pub mod slices;

/// Room for the GCM tag and the sigma bundle on top of one slice.
const BODY_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.node.context().config.slice_size + BODY_OVERHEAD;

    let v1_routes = Router::new()
        .route("/slice/push", post(slices::push_slice))
        .route("/slice/pull", get(slices::pull_slice))
        .route("/sigmas/push", post(slices::push_sigmas))
        .route("/sigmas/pull", get(slices::pull_sigmas))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        slices::push_slice,
        slices::pull_slice,
        slices::push_sigmas,
        slices::pull_sigmas,
        health::health
    ),
    components(schemas(ErrorBody, NodeHealth)),
    tags(
        (name = "Slices", description = "Signed slice and authenticator transfer"),
        (name = "Health", description = "Node health")
    )
)]
struct ApiDoc;
