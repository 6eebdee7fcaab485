// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::{
    error::{ApiError, ErrorBody},
    state::AppState,
    transport::{PullQuery, PushQuery},
};

const OCTET_STREAM: &str = "application/octet-stream";

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn octets(data: Vec<u8>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, OCTET_STREAM)], data)
}

#[utoipa::path(
    post,
    path = "/v1/slice/push",
    params(PushQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    tag = "Slices",
    responses(
        (status = 200, description = "Slice stored"),
        (status = 400, body = ErrorBody),
        (status = 401, body = ErrorBody)
    )
)]
pub async fn push_slice(
    State(state): State<AppState>,
    params: Result<Query<PushQuery>, QueryRejection>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let params = query(params)?;
    state.node.push_slice(&params, &body)?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/v1/slice/pull",
    params(PullQuery),
    tag = "Slices",
    responses(
        (status = 200, description = "Slice ciphertext", content_type = "application/octet-stream"),
        (status = 401, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn pull_slice(
    State(state): State<AppState>,
    params: Result<Query<PullQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    Ok(octets(state.node.pull_slice(&params)?))
}

#[utoipa::path(
    post,
    path = "/v1/sigmas/push",
    params(PushQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    tag = "Slices",
    responses(
        (status = 200, description = "Authenticators stored"),
        (status = 401, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn push_sigmas(
    State(state): State<AppState>,
    params: Result<Query<PushQuery>, QueryRejection>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let params = query(params)?;
    state.node.push_sigmas(&params, &body)?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/v1/sigmas/pull",
    params(PullQuery),
    tag = "Slices",
    responses(
        (status = 200, description = "Authenticator bundle", content_type = "application/octet-stream"),
        (status = 401, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn pull_sigmas(
    State(state): State<AppState>,
    params: Result<Query<PullQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query(params)?;
    Ok(octets(state.node.pull_sigmas(&params)?))
}
