// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error kinds shared by every component.
//!
//! Component operations return [`Result<T>`]; the HTTP surface converts an
//! [`Error`] into an [`ApiError`] carrying a stable `code` and a
//! human-readable `message`.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Concept-level error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadParam,
    /// Signature check failed or the signer is not allowed to act.
    Unauthorized,
    NotFound,
    /// Create conflict.
    AlreadyExists,
    /// Idempotent repeat of an update that already happened.
    AlreadyUpdated,
    /// Decrypt or proof verification failed.
    Crypto,
    BadSignature,
    WriteLedger,
    ReadLedger,
    /// Blob transport failure; the only kind retried locally.
    Network,
    InsufficientNodes,
    SliceUnrecoverable,
    PushFailed,
    LedgerConflict,
    Internal,
}

impl ErrorKind {
    /// Stable code exposed to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadParam => "bad_param",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::AlreadyUpdated => "already_updated",
            ErrorKind::Crypto => "crypto",
            ErrorKind::BadSignature => "bad_signature",
            ErrorKind::WriteLedger => "write_ledger",
            ErrorKind::ReadLedger => "read_ledger",
            ErrorKind::Network => "network",
            ErrorKind::InsufficientNodes => "insufficient_nodes",
            ErrorKind::SliceUnrecoverable => "slice_unrecoverable",
            ErrorKind::PushFailed => "push_failed",
            ErrorKind::LedgerConflict => "ledger_conflict",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse a code produced by [`ErrorKind::code`].
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "bad_param" => ErrorKind::BadParam,
            "unauthorized" => ErrorKind::Unauthorized,
            "not_found" => ErrorKind::NotFound,
            "already_exists" => ErrorKind::AlreadyExists,
            "already_updated" => ErrorKind::AlreadyUpdated,
            "crypto" => ErrorKind::Crypto,
            "bad_signature" => ErrorKind::BadSignature,
            "write_ledger" => ErrorKind::WriteLedger,
            "read_ledger" => ErrorKind::ReadLedger,
            "network" => ErrorKind::Network,
            "insufficient_nodes" => ErrorKind::InsufficientNodes,
            "slice_unrecoverable" => ErrorKind::SliceUnrecoverable,
            "push_failed" => ErrorKind::PushFailed,
            "ledger_conflict" => ErrorKind::LedgerConflict,
            "internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }

    /// HTTP status used when this kind crosses the blob API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::BadParam => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized | ErrorKind::BadSignature => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists | ErrorKind::AlreadyUpdated | ErrorKind::LedgerConflict => {
                StatusCode::CONFLICT
            }
            ErrorKind::Crypto => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Network => StatusCode::BAD_GATEWAY,
            ErrorKind::InsufficientNodes | ErrorKind::SliceUnrecoverable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::WriteLedger
            | ErrorKind::ReadLedger
            | ErrorKind::PushFailed
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Core error: a kind plus the underlying cause as text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadParam, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn already_updated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyUpdated, message)
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Crypto, message)
    }

    pub fn bad_signature(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadSignature, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal(format!("serialization error: {e}"))
    }
}

/// Error returned by the blob API handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

/// `{code, message}` body of every blob API error.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::BadParam.code(), message)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::new(e.kind.status_code(), e.kind.code(), e.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            code: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}
