// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the resource engine.
//!
//! Every failure mode maps to exactly one kind, and every kind maps to one
//! canonical HTTP status. Error bodies carry the full cause chain as an
//! ordered list of messages:
//!
//! ```json
//! {"errors": ["replace failed", "etag mismatch: etag:abc vs etag:def"]}
//! ```
//!
//! Nothing is retried inside the server; the client decides.

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, unknown filter path, bad If-Match token.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or failed credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// An authorization hook refused an otherwise valid operation.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown id or unknown registered type.
    #[error("{0}")]
    NotFound(String),

    /// The Accept header excludes every supported content type.
    #[error("{0}")]
    NotAcceptable(String),

    /// Idempotency in-flight collision.
    #[error("{0}")]
    Conflict(String),

    /// If-Match etag or generation mismatch.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Storage, hashing, or serialization failure.
    #[error("{0}")]
    Internal(String),

    #[error("storage operation failed")]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Canonical HTTP status for this kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Internal(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The ordered cause chain, outermost message first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        let mut out = vec![self.to_string()];
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push(err.to_string());
            cause = err.source();
        }
        out
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "errors": self.messages() });
        (status, axum::Json(body)).into_response()
    }
}
