//! # Sync Errors
//!
//! Every error leaving the sync server renders as `{ "code", "message" }`
//! with an HTTP status picked from the error category.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{ErrorKind, LixError};

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync protocol errors
#[derive(Debug, Error)]
pub enum SyncError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// No instance with this lix id is hosted
    #[error("lix '{0}' not found")]
    LixNotFound(String),

    /// `new` for an id that is already hosted
    #[error("lix '{0}' already exists")]
    LixExists(String),

    /// The query route only runs reads
    #[error("mutating queries are not allowed on the query route")]
    MutationNotAllowed,

    /// Malformed request body
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // ==================
    // Engine
    // ==================
    #[error(transparent)]
    Engine(#[from] LixError),

    // ==================
    // Transport
    // ==================
    /// Error reported by the remote side
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    /// Instance persistence failed
    #[error("{0}")]
    Internal(String),
}

impl SyncError {
    /// Stable error code
    pub fn code(&self) -> &str {
        match self {
            SyncError::LixNotFound(_) => "NOT_FOUND",
            SyncError::LixExists(_) => "ALREADY_EXISTS",
            SyncError::MutationNotAllowed => "MUTATION_QUERY_NOT_ALLOWED",
            SyncError::InvalidRequest(_) => "INVALID_REQUEST",
            SyncError::Engine(err) => err.code(),
            SyncError::Remote { code, .. } => code,
            SyncError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::LixNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::LixExists(_) => StatusCode::CONFLICT,
            SyncError::MutationNotAllowed => StatusCode::BAD_REQUEST,
            SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::Engine(err) => match err.kind() {
                ErrorKind::Validation | ErrorKind::Unsupported => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Structural => StatusCode::CONFLICT,
                ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            },
            SyncError::Remote { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuild an error from a response body
    pub fn from_body(body: ErrorBody) -> Self {
        SyncError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

/// Error response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&SyncError> for ErrorBody {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody::from(&self));
        (status, body).into_response()
    }
}
