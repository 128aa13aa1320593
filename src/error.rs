//! Request-facing error type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::jobs::StoreError;

/// Errors surfaced synchronously to consultation callers.
///
/// Background failures never appear here; they are stored as run records.
#[derive(Debug, thiserror::Error)]
pub enum ConsultError {
    /// The request was rejected before reaching the team runtime.
    #[error("{0}")]
    InvalidInput(String),

    /// No run is registered under the identifier.
    #[error("run {0} not found")]
    NotFound(String),

    /// The team runtime or the gateway failed while handling the request.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ConsultError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ConsultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(run_id) => Self::NotFound(run_id),
            conflict @ StoreError::Conflict { .. } => Self::Internal(conflict.into()),
        }
    }
}

impl IntoResponse for ConsultError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Consultation request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
