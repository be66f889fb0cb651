//! Mapping from core and auth errors to HTTP responses.

use api_shared::AuthError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use clinic_core::{CareError, ErrorKind};
use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Coarse error class, e.g. `capacity_exceeded`.
    pub kind: String,
    /// Rule that rejected the request, e.g. `BedOccupied`.
    pub rule: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Care(#[from] CareError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Care(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::InvalidTransition
                | ErrorKind::CapacityExceeded
                | ErrorKind::AlreadyInState
                | ErrorKind::PreconditionFailed
                | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            },
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (kind, rule) = match self {
            ApiError::Care(e) => (e.kind().as_str(), e.rule()),
            ApiError::Auth(AuthError::MissingHeader(_)) => ("unauthenticated", "MissingActor"),
            ApiError::Auth(AuthError::InvalidHeader(_)) => ("unauthenticated", "InvalidActor"),
            ApiError::Task(_) => ("internal", "TaskFailed"),
        };
        let message = match self.status() {
            // Storage details stay in the logs.
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.to_string(),
        };
        ErrorBody {
            kind: kind.to_string(),
            rule: rule.to_string(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
