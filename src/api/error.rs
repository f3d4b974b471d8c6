//! Error types for the HTTP gateway.

use super::types::StatusResponse;
use crate::container::{ErrorKind, OrchestratorError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Lifecycle operation failed
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Request body could not be decoded
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    /// No route matches the request
    #[error("No such route: {0}")]
    RouteNotFound(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::Orchestrator(err) => match err.kind() {
                ErrorKind::InvalidArgument | ErrorKind::AlreadyExists => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict | ErrorKind::InvalidState => StatusCode::CONFLICT,
                ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::RuntimeFailure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(StatusResponse::error(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerState;
    use crate::container::Operation;
    use crate::runtime::RuntimeError;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                OrchestratorError::InvalidArgument("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::AlreadyExists("web1".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::NotFound("web1".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestratorError::Conflict("running".into()),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::InvalidState {
                    name: "web1".into(),
                    state: ContainerState::Creating,
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::Busy {
                    name: "web1".into(),
                    reason: "locked".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::runtime(
                    Operation::Create,
                    "web1",
                    "failed to create container",
                    RuntimeError::Other("boom".into()),
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
        assert_eq!(
            ApiError::BadRequest("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RouteNotFound("GET /nope".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_runtime_failure_message_wraps_cause() {
        let err = ApiError::from(OrchestratorError::runtime(
            Operation::Destroy,
            "web1",
            "failed to destroy container",
            RuntimeError::Other("device busy".into()),
        ));
        assert_eq!(err.to_string(), "failed to destroy container: device busy");
    }
}
