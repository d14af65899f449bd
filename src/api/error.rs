//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::container::ContainerError;
use crate::engine::EngineError;
use crate::models::ErrorResponse;
use crate::tty::TtyError;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Engine timeout: {0}")]
    Timeout(String),

    #[error("Engine error: {0}")]
    BadGateway(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "ENGINE_TIMEOUT", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "ENGINE_ERROR", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(ErrorResponse::new(error_code, message));
        (status, body).into_response()
    }
}

impl ApiError {
    /// Classify by the engine failure, keeping the caller-facing message
    fn from_engine(source: &EngineError, message: String) -> Self {
        match source {
            EngineError::NotFound(_) => ApiError::NotFound(message),
            EngineError::Timeout { .. } => ApiError::Timeout(message),
            _ => ApiError::BadGateway(message),
        }
    }
}

impl From<ContainerError> for ApiError {
    fn from(err: ContainerError) -> Self {
        let message = err.to_string();
        match &err {
            _ if err.is_validation() => ApiError::BadRequest(message),
            ContainerError::PortUnavailable { .. } => ApiError::Conflict(message),
            ContainerError::Engine { source, .. } => ApiError::from_engine(source, message),
            _ => {
                tracing::error!(error = %err, "Internal error");
                ApiError::Internal(message)
            }
        }
    }
}

impl From<TtyError> for ApiError {
    fn from(err: TtyError) -> Self {
        let message = err.to_string();
        match &err {
            TtyError::MissingContainerId => ApiError::BadRequest(message),
            TtyError::SessionSetup { source, .. } => ApiError::from_engine(source, message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Internal error");
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::PortRole;
    use std::time::Duration;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_container_error_status_mapping() {
        assert_eq!(
            status_of(ContainerError::InvalidPort {
                role: PortRole::Jupyter,
                value: "x".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ContainerError::PortUnavailable {
                role: PortRole::Ssh,
                port: 2222
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ContainerError::engine("inspect stats of container", Some("nope"))(
                EngineError::NotFound("No such container: nope".into())
            )),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ContainerError::engine("list images", None)(EngineError::Timeout {
                operation: "list_images",
                after: Duration::from_secs(60),
            })),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(ContainerError::engine("start container", Some("abc"))(
                EngineError::Api {
                    status: 500,
                    message: "driver failed".into()
                }
            )),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_tty_error_status_mapping() {
        assert_eq!(status_of(TtyError::MissingContainerId), StatusCode::BAD_REQUEST);
    }
}
