//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tamanu_sync_protocol::{ErrorBody, ProtocolError};
use tamanu_sync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Bearer token missing, malformed, tampered or expired.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No live row to act on.
    #[error("not found: {0}")]
    NotFound(String),

    /// Push body holds more records than allowed.
    #[error("push of {count} records exceeds the limit of {max}")]
    BatchTooLarge {
        /// Records in the request.
        count: usize,
        /// Configured maximum.
        max: u32,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotFound(_)
                | ServerError::BatchTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::BatchTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::NotFound("p1".into()).is_client_error());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServerError::BatchTooLarge { count: 5, max: 2 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::AuthenticationFailed("expired".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Config("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn protocol_errors_are_bad_requests() {
        let err: ServerError = ProtocolError::MissingId.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
