//! API error types
//!
//! Failures surface to the dashboard as `{"error": "..."}` bodies with a
//! matching status code. The upload endpoint is the one deliberate
//! exception (200 with an error body) and builds its response by hand.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("{0}")]
    BadRequest(String),

    /// Upstream Mattermost/Slack failure (502)
    #[error("{0}")]
    BadGateway(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<smsync_common::Error> for ApiError {
    fn from(err: smsync_common::Error) -> Self {
        use smsync_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) | Error::Config(msg) => ApiError::BadRequest(msg),
            Error::Upstream(msg) => ApiError::BadGateway(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::Other(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_mapping() {
        let err: ApiError = smsync_common::Error::NotFound("bundle".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = smsync_common::Error::Config("MM_URL not set".into()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = smsync_common::Error::Upstream("plugin rejected".into()).into();
        assert!(matches!(err, ApiError::BadGateway(_)));

        let err: ApiError = smsync_common::Error::Internal("boom".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
