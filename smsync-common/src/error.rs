//! Common error types for smsync

use thiserror::Error;

/// Common result type for smsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the backend service and its pipelines
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP request error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Slack export archive is malformed or unreadable
    #[error("Archive error: {0}")]
    Archive(String),

    /// Upstream service (Mattermost/Slack) rejected a request
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
