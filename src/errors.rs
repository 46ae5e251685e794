use crate::services::{
    execution_store::ExecutionStoreError, remote_store::StoreError, staging_service::StagingError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Problems in the trigger definition. Raised before any remote call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("location `{location}` invalid: {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("regular expression `{pattern}` invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("action MOVE requires a move directory")]
    MissingMoveDirectory,
    #[error("{0}")]
    Invalid(String),
}

/// Failure of one poll cycle. Any of these aborts the cycle as a unit.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("listing `{location}` failed: {source}")]
    List { location: String, source: StoreError },
    #[error("download of `{object}` failed: {source}")]
    Download { object: String, source: StoreError },
    #[error("staging of `{object}` failed: {source}")]
    Staging { object: String, source: io::Error },
    #[error("{action} of `{object}` failed: {source}")]
    Action {
        action: &'static str,
        object: String,
        source: StoreError,
    },
    #[error("MOVE of `{object}` to `{destination}` would overwrite `{other}`")]
    MoveConflict {
        object: String,
        destination: String,
        other: String,
    },
    #[error("poll cycle exceeded {0:?}")]
    Timeout(Duration),
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ExecutionStoreError> for AppError {
    fn from(err: ExecutionStoreError) -> Self {
        match err {
            ExecutionStoreError::NotFound(_) => AppError::not_found(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::InvalidPath => AppError::new(StatusCode::BAD_REQUEST, err.to_string()),
            StagingError::NotFound(_) => AppError::not_found(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}
