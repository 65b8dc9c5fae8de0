//! Error types for keepsake

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid or expired code: {0}")]
    InvalidCode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::InvalidCode(_) => "INVALID_CODE",
            ApiError::Upload(_) => "UPLOAD_FAILED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::PermissionDenied(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Auth(_) => "AUTH_ERROR",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Database(_) => "DB_ERROR",
            ApiError::Io(_) | ApiError::Json(_) | ApiError::Internal(_) => "INTERNAL",
        }
    }
}
