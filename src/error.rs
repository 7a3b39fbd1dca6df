//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Voter {0} is not part of this proposal's roster snapshot")]
    NotEligible(String),

    #[error("A reject vote requires a non-empty comment")]
    MissingReason,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Proposal already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Display order {order} already taken in level {level} / {category}")]
    DuplicateOrder {
        level: u32,
        category: String,
        order: u32,
    },

    #[error("A migration run is already in progress")]
    MigrationInProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotEligible(_) => "NOT_ELIGIBLE",
            AppError::MissingReason => "MISSING_REASON",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::AlreadyResolved(_) => "ALREADY_RESOLVED",
            AppError::DuplicateOrder { .. } => "DUPLICATE_ORDER",
            AppError::MigrationInProgress => "MIGRATION_IN_PROGRESS",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            AppError::Store(StoreError::Conflict(_)) => "CONFLICT",
            AppError::Store(StoreError::StaleState { .. }) => "STALE_STATE",
            AppError::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            AppError::Store(StoreError::Query(_)) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotEligible(_) => StatusCode::FORBIDDEN,
            AppError::MissingReason | AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::InvalidTransition(_)
            | AppError::InvalidState(_)
            | AppError::AlreadyResolved(_)
            | AppError::DuplicateOrder { .. }
            | AppError::MigrationInProgress
            | AppError::Store(StoreError::Conflict(_))
            | AppError::Store(StoreError::StaleState { .. }) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(StoreError::Query(_)) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Server-side failures keep their details out of the message
        let (message, details) = match &self {
            AppError::Store(StoreError::Query(msg)) => {
                error!("Database error: {}", msg);
                ("A database error occurred".to_string(), Some(msg.clone()))
            }
            AppError::Store(StoreError::Unavailable(msg)) => {
                error!("Store unavailable: {}", msg);
                ("The content store is unavailable".to_string(), Some(msg.clone()))
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), Some(msg.clone()))
            }
            other => (other.to_string(), None),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governance_errors_map_to_conflict() {
        assert_eq!(
            AppError::InvalidTransition("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::AlreadyResolved("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::MigrationInProgress.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::DuplicateOrder {
                level: 1,
                category: "theoretical".into(),
                order: 2
            }
            .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_store_errors_keep_their_codes() {
        let unavailable = AppError::from(StoreError::Unavailable("pool closed".into()));
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.code(), "STORE_UNAVAILABLE");

        let missing = AppError::from(StoreError::NotFound("proposal".into()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_caller_fixable_errors() {
        assert_eq!(AppError::MissingReason.code(), "MISSING_REASON");
        assert_eq!(
            AppError::MissingReason.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::NotEligible("a".into()).code(), "NOT_ELIGIBLE");
    }
}
