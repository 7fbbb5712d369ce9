//! Error type system for the book API
//!
//! This module provides:
//! - One error enum shared by repositories, services and handlers
//! - HTTP status code mapping
//! - Classification of SQLite constraint failures through a lookup table
//! - JSON error bodies carrying a trace ID

use crate::api::middleware::trace::current_trace_id;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::ffi;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::raw::c_int;
use uuid::Uuid;

/// Main error type for the book API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    DatabaseError(rusqlite::Error),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Constraint errors
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    // Resource-related errors
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Mail error: {0}")]
    MailError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

/// How a failed statement should be reported to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFailure {
    Duplicate,
    MissingReference,
    InvalidValue,
}

/// SQLite extended result codes and what they mean for a client
const CONSTRAINT_CODES: &[(c_int, DbFailure)] = &[
    (ffi::SQLITE_CONSTRAINT_UNIQUE, DbFailure::Duplicate),
    (ffi::SQLITE_CONSTRAINT_PRIMARYKEY, DbFailure::Duplicate),
    (ffi::SQLITE_CONSTRAINT_FOREIGNKEY, DbFailure::MissingReference),
    (ffi::SQLITE_CONSTRAINT_NOTNULL, DbFailure::InvalidValue),
    (ffi::SQLITE_CONSTRAINT_CHECK, DbFailure::InvalidValue),
];

/// Look up the failure kind for an extended result code
pub fn classify_constraint(extended_code: c_int) -> Option<DbFailure> {
    CONSTRAINT_CODES
        .iter()
        .find(|(code, _)| *code == extended_code)
        .map(|(_, failure)| *failure)
}

impl ApiError {
    /// Translate a rusqlite error, turning constraint failures into client errors
    pub fn from_db(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                ApiError::NotFound("Record not found".to_string())
            }
            rusqlite::Error::SqliteFailure(inner, message) => {
                let detail = message.clone().unwrap_or_else(|| inner.to_string());
                match classify_constraint(inner.extended_code) {
                    Some(DbFailure::Duplicate) => ApiError::Conflict(detail),
                    Some(DbFailure::MissingReference) => ApiError::InvalidReference(detail),
                    Some(DbFailure::InvalidValue) => ApiError::ValidationError(detail),
                    None => ApiError::DatabaseError(err),
                }
            }
            _ => ApiError::DatabaseError(err),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ApiError::InvalidRequest(_)
            | ApiError::ValidationError(_)
            | ApiError::InvalidReference(_)
            | ApiError::SerializationError(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            ApiError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            ApiError::Conflict(_) => StatusCode::CONFLICT,

            // 413 Payload Too Large
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,

            // 500 Internal Server Error
            ApiError::DatabaseError(_)
            | ApiError::IoError(_)
            | ApiError::CacheError(_)
            | ApiError::NotificationError(_)
            | ApiError::MailError(_)
            | ApiError::TaskError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::DatabaseError(_) => "DatabaseError",
            ApiError::InvalidRequest(_) => "InvalidRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::AuthenticationError(_) => "AuthenticationError",
            ApiError::PermissionDenied(_) => "PermissionDenied",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InvalidReference(_) => "InvalidReference",
            ApiError::PayloadTooLarge(_) => "PayloadTooLarge",
            ApiError::IoError(_) => "IoError",
            ApiError::SerializationError(_) => "SerializationError",
            ApiError::CacheError(_) => "CacheError",
            ApiError::NotificationError(_) => "NotificationError",
            ApiError::MailError(_) => "MailError",
            ApiError::TaskError(_) => "TaskError",
        }
    }

    /// Internal failures carry driver details that should not leak to clients
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::from_db(err)
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::CacheError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::SerializationError(err.to_string())
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response tagged with the current request's trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            details: None,
            trace_id: current_trace_id().unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    /// Create an error response with additional details
    pub fn with_details(error: String, message: String, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(error, message)
        }
    }

    /// Create an error response from an ApiError
    pub fn from_error(error: &ApiError) -> Self {
        Self::new(error.error_type().to_string(), error.public_message())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (trace_id: {})",
            self.error, self.message, self.trace_id
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        if status_code.is_server_error() {
            tracing::error!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request failed: {}",
                self
            );
        } else {
            tracing::debug!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request rejected: {}",
                self
            );
        }

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with ApiError
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint_error(extended_code: c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::ConstraintViolation,
                extended_code,
            },
            Some("constraint failed".to_string()),
        )
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::InvalidRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AuthenticationError("test".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::PermissionDenied("test".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("test".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("test".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::PayloadTooLarge("test".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::DatabaseError(rusqlite::Error::InvalidQuery).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_constraint_lookup_table() {
        assert_eq!(
            classify_constraint(ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some(DbFailure::Duplicate)
        );
        assert_eq!(
            classify_constraint(ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            Some(DbFailure::MissingReference)
        );
        assert_eq!(classify_constraint(ffi::SQLITE_BUSY), None);
    }

    #[test]
    fn test_from_db_maps_constraints() {
        let err = ApiError::from_db(constraint_error(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = ApiError::from_db(constraint_error(ffi::SQLITE_CONSTRAINT_FOREIGNKEY));
        assert!(matches!(err, ApiError::InvalidReference(_)));

        let err = ApiError::from_db(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = ApiError::from_db(rusqlite::Error::InvalidQuery);
        assert!(matches!(err, ApiError::DatabaseError(_)));
    }

    #[test]
    fn test_error_response_hides_internal_details() {
        let error = ApiError::DatabaseError(rusqlite::Error::InvalidQuery);
        let response = ErrorResponse::from_error(&error);
        assert_eq!(response.error, "DatabaseError");
        assert_eq!(response.message, "Internal server error");

        let error = ApiError::NotFound("Book 42".into());
        let response = ErrorResponse::from_error(&error);
        assert!(response.message.contains("Book 42"));
        assert!(!response.trace_id.is_empty());
        assert!(response.details.is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let details = serde_json::json!({ "field": "isbn" });
        let response =
            ErrorResponse::with_details("Conflict".into(), "Duplicate".into(), details.clone());
        assert_eq!(response.details, Some(details));
    }
}
