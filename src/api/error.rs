//! Unified API error handling.
//!
//! All API errors are returned in a standard JSON envelope with an
//! appropriate HTTP status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::backend::BackendError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    InternalError,
    DatabaseError,
}

impl ErrorCode {
    /// Status and wire label for each code
    fn meta(self) -> (StatusCode, &'static str) {
        use ErrorCode::*;
        match self {
            BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
            Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Conflict => (StatusCode::CONFLICT, "conflict"),
            ValidationError => (StatusCode::BAD_REQUEST, "validation_error"),
            InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            DatabaseError => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }

    pub fn status_code(self) -> StatusCode {
        self.meta().0
    }

    pub fn as_str(self) -> &'static str {
        self.meta().1
    }
}

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Field-level validation errors, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<HashMap<String, Vec<String>>>,
}

macro_rules! constructors {
    ($($name:ident => $code:ident),* $(,)?) => {
        $(pub fn $name(message: impl Into<String>) -> Self {
            Self::new(ErrorCode::$code, message)
        })*
    };
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    constructors! {
        bad_request => BadRequest,
        unauthorized => Unauthorized,
        forbidden => Forbidden,
        not_found => NotFound,
        conflict => Conflict,
        internal => InternalError,
        database => DatabaseError,
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: HashMap<String, Vec<String>>) -> Self {
        let message = match errors.len() {
            1 => errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string()),
            n => format!("Validation failed for {} fields", n),
        };

        Self {
            code: ErrorCode::ValidationError,
            message,
            details: Some(errors),
        }
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::validation(HashMap::from([(field.to_string(), vec![message.into()])]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label) = self.code.meta();
        let body = ErrorResponse {
            error: ErrorBody {
                code: label.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);

        if matches!(err, sqlx::Error::RowNotFound) {
            return ApiError::not_found("Resource not found");
        }
        if let sqlx::Error::Database(db_err) = &err {
            let msg = db_err.message();
            if msg.contains("UNIQUE constraint failed") {
                return ApiError::conflict("A resource with this identifier already exists");
            }
            if msg.contains("FOREIGN KEY constraint failed") {
                return ApiError::bad_request("Referenced resource does not exist");
            }
        }
        ApiError::database("A database error occurred")
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredential(msg) => ApiError::unauthorized(msg),
            BackendError::Rejected(msg) => ApiError::bad_request(msg),
            BackendError::Storage(err) => ApiError::from(err),
            BackendError::Token(err) => {
                tracing::error!("Token error: {}", err);
                ApiError::internal("Failed to issue session tokens")
            }
        }
    }
}

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return Ok(()) if no errors were collected
    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_statuses() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ValidationError.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn single_field_validation_uses_the_message() {
        let err = ApiError::validation_field("email", "Invalid email address");
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("Invalid email address"));
    }

    #[test]
    fn builder_collects_per_field() {
        let mut builder = ValidationErrorBuilder::new();
        builder.add("name", "Name is required");
        builder.add("name", "Name is too short");
        builder.add("role", "Unknown role");
        assert!(!builder.is_empty());

        let err = builder.finish().unwrap_err();
        let details = err.details.unwrap();
        assert_eq!(details.get("name").unwrap().len(), 2);
        assert_eq!(details.get("role").unwrap().len(), 1);
    }

    #[test]
    fn backend_credential_errors_are_unauthorized() {
        let err: ApiError =
            BackendError::InvalidCredential("Login code expired".to_string()).into();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }
}
