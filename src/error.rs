//!
//! # Custom Error Handling
//!
//! This module defines the custom error type `AppError` used by every HTTP handler
//! and by the session middleware.
//!
//! `AppError` implements `actix_web::error::ResponseError` so handlers can return it
//! directly. Two rules apply to the rendered bodies:
//!
//! - every 401 carries the same `{"error": "Unauthorized"}` body, whatever the
//!   underlying reason (missing, expired, forged): the reason is only logged.
//! - internal and database failures are logged with their detail and answered with
//!   a generic 500 body.
//!
//! `From` implementations for `validator::ValidationErrors`, `bcrypt::BcryptError`,
//! [`TokenError`] and [`StoreError`] allow the `?` operator in handlers.

use actix_web::{error::ResponseError, http::StatusCode, HttpRequest, HttpResponse};
use serde_json::json;
use std::fmt;
use validator::ValidationErrors;

use crate::auth::token::TokenError;
use crate::store::StoreError;

/// Body shared by every 401 answered by the auth core.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// Body of every 500.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Represents all possible errors that can occur within the application.
#[derive(Debug)]
pub enum AppError {
    /// Missing, invalid or expired credential (HTTP 401).
    /// The message is for logs only; the response body is uniform.
    Unauthorized(String),
    /// Authenticated but not allowed, e.g. unverified email (HTTP 403).
    Forbidden(String),
    /// Malformed request (HTTP 400).
    BadRequest(String),
    /// Resource already exists, e.g. duplicate email (HTTP 409).
    Conflict(String),
    NotFound(String),
    /// Input failed validation (HTTP 422 Unprocessable Entity).
    ValidationError(String),
    /// Unexpected server-side error (HTTP 500).
    InternalServerError(String),
    /// Error from the persistence layer (HTTP 500).
    DatabaseError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            AppError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database Error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InternalServerError(_) | AppError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Unauthorized(_) => UNAUTHORIZED_MESSAGE,
            AppError::InternalServerError(detail) | AppError::DatabaseError(detail) => {
                log::error!("{}", detail);
                INTERNAL_ERROR_MESSAGE
            }
            AppError::Forbidden(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::NotFound(msg)
            | AppError::ValidationError(msg) => msg.as_str(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(error: ValidationErrors) -> AppError {
        AppError::ValidationError(error.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> AppError {
        AppError::InternalServerError(format!("Password hashing failed: {}", error))
    }
}

/// Verification failures become a uniform 401; signing failures are a 500.
impl From<TokenError> for AppError {
    fn from(error: TokenError) -> AppError {
        match error {
            TokenError::Signing(e) => {
                AppError::InternalServerError(format!("Failed to sign token: {}", e))
            }
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> AppError {
        match error {
            StoreError::EmailTaken => AppError::Conflict("Email already registered".into()),
            StoreError::NotFound => AppError::NotFound("User not found".into()),
            StoreError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

/// Turns JSON extractor failures (missing fields, wrong types) into a 400 with the
/// usual error body.
pub fn json_error_handler(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}
