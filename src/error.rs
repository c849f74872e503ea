//!
//! # Custom Error Handling
//!
//! This module defines the custom error type `AppError` used throughout the application.
//! It centralizes error management and encodes the security-sensitive error taxonomy of
//! the authentication core: authentication failures stay generic toward the client
//! (detailed reasons live only in the security-event log), precondition failures are
//! specific and actionable, and transient infrastructure failures surface as retryable
//! errors rather than corrupting state.
//!
//! `AppError` implements `actix_web::error::ResponseError` to convert application
//! errors into structured `{"success": false, "error": ...}` JSON responses.
//! `From` implementations for `sqlx::Error`, `validator::ValidationErrors`,
//! `jsonwebtoken::errors::Error`, `bcrypt::BcryptError` and the store error allow
//! conversion with the `?` operator.

use actix_web::{error::ResponseError, HttpResponse};
use serde_json::json;
use std::fmt;
use validator::ValidationErrors;

use crate::store::StoreError;

/// Represents all possible errors that can occur within the application.
#[derive(Debug)]
pub enum AppError {
    /// An authentication failure: bad credentials, bad or missing backup code,
    /// bad recovery token (HTTP 401). The message is always generic; the real
    /// reason is recorded in the security-event log only.
    Unauthorized(String),
    /// A client-side error due to a malformed or invalid request (HTTP 400).
    BadRequest(String),
    /// A requested resource was not found (HTTP 404). Where enumeration is a
    /// concern, callers collapse this into `Unauthorized` instead.
    NotFound(String),
    /// A precondition for the requested operation does not hold, e.g. requesting
    /// recovery while unused backup codes remain (HTTP 409). Safe to be specific.
    PreconditionFailed(String),
    /// A verification attempt did not reach the required trust level (HTTP 403).
    /// Reports the score needed, never which sub-checks passed.
    VerificationInsufficient { achieved: u32, required: u32 },
    /// The session is a grace-period session; backup codes must be generated
    /// before this operation is allowed (HTTP 403).
    BackupCodeSetupRequired,
    /// The session is an emergency-access session; backup codes must be
    /// regenerated before this operation is allowed (HTTP 403).
    BackupCodeRegenerationRequired,
    /// A transient infrastructure failure (storage timeout, unavailable backend).
    /// Retryable; surfaced as a generic "try again" (HTTP 503).
    Transient(String),
    /// An unexpected server-side error (HTTP 500).
    InternalServerError(String),
    /// An error originating from database operations (HTTP 500).
    DatabaseError(String),
    /// Failed input validation (HTTP 422 Unprocessable Entity).
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            AppError::PreconditionFailed(msg) => write!(f, "Precondition Failed: {}", msg),
            AppError::VerificationInsufficient { achieved, required } => write!(
                f,
                "Verification Insufficient: score {} of required {}",
                achieved, required
            ),
            AppError::BackupCodeSetupRequired => write!(f, "Backup code setup required"),
            AppError::BackupCodeRegenerationRequired => {
                write!(f, "Backup code regeneration required")
            }
            AppError::Transient(msg) => write!(f, "Transient Failure: {}", msg),
            AppError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database Error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

/// Converts `AppError` variants into `HttpResponse` objects.
///
/// Every body carries `success: false` so clients can branch on one field;
/// guard rejections additionally carry the flag downstream routes key on.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Unauthorized(msg) => HttpResponse::Unauthorized().json(json!({
                "success": false,
                "error": msg
            })),
            AppError::BadRequest(msg) => HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": msg
            })),
            AppError::NotFound(msg) => HttpResponse::NotFound().json(json!({
                "success": false,
                "error": msg
            })),
            AppError::PreconditionFailed(msg) => HttpResponse::Conflict().json(json!({
                "success": false,
                "error": msg
            })),
            AppError::VerificationInsufficient { achieved, required } => {
                HttpResponse::Forbidden().json(json!({
                    "success": false,
                    "error": format!(
                        "Verification insufficient: score {} of required {}",
                        achieved, required
                    ),
                    "requiredScore": required
                }))
            }
            AppError::BackupCodeSetupRequired => HttpResponse::Forbidden().json(json!({
                "success": false,
                "error": "Backup codes must be set up before accessing this resource",
                "requiresBackupCodeSetup": true
            })),
            AppError::BackupCodeRegenerationRequired => HttpResponse::Forbidden().json(json!({
                "success": false,
                "error": "Backup codes must be regenerated before accessing this resource",
                "requiresBackupCodeRegeneration": true
            })),
            AppError::Transient(_) => HttpResponse::ServiceUnavailable().json(json!({
                "success": false,
                "error": "Service temporarily unavailable, please try again"
            })),
            AppError::InternalServerError(msg) => HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": msg
            })),
            // Database errors are also presented as generic internal server errors.
            AppError::DatabaseError(msg) => HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": msg
            })),
            AppError::ValidationError(msg) => HttpResponse::UnprocessableEntity().json(json!({
                "success": false,
                "error": msg
            })),
        }
    }
}

/// Converts `sqlx::Error` into `AppError`.
///
/// `RowNotFound` maps to `NotFound`; pool timeouts and closed connections map
/// to the retryable `Transient` variant; everything else is a `DatabaseError`.
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> AppError {
        match error {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::Transient(error.to_string())
            }
            _ => AppError::DatabaseError(error.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> AppError {
        match error {
            StoreError::Unavailable(msg) => AppError::Transient(msg),
            StoreError::Database(msg) => AppError::DatabaseError(msg),
            StoreError::Conflict(msg) => AppError::PreconditionFailed(msg),
        }
    }
}

/// Converts `validator::ValidationErrors` into `AppError::ValidationError`.
impl From<ValidationErrors> for AppError {
    fn from(error: ValidationErrors) -> AppError {
        AppError::ValidationError(error.to_string())
    }
}

/// Converts `jsonwebtoken::errors::Error` into `AppError::Unauthorized`.
impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(error: jsonwebtoken::errors::Error) -> AppError {
        AppError::Unauthorized(error.to_string())
    }
}

/// Converts `bcrypt::BcryptError` into `AppError::InternalServerError`.
impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> AppError {
        AppError::InternalServerError(error.to_string())
    }
}
