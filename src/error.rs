// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::controller::{gateway::GatewayError, runtime::RuntimeError};

/// Global Application Error Enum for the portal backend.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (e.g., admission window closed)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., registration already used)
    Conflict(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// True when a write failed on a UNIQUE / PRIMARY KEY constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Errors surfaced to the candidate by the admission controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("registration is only accepted during the 15 minutes before the exam starts")]
    AdmissionClosed,

    #[error("registration number not found for this exam")]
    RegistrationNotFound,

    #[error("registration number has already been used")]
    RegistrationAlreadyUsed,

    #[error("exam service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Retried silently in the background.
    #[error("exam catalog disconnected: {0}")]
    FeedDisconnected(String),

    #[error("exam {exam_id} ended or was withdrawn before it started; try the next exam")]
    ExamEndedMidWait { exam_id: String },

    /// The attempt is kept in the outbox and retried until accepted.
    #[error("submission not yet accepted, retrying: {0}")]
    ScoringSubmissionFailed(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("admission controller has stopped")]
    Stopped,
}

impl From<GatewayError> for ControllerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound => ControllerError::RegistrationNotFound,
            GatewayError::AlreadyUsed => ControllerError::RegistrationAlreadyUsed,
            GatewayError::AdmissionClosed => ControllerError::AdmissionClosed,
            GatewayError::Unavailable(msg) | GatewayError::Rejected(msg) => {
                ControllerError::ServiceUnavailable(msg)
            }
        }
    }
}
