use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::progress::ProgressError;
use crate::results::StoreError;

/// Why a job failed. Stored on the job and surfaced to polling clients so the
/// UI can pick a message without parsing error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    Authentication,
    RateLimited,
    MalformedOutput,
    Extraction,
    Upstream,
    Internal,
}

impl FailureKind {
    /// Classifies stored error text. Used for records that only carry a message.
    pub fn classify_message(message: &str) -> FailureKind {
        if is_auth_failure_text(message) {
            return FailureKind::Authentication;
        }
        let lower = message.to_lowercase();
        if lower.contains("status 429") || lower.contains("rate limit") || lower.contains("quota")
        {
            FailureKind::RateLimited
        } else if lower.contains("invalid json") || lower.contains("empty content") {
            FailureKind::MalformedOutput
        } else if lower.contains("no text content") || lower.contains("extracting text") {
            FailureKind::Extraction
        } else {
            FailureKind::Upstream
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "The upload was rejected. Check the file and try again.",
            FailureKind::Authentication => {
                "Invalid API key. Please check your OpenAI API key and try again."
            }
            FailureKind::RateLimited => {
                "The AI provider rejected the request because of rate limits or quota. Try again later."
            }
            FailureKind::MalformedOutput => {
                "The AI returned an unexpected response. Please start a new optimization."
            }
            FailureKind::Extraction => {
                "We could not read any text from this PDF. Export your profile again and retry."
            }
            FailureKind::Upstream => "The AI provider could not be reached. Please try again.",
            FailureKind::Internal => "An internal error occurred while optimizing your profile.",
        }
    }

    pub fn status_code(self) -> StatusCode {
        match self {
            FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
            FailureKind::Authentication => StatusCode::UNAUTHORIZED,
            FailureKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FailureKind::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::MalformedOutput | FailureKind::Upstream => StatusCode::BAD_GATEWAY,
            FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// True when an error message describes a rejected or revoked credential.
pub fn is_auth_failure_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("status 401")
        || lower.contains("status 403")
        || lower.contains("invalid api key")
        || lower.contains("incorrect api key")
        || lower.contains("invalid_api_key")
        || lower.contains("authentication")
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Optimization failed ({kind:?}): {message}")]
    Pipeline { kind: FailureKind, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ProgressError> for AppError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => AppError::NotFound(format!("Optimization {id} not found")),
            ProgressError::Duplicate(id) => {
                AppError::Conflict(format!("Optimization id '{id}' is already in use"))
            }
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Pipeline { kind, message } => {
                tracing::error!("Optimization failed ({kind:?}): {message}");
                let body = Json(json!({
                    "success": false,
                    "status": "failed",
                    "error": {
                        "code": "OPTIMIZATION_FAILED",
                        "kind": kind,
                        "message": kind.user_message(),
                        "detail": message,
                    }
                }));
                return (kind.status_code(), body).into_response();
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
