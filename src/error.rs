// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.
//!
//! The error-code strings in responses are part of the API contract: the
//! frontend matches on `invalid_gradescope_auth`, `invalid_calendar_selection`
//! and `invalid_user_settings` to show specific remediation messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No usable Gradescope token and no way to obtain one.
    #[error("Gradescope authorization is invalid")]
    GradescopeAuth,

    /// Selected calendar is missing, deleted, or not writable.
    #[error("Calendar selection is invalid")]
    CalendarSelection,

    /// Stored settings are missing required fields.
    #[error("User settings are invalid")]
    UserSettings,

    /// Data from the store or a provider is missing a required field.
    /// The raw payload is kept so it can be dumped for support purposes.
    #[error("Data integrity violation: {context}")]
    Integrity {
        context: String,
        payload: serde_json::Value,
    },

    #[error("Google API error: {0}")]
    GoogleApi(String),

    #[error("Gradescope error: {0}")]
    GradescopeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker message for Google responses that indicate a bad or revoked token.
    pub const GOOGLE_TOKEN_ERROR: &'static str = "Google token expired or revoked";

    /// Build an integrity violation from any serializable payload.
    pub fn integrity(context: impl Into<String>, payload: &impl Serialize) -> Self {
        AppError::Integrity {
            context: context.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Whether a Google API error means the user must relink their account.
    pub fn is_google_token_error(&self) -> bool {
        match self {
            AppError::GoogleApi(msg) => {
                msg.contains(Self::GOOGLE_TOKEN_ERROR) || msg.contains("invalid_grant")
            }
            _ => false,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::GradescopeAuth => (StatusCode::FORBIDDEN, "invalid_gradescope_auth", None),
            AppError::CalendarSelection => (
                StatusCode::PRECONDITION_FAILED,
                "invalid_calendar_selection",
                None,
            ),
            AppError::UserSettings => (
                StatusCode::PRECONDITION_FAILED,
                "invalid_user_settings",
                None,
            ),
            AppError::Integrity { context, payload } => {
                // Dump the raw payload for support purposes; it never goes
                // to the client verbatim.
                tracing::error!(context = %context, payload = %payload, "Data integrity violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "integrity_error",
                    Some(context.clone()),
                )
            }
            AppError::GoogleApi(msg) => {
                (StatusCode::BAD_GATEWAY, "google_error", Some(msg.clone()))
            }
            AppError::GradescopeApi(msg) => (
                StatusCode::BAD_GATEWAY,
                "gradescope_error",
                Some(msg.clone()),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
