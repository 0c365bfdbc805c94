//! Error taxonomy for auth endpoints.
//!
//! Security-relevant rejections collapse into generic variants: a missing
//! user, a wrong password, and an expired or consumed MFA challenge all
//! render as the same `unauthorized` body. Internal distinctions stay in
//! the server logs.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Too many attempts, try again in {remaining_minutes} minute(s)")]
    TooManyAttempts { remaining_minutes: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("Internal error")]
    Server,
}

impl AuthError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::TooManyAttempts { .. } => "too_many_attempts",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation_error",
            Self::Server => "server_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::TooManyAttempts { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured error body with a stable machine-readable code.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<i64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let remaining_minutes = match self {
            Self::TooManyAttempts { remaining_minutes } => Some(remaining_minutes),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            remaining_minutes,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        // Internals are logged, never rendered to the caller.
        error!("auth internal error: {err:#}");
        Self::Server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::Unauthorized.code(), "unauthorized");
        assert_eq!(AuthError::Forbidden.code(), "forbidden");
        assert_eq!(
            AuthError::TooManyAttempts {
                remaining_minutes: 3
            }
            .code(),
            "too_many_attempts"
        );
        assert_eq!(AuthError::Conflict("x".into()).code(), "conflict");
        assert_eq!(AuthError::Validation("x".into()).code(), "validation_error");
        assert_eq!(AuthError::Server.code(), "server_error");
    }

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(AuthError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::TooManyAttempts {
                remaining_minutes: 1
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::Conflict("MFA already enabled".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let err: AuthError = anyhow::anyhow!("user bob not found in table users").into();
        assert_eq!(err.code(), "server_error");
        assert_eq!(err.to_string(), "Internal error");
    }

    #[test]
    fn body_omits_remaining_minutes_when_absent() {
        let body = ErrorBody {
            error: "unauthorized".to_string(),
            message: "Authentication required".to_string(),
            remaining_minutes: None,
        };
        let json = serde_json::to_string(&body).expect("serialize");
        assert!(!json.contains("remaining_minutes"));
    }
}
