//! Account creation endpoint.

use std::sync::Arc;

use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;

use super::{
    audit, crypto,
    error::AuthError,
    rate_limit,
    state::AuthState,
    storage::{self, SignupOutcome},
    types::{SignupRequest, SignupResponse},
    utils::{extract_client_ip, extract_user_agent, normalize_email, valid_email},
};

const MIN_PASSWORD_LEN: usize = 12;
const MAX_DISPLAY_NAME_LEN: usize = 120;

fn validate(request: &SignupRequest) -> Result<String, AuthError> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let display_name = request.display_name.trim();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AuthError::Validation(
            "display name must be between 1 and 120 characters".to_string(),
        ));
    }
    Ok(email)
}

/// Create a new account
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn signup(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<SignupRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };
    let email = validate(&request)?;

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    let limiter_key = rate_limit::RateLimitScope::Signup.identifier(None, ip.as_deref());

    if let rate_limit::RateLimitDecision::Locked { remaining_minutes } =
        rate_limit::check(&pool, &limiter_key).await?
    {
        return Err(AuthError::TooManyAttempts { remaining_minutes });
    }

    let password_hash =
        crypto::hash_password(&request.password, state.config().password_iterations())?;

    match storage::insert_user(&pool, &email, &password_hash, request.display_name.trim()).await? {
        SignupOutcome::Created(user_id) => {
            audit::record(
                &pool,
                Some(user_id),
                "signup",
                ip.as_deref(),
                user_agent.as_deref(),
            );
            Ok((StatusCode::CREATED, Json(SignupResponse { user_id })))
        }
        SignupOutcome::Conflict => {
            // Repeated probes for existing emails count against the limiter.
            rate_limit::record_failure(&pool, &limiter_key, rate_limit::RateLimitScope::Signup)
                .await?;
            Err(AuthError::Conflict("email already registered".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str, display_name: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.to_string(),
        }
    }

    #[test]
    fn validate_accepts_reasonable_signup() {
        let email = validate(&request("Ada@Example.COM", "correct horse battery", "Ada"))
            .expect("valid signup");
        assert_eq!(email, "ada@example.com");
    }

    #[test]
    fn validate_rejects_short_password() {
        assert!(validate(&request("a@b.co", "short", "Ada")).is_err());
    }

    #[test]
    fn validate_rejects_blank_display_name() {
        assert!(validate(&request("a@b.co", "long enough password", "   ")).is_err());
    }

    #[test]
    fn validate_rejects_bad_email() {
        assert!(validate(&request("nope", "long enough password", "Ada")).is_err());
    }
}
