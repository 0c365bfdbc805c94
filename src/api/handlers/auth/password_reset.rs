//! Password reset over email.
//!
//! The request endpoint answers 204 no matter what; whether an email
//! exists is not observable from outside. The confirm step consumes the
//! token with one conditional update, so a link can be used exactly once.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::email::{self, EmailMessage};

use super::{
    audit, crypto,
    error::AuthError,
    rate_limit,
    state::AuthState,
    storage, trusted_device,
    types::{PasswordResetConfirm, PasswordResetRequest},
    utils::{extract_client_ip, extract_user_agent, generate_token, hash_token, normalize_email,
        valid_email},
};

const MIN_PASSWORD_LEN: usize = 12;

async fn insert_reset_token(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> anyhow::Result<String> {
    let query = r"
        INSERT INTO password_reset_tokens (token_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let token = generate_token("reset_")?;
    sqlx::query(query)
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert password reset token")?;
    Ok(token)
}

/// Consume the token. `RETURNING user_id` only fires when this request is
/// the first to flip `consumed_at`.
async fn consume_reset_token(pool: &PgPool, token_hash: &[u8]) -> anyhow::Result<Option<Uuid>> {
    let query = r"
        UPDATE password_reset_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume password reset token")?;
    Ok(row.map(|row| row.get("user_id")))
}

fn reset_email(frontend_base_url: &str, to_email: &str, token: &str) -> EmailMessage {
    let link = format!("{frontend_base_url}/reset-password?token={token}");
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Reset your Encore password".to_string(),
        body_text: format!(
            "A password reset was requested for your account.\n\n\
             Open this link within 30 minutes to choose a new password:\n{link}\n\n\
             If you did not request this, you can ignore this email."
        ),
        body_html: format!(
            "<p>A password reset was requested for your account.</p>\
             <p><a href=\"{link}\">Choose a new password</a> (valid for 30 minutes).</p>\
             <p>If you did not request this, you can ignore this email.</p>"
        ),
    }
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    tag = "auth",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Accepted; an email is sent if the account exists"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn request(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<PasswordResetRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };
    let email_address = normalize_email(&request.email);
    if !valid_email(&email_address) {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }

    let ip = extract_client_ip(&headers);
    let limiter_key = rate_limit::RateLimitScope::PasswordReset.identifier(None, ip.as_deref());
    if let rate_limit::RateLimitDecision::Locked { remaining_minutes } =
        rate_limit::check(&pool, &limiter_key).await?
    {
        return Err(AuthError::TooManyAttempts { remaining_minutes });
    }
    // Every request counts, so the endpoint cannot be used to spam inboxes.
    rate_limit::record_failure(&pool, &limiter_key, rate_limit::RateLimitScope::PasswordReset)
        .await?;

    if let Some(record) = storage::lookup_login_record(&pool, &email_address).await? {
        if record.is_active {
            let token =
                insert_reset_token(&pool, record.user_id, state.config().reset_token_ttl_seconds())
                    .await?;
            email::enqueue(
                &pool,
                &reset_email(state.config().frontend_base_url(), &email_address, &token),
            )
            .await?;
            audit::record(
                &pool,
                Some(record.user_id),
                "password_reset.requested",
                ip.as_deref(),
                extract_user_agent(&headers).as_deref(),
            );
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    tag = "auth",
    request_body = PasswordResetConfirm,
    responses(
        (status = 204, description = "Password updated, all sessions revoked"),
        (status = 401, description = "Invalid or expired token"),
    )
)]
pub async fn confirm(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<PasswordResetConfirm>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };
    if request.token.is_empty() {
        return Err(AuthError::Validation("token is required".to_string()));
    }
    if request.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let Some(user_id) = consume_reset_token(&pool, &hash_token(&request.token)).await? else {
        return Err(AuthError::Unauthorized);
    };

    let password_hash =
        crypto::hash_password(&request.new_password, state.config().password_iterations())?;
    storage::update_password_hash(&pool, user_id, &password_hash).await?;

    // A reset means the old credential may be compromised; nothing issued
    // under it survives.
    storage::delete_sessions_for_user(&pool, user_id).await?;
    trusted_device::delete_all_for_user(&pool, user_id).await?;

    audit::record(
        &pool,
        Some(user_id),
        "password_reset.completed",
        extract_client_ip(&headers).as_deref(),
        extract_user_agent(&headers).as_deref(),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_email_embeds_link_with_token() {
        let message = reset_email("https://encore.example.com", "a@b.co", "reset_abc123");
        assert_eq!(message.to_email, "a@b.co");
        assert!(
            message
                .body_text
                .contains("https://encore.example.com/reset-password?token=reset_abc123")
        );
        assert!(message.body_html.contains("reset_abc123"));
    }
}
