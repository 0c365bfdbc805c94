//! TOTP second factor: challenge verification and enrollment lifecycle.
//!
//! A challenge is a short-lived single-use token handed out by login. The
//! consume step is an atomic conditional update, so replaying a token or
//! racing two verifications yields exactly one winner.

pub(crate) mod storage;

use std::sync::Arc;

use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;

use super::{
    audit, crypto,
    error::AuthError,
    principal::require_auth,
    rate_limit,
    session::establish_session,
    state::AuthState,
    trusted_device,
    types::{
        LoginResponse, MfaDisableRequest, MfaEnableRequest, MfaEnableResponse, MfaSetupResponse,
        MfaVerifyRequest,
    },
    utils::{extract_client_ip, extract_user_agent, hash_token},
};

/// A challenge is bound to the request context that created it. A changed
/// IP or user agent mid-flow means the token leaked or the network is odd;
/// either way the challenge dies.
fn binding_mismatch(
    challenge_ip: Option<&str>,
    challenge_user_agent: Option<&str>,
    request_ip: Option<&str>,
    request_user_agent: Option<&str>,
) -> bool {
    let ip_changed = match (challenge_ip, request_ip) {
        (Some(recorded), Some(seen)) => recorded != seen,
        _ => false,
    };
    let user_agent_changed = match (challenge_user_agent, request_user_agent) {
        (Some(recorded), Some(seen)) => recorded != seen,
        _ => false,
    };
    ip_changed || user_agent_changed
}

/// A six-digit code goes to TOTP; anything else is tried as a backup code.
fn looks_like_totp_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

/// Complete an MFA challenge
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    tag = "auth",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted", body = LoginResponse),
        (status = 401, description = "Invalid challenge or code"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn verify(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<MfaVerifyRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };
    if request.mfa_token.is_empty() || request.code.is_empty() {
        return Err(AuthError::Validation(
            "mfa_token and code are required".to_string(),
        ));
    }

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    let token_hash = hash_token(&request.mfa_token);
    let Some(challenge) = storage::fetch_challenge(&pool, &token_hash).await? else {
        return Err(AuthError::Unauthorized);
    };

    if binding_mismatch(
        challenge.ip.as_deref(),
        challenge.user_agent.as_deref(),
        ip.as_deref(),
        user_agent.as_deref(),
    ) {
        audit::record(
            &pool,
            Some(challenge.user_id),
            "mfa.binding_mismatch",
            ip.as_deref(),
            user_agent.as_deref(),
        );
        return Err(AuthError::Unauthorized);
    }

    let Some(user) = storage::fetch_mfa_user(&pool, challenge.user_id).await? else {
        return Err(AuthError::Unauthorized);
    };
    let (Some(secret), true, true) = (user.totp_secret.as_deref(), user.totp_enabled, user.is_active)
    else {
        return Err(AuthError::Unauthorized);
    };

    // Code guessing is limited per user, falling back to per IP when the
    // challenge somehow predates the user row.
    let limiter_key =
        rate_limit::RateLimitScope::Mfa.identifier(Some(challenge.user_id), ip.as_deref());
    if let rate_limit::RateLimitDecision::Locked { remaining_minutes } =
        rate_limit::check(&pool, &limiter_key).await?
    {
        return Err(AuthError::TooManyAttempts { remaining_minutes });
    }

    // A backup code is only checked for membership here; it is removed
    // after the challenge transition, so a request that loses the
    // challenge race never burns the code.
    let mut backup_code = None;
    let code_ok = if looks_like_totp_code(&request.code) {
        crypto::verify_totp(secret, &user.email, &request.code, crypto::now_unix())
    } else {
        let hashes = storage::list_backup_code_hashes(&pool, challenge.user_id).await?;
        match crypto::find_backup_code(&request.code, &hashes) {
            Some(matched) => {
                backup_code = Some(matched.to_string());
                true
            }
            None => false,
        }
    };

    if !code_ok {
        rate_limit::record_failure(&pool, &limiter_key, rate_limit::RateLimitScope::Mfa).await?;
        audit::record(
            &pool,
            Some(challenge.user_id),
            "mfa.failed",
            ip.as_deref(),
            user_agent.as_deref(),
        );
        return Err(AuthError::Unauthorized);
    }

    // Only one request may consume the challenge, even with a correct code.
    if !storage::consume_challenge(&pool, &token_hash).await? {
        return Err(AuthError::Unauthorized);
    }

    // The conditional removal is the single-use gate for the code itself.
    if let Some(matched) = backup_code {
        if !storage::consume_backup_code(&pool, challenge.user_id, &matched).await? {
            return Err(AuthError::Unauthorized);
        }
    }

    rate_limit::reset(&pool, &limiter_key).await?;

    let mut cookies = establish_session(
        &pool,
        &state,
        challenge.user_id,
        ip.as_deref(),
        user_agent.as_deref(),
        request.remember,
    )
    .await?;

    if request.remember_device {
        let device_cookie = trusted_device::register_device(
            &pool,
            state.config(),
            challenge.user_id,
            ip.as_deref(),
            user_agent.as_deref(),
        )
        .await?;
        if let Ok(value) = device_cookie.parse() {
            cookies.append(SET_COOKIE, value);
        }
    }

    audit::record(
        &pool,
        Some(challenge.user_id),
        "mfa.verified",
        ip.as_deref(),
        user_agent.as_deref(),
    );

    Ok((
        StatusCode::OK,
        cookies,
        Json(LoginResponse {
            mfa_required: false,
            mfa_token: None,
        }),
    ))
}

/// Begin TOTP enrollment
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/setup",
    tag = "auth",
    responses(
        (status = 200, description = "Provisioning secret", body = MfaSetupResponse),
        (status = 401, description = "No valid session"),
        (status = 409, description = "MFA already enabled"),
    )
)]
pub async fn setup(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&pool, &state, &headers).await?;

    let (secret, otpauth_url) = crypto::generate_totp_secret(&principal.email)?;
    if !storage::set_pending_totp_secret(&pool, principal.user_id, &secret).await? {
        return Err(AuthError::Conflict("mfa already enabled".to_string()));
    }

    Ok(Json(MfaSetupResponse {
        secret,
        otpauth_url,
    }))
}

/// Confirm enrollment with a first code
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/enable",
    tag = "auth",
    request_body = MfaEnableRequest,
    responses(
        (status = 200, description = "MFA enabled, backup codes issued", body = MfaEnableResponse),
        (status = 401, description = "No valid session or wrong code"),
        (status = 409, description = "MFA already enabled or not staged"),
    )
)]
pub async fn enable(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<MfaEnableRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&pool, &state, &headers).await?;
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };

    let Some(user) = storage::fetch_mfa_user(&pool, principal.user_id).await? else {
        return Err(AuthError::Unauthorized);
    };
    if user.totp_enabled {
        return Err(AuthError::Conflict("mfa already enabled".to_string()));
    }
    let Some(secret) = user.totp_secret.as_deref() else {
        return Err(AuthError::Conflict("mfa setup not started".to_string()));
    };

    if !crypto::verify_totp(secret, &user.email, &request.code, crypto::now_unix()) {
        return Err(AuthError::Unauthorized);
    }

    let backup_codes = crypto::generate_backup_codes();
    let hashes: Vec<String> = backup_codes
        .iter()
        .map(|code| crypto::hash_backup_code(code))
        .collect();

    if !storage::enable_totp(&pool, principal.user_id, &hashes).await? {
        return Err(AuthError::Conflict("mfa already enabled".to_string()));
    }

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    audit::record(
        &pool,
        Some(principal.user_id),
        "mfa.enabled",
        ip.as_deref(),
        user_agent.as_deref(),
    );

    Ok(Json(MfaEnableResponse { backup_codes }))
}

/// Turn MFA off
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/disable",
    tag = "auth",
    request_body = MfaDisableRequest,
    responses(
        (status = 204, description = "MFA disabled"),
        (status = 401, description = "No valid session or wrong password"),
    )
)]
pub async fn disable(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    request: Option<Json<MfaDisableRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&pool, &state, &headers).await?;
    let Some(Json(request)) = request else {
        return Err(AuthError::Validation("missing request body".to_string()));
    };

    let Some(user) = storage::fetch_mfa_user(&pool, principal.user_id).await? else {
        return Err(AuthError::Unauthorized);
    };
    // Disabling the second factor requires the first one again.
    if !crypto::verify_password(
        &request.password,
        &user.password_hash,
        state.config().password_iterations(),
    ) {
        return Err(AuthError::Unauthorized);
    }

    storage::disable_totp(&pool, principal.user_id).await?;
    // Trusted devices exist to skip a factor that no longer exists.
    trusted_device::delete_all_for_user(&pool, principal.user_id).await?;

    let ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);
    audit::record(
        &pool,
        Some(principal.user_id),
        "mfa.disabled",
        ip.as_deref(),
        user_agent.as_deref(),
    );

    Ok(StatusCode::NO_CONTENT)
}
