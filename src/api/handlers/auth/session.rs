//! Session cookies and the session/logout endpoints.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;

use super::{
    error::AuthError,
    state::{AuthConfig, AuthState},
    storage::{self, SessionRecord},
    types::SessionResponse,
    utils::{extract_cookie, hash_token},
};

pub(crate) const SESSION_COOKIE_NAME: &str = "encore_session";
pub(crate) const DEVICE_COOKIE_NAME: &str = "encore_device";

/// Build the session cookie header value.
///
/// Remembered sessions carry Max-Age so the browser persists them;
/// otherwise the cookie dies with the browser while the server row still
/// enforces the idle window.
pub(super) fn session_cookie(config: &AuthConfig, token: &str, remember: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite={}",
        config.same_site()
    );
    if remember {
        cookie.push_str(&format!("; Max-Age={}", config.session_idle_seconds()));
    }
    if config.cookies_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> String {
    expired_cookie(config, SESSION_COOKIE_NAME)
}

pub(super) fn clear_device_cookie(config: &AuthConfig) -> String {
    expired_cookie(config, DEVICE_COOKIE_NAME)
}

fn expired_cookie(config: &AuthConfig, name: &str) -> String {
    let mut cookie = format!(
        "{name}=; Path=/; HttpOnly; Max-Age=0; SameSite={}",
        config.same_site()
    );
    if config.cookies_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Pull the raw session token from the cookie, falling back to a Bearer
/// header for non-browser clients.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_cookie(headers, SESSION_COOKIE_NAME) {
        return Some(token);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub(crate) struct VerifiedSession {
    pub(crate) record: SessionRecord,
    pub(crate) token: String,
    /// True when the idle window was just extended, so the caller should
    /// reissue the cookie with a fresh Max-Age.
    pub(crate) refreshed: bool,
}

/// Resolve the request's session, sliding the idle window when due.
pub(crate) async fn verify_session(
    pool: &PgPool,
    config: &AuthConfig,
    headers: &HeaderMap,
) -> Result<Option<VerifiedSession>> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);
    let Some(record) = storage::lookup_session(pool, &token_hash).await? else {
        return Ok(None);
    };
    let refreshed = storage::refresh_session(
        pool,
        &token_hash,
        config.session_idle_seconds(),
        config.session_refresh_threshold_seconds(),
    )
    .await?;
    Ok(Some(VerifiedSession {
        record,
        token,
        refreshed,
    }))
}

/// Create a session row and build the Set-Cookie headers for it.
///
/// The CSRF token is derived from the session token so it needs no storage
/// and rotates with every new session.
pub(super) async fn establish_session(
    pool: &PgPool,
    state: &AuthState,
    user_id: uuid::Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
    remember: bool,
) -> Result<HeaderMap> {
    let token = storage::insert_session(
        pool,
        user_id,
        ip,
        user_agent,
        remember,
        state.config().session_idle_seconds(),
    )
    .await?;
    storage::touch_last_login(pool, user_id).await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = session_cookie(state.config(), &token, remember).parse() {
        headers.append(SET_COOKIE, value);
    }
    let csrf_token = state.csrf().derive(&token);
    if let Ok(value) = super::csrf::csrf_cookie(state.config(), &csrf_token) {
        headers.append(SET_COOKIE, value);
    }
    Ok(headers)
}

/// Return the current session's user
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    tag = "auth",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn session(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(verified) = verify_session(&pool, state.config(), &headers).await? else {
        return Err(AuthError::Unauthorized);
    };

    let body = SessionResponse {
        user_id: verified.record.user_id,
        email: verified.record.email,
        role: verified.record.role,
    };

    let mut headers = HeaderMap::new();
    if verified.refreshed {
        // Sliding expiry moved; give the browser the new Max-Age too.
        let cookie = session_cookie(state.config(), &verified.token, verified.record.remember);
        if let Ok(value) = cookie.parse() {
            headers.insert(SET_COOKIE, value);
        }
    }

    Ok((StatusCode::OK, headers, axum::Json(body)))
}

/// Destroy the current session
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 204, description = "Session destroyed"),
    )
)]
pub async fn logout(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(token) = extract_session_token(&headers) {
        storage::delete_session(&pool, &hash_token(&token)).await?;
    }

    // Always clear cookies, even without a live session.
    let mut response_headers = HeaderMap::new();
    for cookie in [
        clear_session_cookie(state.config()),
        super::csrf::clear_csrf_cookie(state.config()),
    ] {
        if let Ok(value) = cookie.parse() {
            response_headers.append(SET_COOKIE, value);
        }
    }

    Ok((StatusCode::NO_CONTENT, response_headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn dev_config() -> AuthConfig {
        AuthConfig::new("http://localhost:5173")
    }

    fn prod_config() -> AuthConfig {
        AuthConfig::new("https://encore.example.com")
    }

    #[test]
    fn session_cookie_remember_sets_max_age() {
        let cookie = session_cookie(&dev_config(), "tok", true);
        assert!(cookie.starts_with("encore_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=1800"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn session_cookie_without_remember_is_browser_scoped() {
        let cookie = session_cookie(&dev_config(), "tok", false);
        assert!(!cookie.contains("Max-Age"));
    }

    #[test]
    fn production_cookies_are_strict_and_secure() {
        let cookie = session_cookie(&prod_config(), "tok", true);
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn clear_cookies_expire_immediately() {
        let cookie = clear_session_cookie(&dev_config());
        assert!(cookie.starts_with("encore_session=;"));
        assert!(cookie.contains("Max-Age=0"));

        let device = clear_device_cookie(&dev_config());
        assert!(device.starts_with("encore_device=;"));
    }

    #[test]
    fn extract_token_prefers_cookie_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("encore_session=from-cookie"),
        );
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_session_token(&headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn extract_token_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn extract_token_none_when_absent() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());
    }
}
