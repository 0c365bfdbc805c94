//! CSRF double-submit guard keyed by a server secret.
//!
//! The token is `HMAC-SHA256(secret, session identifier)`: an attacker who
//! can plant cookies cannot forge a matching cookie/header pair without the
//! secret. The identifier is the session token when the request carries one
//! (cookie or bearer header, resolved exactly as the session layer does),
//! otherwise an anonymous identifier derived from the client IP.
//!
//! Validation is skipped for safe methods and for the unauthenticated
//! endpoints that run before any CSRF cookie has been issued.

use anyhow::{Result, bail};
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, header::InvalidHeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use super::crypto::constant_time_eq;
use super::error::AuthError;
use super::session::extract_session_token;
use super::state::{AuthConfig, AuthState};
use super::utils::extract_client_ip;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const CSRF_COOKIE_NAME: &str = "encore_csrf";
pub(crate) const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Endpoints reachable before a CSRF cookie exists.
const EXEMPT_PATHS: &[&str] = &[
    "/v1/auth/login",
    "/v1/auth/signup",
    "/v1/auth/mfa/verify",
    "/v1/auth/password-reset/request",
    "/v1/auth/password-reset/confirm",
];

#[derive(Clone)]
pub struct CsrfGuard {
    secret: Arc<Vec<u8>>,
}

impl CsrfGuard {
    /// Build the guard from configuration.
    ///
    /// # Errors
    ///
    /// Fails closed when no secret is configured outside local development.
    /// In development a random per-process secret is generated instead, which
    /// invalidates tokens across restarts.
    pub fn from_config(secret: Option<&SecretString>, production: bool) -> Result<Self> {
        if let Some(secret) = secret {
            let bytes = secret.expose_secret().as_bytes();
            if bytes.len() < 32 {
                bail!("CSRF secret must be at least 32 bytes");
            }
            return Ok(Self {
                secret: Arc::new(bytes.to_vec()),
            });
        }
        if production {
            bail!("CSRF secret is required outside local development");
        }
        warn!("no CSRF secret configured; using a random per-process secret (dev only)");
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Ok(Self {
            secret: Arc::new(bytes),
        })
    }

    /// Derive the CSRF token for a session-binding identifier.
    #[must_use]
    pub fn derive(&self, identifier: &str) -> String {
        // HMAC accepts any key length; an empty token simply never validates.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return String::new();
        };
        mac.update(identifier.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Resolve the binding identifier for the current request.
    ///
    /// Token extraction must mirror the session layer, or a client
    /// authenticating through one transport could never pass the guard.
    #[must_use]
    pub fn session_identifier(&self, headers: &HeaderMap) -> String {
        if let Some(token) = extract_session_token(headers) {
            return token;
        }
        match extract_client_ip(headers) {
            Some(ip) => format!("anon:{ip}"),
            None => "anon:unknown".to_string(),
        }
    }

    /// Validate the echoed header token against the keyed derivation.
    #[must_use]
    pub fn validate(&self, headers: &HeaderMap) -> bool {
        let Some(header_token) = headers
            .get(CSRF_HEADER_NAME)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return false;
        };
        let expected = self.derive(&self.session_identifier(headers));
        constant_time_eq(header_token.as_bytes(), expected.as_bytes())
    }
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard").field("secret", &"***").finish()
    }
}

/// True when the method never mutates state.
fn safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn exempt_path(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

/// Router middleware enforcing the double-submit check on mutating requests.
pub async fn middleware(request: Request<Body>, next: Next) -> Response {
    if safe_method(request.method()) || exempt_path(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(auth_state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        return AuthError::Server.into_response();
    };

    if !auth_state.csrf().validate(request.headers()) {
        return AuthError::Unauthorized.into_response();
    }

    next.run(request).await
}

/// Build the readable (non-HttpOnly) CSRF cookie so the frontend can echo
/// the token in the request header.
pub(crate) fn csrf_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let same_site = config.same_site();
    let mut cookie = format!("{CSRF_COOKIE_NAME}={token}; Path=/; SameSite={same_site}");
    if config.cookies_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_csrf_cookie(config: &AuthConfig) -> String {
    let mut cookie = format!(
        "{CSRF_COOKIE_NAME}=; Path=/; Max-Age=0; SameSite={}",
        config.same_site()
    );
    if config.cookies_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn guard() -> CsrfGuard {
        let secret = SecretString::from("0123456789abcdef0123456789abcdef".to_string());
        CsrfGuard::from_config(Some(&secret), true).expect("guard")
    }

    #[test]
    fn from_config_fails_closed_in_production() {
        assert!(CsrfGuard::from_config(None, true).is_err());
        assert!(CsrfGuard::from_config(None, false).is_ok());
    }

    #[test]
    fn from_config_rejects_short_secret() {
        let secret = SecretString::from("short".to_string());
        assert!(CsrfGuard::from_config(Some(&secret), true).is_err());
    }

    #[test]
    fn derive_is_deterministic_per_identifier() {
        let guard = guard();
        assert_eq!(guard.derive("session-a"), guard.derive("session-a"));
        assert_ne!(guard.derive("session-a"), guard.derive("session-b"));
    }

    #[test]
    fn validate_accepts_matching_pair() {
        let guard = guard();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("encore_session=tok123"),
        );
        let token = guard.derive("tok123");
        headers.insert(
            CSRF_HEADER_NAME,
            HeaderValue::from_str(&token).expect("header"),
        );
        assert!(guard.validate(&headers));
    }

    #[test]
    fn validate_rejects_missing_or_wrong_header() {
        let guard = guard();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("encore_session=tok123"),
        );
        assert!(!guard.validate(&headers));

        headers.insert(CSRF_HEADER_NAME, HeaderValue::from_static("forged"));
        assert!(!guard.validate(&headers));
    }

    #[test]
    fn validate_accepts_bearer_session_token() {
        // A non-browser client authenticates via Authorization and echoes
        // the CSRF token derived from its session token. The identifier
        // must be the token, not the anonymous IP fallback.
        let guard = guard();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sess-token-123"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(guard.session_identifier(&headers), "sess-token-123");

        let token = guard.derive("sess-token-123");
        headers.insert(
            CSRF_HEADER_NAME,
            HeaderValue::from_str(&token).expect("header"),
        );
        assert!(guard.validate(&headers));
    }

    #[test]
    fn validate_falls_back_to_anonymous_identifier() {
        let guard = guard();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        let token = guard.derive("anon:5.6.7.8");
        headers.insert(
            CSRF_HEADER_NAME,
            HeaderValue::from_str(&token).expect("header"),
        );
        assert!(guard.validate(&headers));
    }

    #[test]
    fn safe_methods_and_exempt_paths() {
        assert!(safe_method(&Method::GET));
        assert!(safe_method(&Method::HEAD));
        assert!(safe_method(&Method::OPTIONS));
        assert!(!safe_method(&Method::POST));
        assert!(!safe_method(&Method::DELETE));

        assert!(exempt_path("/v1/auth/login"));
        assert!(exempt_path("/v1/auth/mfa/verify"));
        assert!(!exempt_path("/v1/auth/mfa/setup"));
        assert!(!exempt_path("/v1/auth/logout"));
    }
}
