//! Trusted devices: skip the TOTP step on browsers that already passed it.
//!
//! The cookie token is the real credential; the fingerprint (IP + user
//! agent) and user-agent hash only narrow where a stolen token works.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    crypto::constant_time_eq,
    error::AuthError,
    principal::require_auth,
    session::{DEVICE_COOKIE_NAME, clear_device_cookie},
    state::{AuthConfig, AuthState},
    types::{TrustedDeviceEntry, TrustedDeviceList},
    utils::{extract_client_ip, extract_cookie, extract_user_agent, generate_token, hash_token,
        is_unique_violation},
};

const DEVICE_TOKEN_PREFIX: &str = "trust_";

fn fingerprint(ip: Option<&str>, user_agent: Option<&str>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(ip.unwrap_or("").as_bytes());
    hasher.update(user_agent.unwrap_or("").as_bytes());
    hasher.finalize().to_vec()
}

fn user_agent_hash(user_agent: Option<&str>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.unwrap_or("").as_bytes());
    hasher.finalize().to_vec()
}

/// What to do with a presented device token given the stored binding.
#[derive(Debug, PartialEq, Eq)]
enum DeviceCheck {
    Reject,
    Accept,
    /// User agent matches but the IP moved; accept and rebind the
    /// fingerprint to the new network.
    AcceptAndRebind,
}

/// Pure binding decision, separate from storage so the rules are testable.
///
/// Rows written before user-agent hashes existed have no `ua_hash`; they
/// fall back to requiring an exact fingerprint match.
fn check_binding(
    stored_fingerprint: &[u8],
    stored_user_agent_hash: Option<&[u8]>,
    request_fingerprint: &[u8],
    request_user_agent_hash: &[u8],
) -> DeviceCheck {
    let fingerprint_matches = constant_time_eq(stored_fingerprint, request_fingerprint);
    match stored_user_agent_hash {
        Some(stored) => {
            if !constant_time_eq(stored, request_user_agent_hash) {
                DeviceCheck::Reject
            } else if fingerprint_matches {
                DeviceCheck::Accept
            } else {
                DeviceCheck::AcceptAndRebind
            }
        }
        None => {
            if fingerprint_matches {
                DeviceCheck::Accept
            } else {
                DeviceCheck::Reject
            }
        }
    }
}

/// Persist a trusted device after a successful MFA verification and return
/// its cookie.
pub(super) async fn register_device(
    pool: &PgPool,
    config: &AuthConfig,
    user_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<String> {
    let query = r"
        INSERT INTO trusted_devices (token_hash, user_id, fingerprint, ua_hash, last_ip, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token(DEVICE_TOKEN_PREFIX)?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(fingerprint(ip, user_agent))
            .bind(user_agent_hash(user_agent))
            .bind(ip)
            .bind(config.trusted_device_ttl_seconds())
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(device_cookie(config, &token)),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert trusted device"),
        }
    }

    Err(anyhow!("failed to generate unique device token"))
}

fn device_cookie(config: &AuthConfig, token: &str) -> String {
    let mut cookie = format!(
        "{DEVICE_COOKIE_NAME}={token}; Path=/; HttpOnly; Max-Age={}; SameSite={}",
        config.trusted_device_ttl_seconds(),
        config.same_site()
    );
    if config.cookies_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Decide whether the request carries a live trusted-device token for this
/// user. Accepting touches `last_used_at`; an IP move rebinds the
/// fingerprint in the same statement.
pub(super) async fn check_request_device(
    pool: &PgPool,
    user_id: Uuid,
    headers: &HeaderMap,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<bool> {
    let Some(token) = extract_cookie(headers, DEVICE_COOKIE_NAME) else {
        return Ok(false);
    };
    let token_hash = hash_token(&token);

    let query = r"
        SELECT fingerprint, ua_hash
        FROM trusted_devices
        WHERE token_hash = $1
          AND user_id = $2
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let Some(row) = sqlx::query(query)
        .bind(&token_hash)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch trusted device")?
    else {
        return Ok(false);
    };

    let stored_fingerprint: Vec<u8> = row.get("fingerprint");
    let stored_user_agent_hash: Option<Vec<u8>> = row.get("ua_hash");
    let request_fingerprint = fingerprint(ip, user_agent);

    match check_binding(
        &stored_fingerprint,
        stored_user_agent_hash.as_deref(),
        &request_fingerprint,
        &user_agent_hash(user_agent),
    ) {
        DeviceCheck::Reject => Ok(false),
        DeviceCheck::Accept => {
            touch_device(pool, &token_hash).await?;
            Ok(true)
        }
        DeviceCheck::AcceptAndRebind => {
            rebind_device(pool, &token_hash, &request_fingerprint, ip).await?;
            Ok(true)
        }
    }
}

async fn touch_device(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "UPDATE trusted_devices SET last_used_at = NOW() WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch trusted device")?;
    Ok(())
}

async fn rebind_device(
    pool: &PgPool,
    token_hash: &[u8],
    new_fingerprint: &[u8],
    ip: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE trusted_devices
        SET fingerprint = $2, last_ip = $3, last_used_at = NOW()
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(new_fingerprint)
        .bind(ip)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to rebind trusted device")?;
    Ok(())
}

pub(super) async fn delete_all_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM trusted_devices WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete trusted devices")?;
    Ok(result.rows_affected())
}

/// List this account's trusted devices
#[utoipa::path(
    get,
    path = "/v1/auth/devices",
    tag = "auth",
    responses(
        (status = 200, description = "Trusted devices", body = TrustedDeviceList),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn list(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&pool, &state, &headers).await?;

    let current_hash = extract_cookie(&headers, DEVICE_COOKIE_NAME).map(|token| hash_token(&token));

    let query = r"
        SELECT token_hash, last_ip, created_at::TEXT AS created_at,
               last_used_at::TEXT AS last_used_at
        FROM trusted_devices
        WHERE user_id = $1 AND expires_at > NOW()
        ORDER BY last_used_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(principal.user_id)
        .fetch_all(&pool)
        .instrument(span)
        .await
        .context("failed to list trusted devices")
        .map_err(AuthError::from)?;

    let devices = rows
        .into_iter()
        .map(|row| {
            let token_hash: Vec<u8> = row.get("token_hash");
            TrustedDeviceEntry {
                created_at: row.get("created_at"),
                last_used_at: row.get("last_used_at"),
                last_ip: row.get("last_ip"),
                current: current_hash
                    .as_deref()
                    .is_some_and(|hash| constant_time_eq(hash, &token_hash)),
            }
        })
        .collect();

    Ok(axum::Json(TrustedDeviceList { devices }))
}

/// Forget all trusted devices
#[utoipa::path(
    delete,
    path = "/v1/auth/devices",
    tag = "auth",
    responses(
        (status = 204, description = "All trusted devices revoked"),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn revoke_all(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = require_auth(&pool, &state, &headers).await?;

    let removed = delete_all_for_user(&pool, principal.user_id).await?;
    tracing::info!(user_id = %principal.user_id, removed, "trusted devices revoked");

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = clear_device_cookie(state.config()).parse() {
        response_headers.insert(SET_COOKIE, value);
    }
    Ok((StatusCode::NO_CONTENT, response_headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_mixes_ip_and_user_agent() {
        let a = fingerprint(Some("10.0.0.1"), Some("agent"));
        let b = fingerprint(Some("10.0.0.2"), Some("agent"));
        let c = fingerprint(Some("10.0.0.1"), Some("other"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, fingerprint(Some("10.0.0.1"), Some("agent")));
    }

    #[test]
    fn matching_everything_accepts() {
        let stored = fingerprint(Some("10.0.0.1"), Some("agent"));
        let ua = user_agent_hash(Some("agent"));
        assert_eq!(
            check_binding(&stored, Some(&ua), &stored, &ua),
            DeviceCheck::Accept
        );
    }

    #[test]
    fn changed_user_agent_rejects() {
        let stored = fingerprint(Some("10.0.0.1"), Some("agent"));
        let stored_ua = user_agent_hash(Some("agent"));
        let request = fingerprint(Some("10.0.0.1"), Some("other"));
        let request_ua = user_agent_hash(Some("other"));
        assert_eq!(
            check_binding(&stored, Some(&stored_ua), &request, &request_ua),
            DeviceCheck::Reject
        );
    }

    #[test]
    fn same_user_agent_new_ip_rebinds() {
        let stored = fingerprint(Some("10.0.0.1"), Some("agent"));
        let ua = user_agent_hash(Some("agent"));
        let request = fingerprint(Some("203.0.113.9"), Some("agent"));
        assert_eq!(
            check_binding(&stored, Some(&ua), &request, &ua),
            DeviceCheck::AcceptAndRebind
        );
    }

    #[test]
    fn legacy_row_without_ua_hash_requires_exact_fingerprint() {
        let stored = fingerprint(Some("10.0.0.1"), Some("agent"));
        let ua = user_agent_hash(Some("agent"));
        assert_eq!(check_binding(&stored, None, &stored, &ua), DeviceCheck::Accept);

        let moved = fingerprint(Some("203.0.113.9"), Some("agent"));
        assert_eq!(check_binding(&stored, None, &moved, &ua), DeviceCheck::Reject);
    }
}
