//! Challenge and TOTP state queries.
//!
//! Consume operations are single conditional updates; zero rows affected
//! means another request won the race and this one must fail.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::auth::utils::{generate_token, hash_token, is_unique_violation};

pub(super) const CHALLENGE_TOKEN_PREFIX: &str = "mfa_";

/// A pending challenge with the request context it was bound to.
pub(super) struct ChallengeRecord {
    pub(super) user_id: Uuid,
    pub(super) ip: Option<String>,
    pub(super) user_agent: Option<String>,
}

/// User fields the MFA endpoints need.
pub(super) struct MfaUser {
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) is_active: bool,
    pub(super) totp_secret: Option<String>,
    pub(super) totp_enabled: bool,
}

/// Create a challenge row and return the raw token for the client.
pub(crate) async fn insert_challenge(
    pool: &PgPool,
    user_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO mfa_challenges (token_hash, user_id, ip, user_agent, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token(CHALLENGE_TOKEN_PREFIX)?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ip)
            .bind(user_agent)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert mfa challenge"),
        }
    }

    Err(anyhow!("failed to generate unique mfa challenge token"))
}

/// Fetch a live, unconsumed challenge. Used and expired challenges are
/// equally invisible here.
pub(super) async fn fetch_challenge(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<ChallengeRecord>> {
    let query = r"
        SELECT user_id, ip, user_agent
        FROM mfa_challenges
        WHERE token_hash = $1
          AND used = FALSE
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch mfa challenge")?;

    Ok(row.map(|row| ChallengeRecord {
        user_id: row.get("user_id"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
    }))
}

/// Mark a challenge used. Returns false when it was already consumed or
/// expired, which the caller must treat as a failed verification.
pub(super) async fn consume_challenge(pool: &PgPool, token_hash: &[u8]) -> Result<bool> {
    let query = r"
        UPDATE mfa_challenges
        SET used = TRUE, used_at = NOW()
        WHERE token_hash = $1
          AND used = FALSE
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to consume mfa challenge")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn fetch_mfa_user(pool: &PgPool, user_id: Uuid) -> Result<Option<MfaUser>> {
    let query = r"
        SELECT email, password_hash, is_active, totp_secret, totp_enabled
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user mfa state")?;

    Ok(row.map(|row| MfaUser {
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        totp_secret: row.get("totp_secret"),
        totp_enabled: row.get("totp_enabled"),
    }))
}

/// Stage a secret during enrollment. Refuses to touch an account that
/// already has MFA enabled.
pub(super) async fn set_pending_totp_secret(
    pool: &PgPool,
    user_id: Uuid,
    secret: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET totp_secret = $2, updated_at = NOW()
        WHERE id = $1 AND totp_enabled = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to stage totp secret")?;
    Ok(result.rows_affected() > 0)
}

/// Flip MFA on and store the backup code hashes, guarded so two concurrent
/// enables cannot both succeed.
pub(super) async fn enable_totp(
    pool: &PgPool,
    user_id: Uuid,
    backup_code_hashes: &[String],
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET totp_enabled = TRUE, backup_codes = $2, updated_at = NOW()
        WHERE id = $1 AND totp_enabled = FALSE AND totp_secret IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(backup_code_hashes)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to enable totp")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn disable_totp(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE users
        SET totp_enabled = FALSE, totp_secret = NULL, backup_codes = '{}',
            updated_at = NOW()
        WHERE id = $1 AND totp_enabled = TRUE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to disable totp")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn list_backup_code_hashes(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = "SELECT backup_codes FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to list backup codes")?;
    Ok(row
        .map(|row| row.get::<Vec<String>, _>("backup_codes"))
        .unwrap_or_default())
}

/// Remove one backup code hash. The `= ANY` guard makes the removal
/// single-use even under concurrent verifications.
pub(super) async fn consume_backup_code(
    pool: &PgPool,
    user_id: Uuid,
    code_hash: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET backup_codes = array_remove(backup_codes, $2), updated_at = NOW()
        WHERE id = $1 AND $2 = ANY(backup_codes)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(code_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to consume backup code")?;
    Ok(result.rows_affected() > 0)
}
