//! Database helpers for users and sessions.
//!
//! Raw tokens never reach these functions; callers hash first. Every state
//! transition carries its precondition in the WHERE clause so concurrent
//! requests race on the row, not in process memory.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token, is_unique_violation};

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    Conflict,
}

/// Fields needed for the password step of login.
pub(super) struct LoginRecord {
    pub(super) user_id: Uuid,
    pub(super) password_hash: String,
    pub(super) is_active: bool,
    pub(super) totp_enabled: bool,
}

/// Data returned for a valid session token.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: String,
    pub(crate) remember: bool,
}

pub(super) async fn insert_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    display_name: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO users (email, password_hash, display_name)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Look up login data by email (password step).
pub(super) async fn lookup_login_record(pool: &PgPool, email: &str) -> Result<Option<LoginRecord>> {
    let query = r"
        SELECT id, password_hash, is_active, totp_enabled
        FROM users
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login record")?;

    Ok(row.map(|row| LoginRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        totp_enabled: row.get("totp_enabled"),
    }))
}

/// Create a session row and return the raw token for the cookie.
pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
    remember: bool,
    idle_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO sessions (token_hash, user_id, ip, user_agent, remember, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    // Token collisions are astronomically unlikely, but the primary key
    // makes them loud; retry a couple of times instead of failing the login.
    for _ in 0..3 {
        let token = generate_token("")?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ip)
            .bind(user_agent)
            .bind(remember)
            .bind(idle_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session token hash to its user.
///
/// Expired sessions and inactive users both come back as `None`; the caller
/// cannot and must not distinguish them.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT users.id, users.email, users.role, sessions.remember
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.token_hash = $1
          AND sessions.expires_at > NOW()
          AND users.is_active
        LIMIT 1
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
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: row.get("role"),
        remember: row.get("remember"),
    }))
}

/// Apply the sliding-refresh rule as one conditional update.
///
/// The expiry extends only when activity is stale or expiry is near, which
/// bounds write frequency to once per threshold interval per session.
/// Returns true when the row was refreshed so the caller can reissue the
/// cookie.
pub(crate) async fn refresh_session(
    pool: &PgPool,
    token_hash: &[u8],
    idle_seconds: i64,
    threshold_seconds: i64,
) -> Result<bool> {
    let query = r"
        UPDATE sessions
        SET expires_at = NOW() + ($2 * INTERVAL '1 second'),
            last_activity_at = NOW()
        WHERE token_hash = $1
          AND expires_at > NOW()
          AND (
                last_activity_at <= NOW() - ($3 * INTERVAL '1 second')
                OR expires_at <= NOW() + ($3 * INTERVAL '1 second')
          )
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_hash)
        .bind(idle_seconds)
        .bind(threshold_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to refresh session")?;
    Ok(result.rows_affected() > 0)
}

/// Logout is idempotent; it's fine if no rows are deleted.
pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Revoke every session for a user (password reset, deactivation).
/// This is a cascading safety net, not best-effort: callers propagate errors.
pub(crate) async fn delete_sessions_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
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
        .context("failed to delete sessions for user")?;
    Ok(result.rows_affected())
}

pub(super) async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update last login")?;
    Ok(())
}

pub(super) async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LoginRecord, SessionRecord, SignupOutcome};
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", SignupOutcome::Created(Uuid::nil())),
            format!("Created({})", Uuid::nil())
        );
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn login_record_holds_values() {
        let record = LoginRecord {
            user_id: Uuid::nil(),
            password_hash: "salt:key".to_string(),
            is_active: true,
            totp_enabled: false,
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert!(record.is_active);
        assert!(!record.totp_enabled);
    }

    #[test]
    fn session_record_holds_values() {
        let record = SessionRecord {
            user_id: Uuid::nil(),
            email: "admin@example.com".to_string(),
            role: "admin".to_string(),
            remember: false,
        };
        assert_eq!(record.email, "admin@example.com");
        assert_eq!(record.role, "admin");
    }
}
