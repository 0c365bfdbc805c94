//! Sliding-window failure counters with lockout, backed by `auth_attempts`.
//!
//! Identifiers are scoped per use case: client IP for login/signup, the user
//! id for MFA (so rotating IPs cannot bypass a lockout once the challenge
//! token reveals the target account). A failure outside the window restarts
//! the counter; reaching the threshold sets `lockout_until`. Counters are
//! synchronized through the database so every service instance sees them.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

pub(crate) const WINDOW_SECONDS: i64 = 10 * 60;
pub(crate) const FAILURE_THRESHOLD: i32 = 5;
const LOGIN_LOCKOUT_SECONDS: i64 = 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitScope {
    Login,
    Signup,
    Mfa,
    PasswordReset,
}

impl RateLimitScope {
    fn prefix(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::Mfa => "mfa",
            Self::PasswordReset => "reset",
        }
    }

    /// Build the scoped identifier. MFA prefers the user id over the IP so
    /// the lockout follows the account, not the network path.
    pub(crate) fn identifier(self, user_id: Option<Uuid>, ip: Option<&str>) -> String {
        let key = match (self, user_id) {
            (Self::Mfa, Some(user_id)) => user_id.to_string(),
            _ => ip.unwrap_or("unknown").to_string(),
        };
        format!("{}:{key}", self.prefix())
    }

    /// Login lockouts last a fixed hour; the rest lock for the remainder of
    /// the sliding window.
    fn lockout_from_window_start(self) -> bool {
        !matches!(self, Self::Login)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Locked { remaining_minutes: i64 },
}

/// Report whether the identifier is currently locked out.
///
/// # Errors
///
/// Returns an error on database failure; callers fail closed.
pub(crate) async fn check(pool: &PgPool, identifier: &str) -> Result<RateLimitDecision> {
    let query = r"
        SELECT CEIL(GREATEST(EXTRACT(EPOCH FROM (lockout_until - NOW())), 0) / 60.0)::BIGINT
               AS remaining_minutes
        FROM auth_attempts
        WHERE identifier = $1
          AND lockout_until > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check rate limit")?;

    Ok(match row {
        Some(row) => {
            let remaining: i64 = row.get("remaining_minutes");
            RateLimitDecision::Locked {
                remaining_minutes: remaining.max(1),
            }
        }
        None => RateLimitDecision::Allowed,
    })
}

/// Record one failure and apply the lockout when the threshold is reached.
///
/// The counter update is a single conditional upsert: a failure outside the
/// window resets the count to 1 and restarts the window, inside it the count
/// increments.
///
/// # Errors
///
/// Returns an error on database failure.
pub(crate) async fn record_failure(
    pool: &PgPool,
    identifier: &str,
    scope: RateLimitScope,
) -> Result<i32> {
    let query = r"
        INSERT INTO auth_attempts (identifier, attempt_count, first_failed_at)
        VALUES ($1, 1, NOW())
        ON CONFLICT (identifier) DO UPDATE SET
            attempt_count = CASE
                WHEN auth_attempts.first_failed_at <= NOW() - ($2 * INTERVAL '1 second') THEN 1
                ELSE auth_attempts.attempt_count + 1
            END,
            first_failed_at = CASE
                WHEN auth_attempts.first_failed_at <= NOW() - ($2 * INTERVAL '1 second') THEN NOW()
                ELSE auth_attempts.first_failed_at
            END,
            lockout_until = CASE
                WHEN auth_attempts.first_failed_at <= NOW() - ($2 * INTERVAL '1 second') THEN NULL
                ELSE auth_attempts.lockout_until
            END
        RETURNING attempt_count
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .bind(WINDOW_SECONDS)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record auth failure")?;

    let attempts: i32 = row.get("attempt_count");
    if attempts >= FAILURE_THRESHOLD {
        apply_lockout(pool, identifier, scope).await?;
    }
    Ok(attempts)
}

async fn apply_lockout(pool: &PgPool, identifier: &str, scope: RateLimitScope) -> Result<()> {
    // The WHERE clause re-checks the threshold so a concurrent reset wins.
    let query = if scope.lockout_from_window_start() {
        r"
        UPDATE auth_attempts
        SET lockout_until = first_failed_at + ($2 * INTERVAL '1 second')
        WHERE identifier = $1
          AND attempt_count >= $3
        "
    } else {
        r"
        UPDATE auth_attempts
        SET lockout_until = NOW() + ($2 * INTERVAL '1 second')
        WHERE identifier = $1
          AND attempt_count >= $3
        "
    };
    let lockout_seconds = if scope.lockout_from_window_start() {
        WINDOW_SECONDS
    } else {
        LOGIN_LOCKOUT_SECONDS
    };
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identifier)
        .bind(lockout_seconds)
        .bind(FAILURE_THRESHOLD)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to apply lockout")?;
    Ok(())
}

/// Clear the counter after a successful attempt.
///
/// # Errors
///
/// Returns an error on database failure.
pub(crate) async fn reset(pool: &PgPool, identifier: &str) -> Result<()> {
    let query = "DELETE FROM auth_attempts WHERE identifier = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identifier)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to reset rate limit")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_scoped() {
        assert_eq!(
            RateLimitScope::Login.identifier(None, Some("1.2.3.4")),
            "login:1.2.3.4"
        );
        assert_eq!(
            RateLimitScope::Signup.identifier(None, Some("1.2.3.4")),
            "signup:1.2.3.4"
        );
        assert_eq!(
            RateLimitScope::Login.identifier(None, None),
            "login:unknown"
        );
    }

    #[test]
    fn mfa_identifier_prefers_user_over_ip() {
        let user_id = Uuid::nil();
        assert_eq!(
            RateLimitScope::Mfa.identifier(Some(user_id), Some("1.2.3.4")),
            format!("mfa:{user_id}")
        );
        assert_eq!(
            RateLimitScope::Mfa.identifier(None, Some("1.2.3.4")),
            "mfa:1.2.3.4"
        );
    }

    #[test]
    fn lockout_policy_varies_by_scope() {
        assert!(!RateLimitScope::Login.lockout_from_window_start());
        assert!(RateLimitScope::Mfa.lockout_from_window_start());
        assert!(RateLimitScope::Signup.lockout_from_window_start());
        assert!(RateLimitScope::PasswordReset.lockout_from_window_start());
    }
}
