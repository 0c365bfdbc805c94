//! Authenticated caller identity and role checks.

use std::sync::Arc;

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::{error::AuthError, session::verify_session, state::AuthState};

/// Roles ordered by privilege; a higher role satisfies a lower requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The user behind a verified session.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

/// Resolve the request to a principal or fail with a generic 401.
pub(crate) async fn require_auth(
    pool: &PgPool,
    state: &Arc<AuthState>,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    let Some(verified) = verify_session(pool, state.config(), headers).await? else {
        return Err(AuthError::Unauthorized);
    };
    let Some(role) = Role::parse(&verified.record.role) else {
        // Unknown role means a bad migration, not a bad caller.
        tracing::error!(role = %verified.record.role, "unrecognized role in users table");
        return Err(AuthError::Server);
    };
    Ok(Principal {
        user_id: verified.record.user_id,
        email: verified.record.email,
        role,
    })
}

/// Authenticated but under-privileged callers get 403, not 401.
pub(crate) fn require_role(principal: &Principal, required: Role) -> Result<(), AuthError> {
    if principal.role >= required {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::nil(),
            email: "user@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn role_ordering_follows_privilege() {
        assert!(Role::Admin > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
    }

    #[test]
    fn role_parse_known_values() {
        assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
        assert_eq!(Role::parse("editor"), Some(Role::Editor));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None);
    }

    #[test]
    fn require_role_allows_equal_or_higher() {
        assert!(require_role(&principal(Role::Admin), Role::Editor).is_ok());
        assert!(require_role(&principal(Role::Editor), Role::Editor).is_ok());
    }

    #[test]
    fn require_role_rejects_lower_with_forbidden() {
        let err = require_role(&principal(Role::Viewer), Role::Editor).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }
}
