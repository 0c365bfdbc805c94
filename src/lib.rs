//! # Encore (Event Scheduling Admin, Auth Core)
//!
//! `encore` is the admin service behind an event-scheduling application
//! (bands, venues, performances). This crate implements its security core:
//! password authentication, sliding-expiry sessions, multi-factor
//! authentication, CSRF protection, and trusted devices.
//!
//! ## Authentication flow
//!
//! 1. `POST /v1/auth/login` verifies the password behind a per-IP rate
//!    limiter. Users without MFA receive a session cookie immediately.
//! 2. Users with MFA enabled receive a short-lived, single-use challenge
//!    token bound to the requesting IP and user agent, unless a valid
//!    trusted-device cookie is presented, which skips the challenge.
//! 3. `POST /v1/auth/mfa/verify` consumes the challenge atomically with a
//!    TOTP code or a one-time backup code and issues the session.
//!
//! ## Sessions
//!
//! Sessions expire after 30 minutes of inactivity. Activity extends the
//! expiry with a sliding refresh that writes at most once per minute per
//! session. Password resets and account deactivation revoke every session
//! for the affected user.
//!
//! ## Security boundaries
//!
//! - Raw tokens (session, challenge, device, reset) never touch the
//!   database; only SHA-256 hashes are stored.
//! - Every token state transition is a single conditional `UPDATE`; the
//!   affected-row count is the compare-and-set signal.
//! - Rejections are deliberately indistinguishable: a missing user, a wrong
//!   password, and an expired challenge all map to the same response.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
