use crate::cli::{actions::Action, commands::auth};
use anyhow::Result;
use secrecy::SecretString;

/// Build the Action from parsed command line arguments.
///
/// # Errors
///
/// Returns an error if a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        frontend_url: matches
            .get_one(auth::ARG_FRONTEND_URL)
            .map(|s: &String| s.to_string())
            .unwrap_or_else(|| "http://localhost:5173".to_string()),
        csrf_secret: matches
            .get_one(auth::ARG_CSRF_SECRET)
            .map(|s: &String| SecretString::from(s.clone())),
        session_idle_seconds: matches
            .get_one::<i64>(auth::ARG_SESSION_IDLE_SECONDS)
            .copied()
            .unwrap_or(1800),
        mfa_challenge_ttl_seconds: matches
            .get_one::<i64>(auth::ARG_MFA_CHALLENGE_TTL_SECONDS)
            .copied()
            .unwrap_or(300),
        trusted_device_ttl_days: matches
            .get_one::<i64>(auth::ARG_TRUSTED_DEVICE_TTL_DAYS)
            .copied()
            .unwrap_or(30),
    })
}

#[cfg(test)]
mod tests {
    use super::handler;
    use crate::cli::{actions::Action, commands};

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "encore",
            "--dsn",
            "postgres://localhost/encore",
            "--port",
            "8081",
            "--frontend-url",
            "https://admin.encore.dev",
        ]);
        let action = handler(&matches).expect("action");
        let Action::Server {
            port,
            dsn,
            frontend_url,
            session_idle_seconds,
            ..
        } = action;
        assert_eq!(port, 8081);
        assert_eq!(dsn, "postgres://localhost/encore");
        assert_eq!(frontend_url, "https://admin.encore.dev");
        assert_eq!(session_idle_seconds, 1800);
    }
}
