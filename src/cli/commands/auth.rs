//! Auth-related command line arguments.

use clap::{Arg, Command};

pub const ARG_FRONTEND_URL: &str = "frontend-url";
pub const ARG_CSRF_SECRET: &str = "csrf-secret";
pub const ARG_SESSION_IDLE_SECONDS: &str = "session-idle-seconds";
pub const ARG_MFA_CHALLENGE_TTL_SECONDS: &str = "mfa-challenge-ttl-seconds";
pub const ARG_TRUSTED_DEVICE_TTL_DAYS: &str = "trusted-device-ttl-days";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend origin used for CORS, cookies, and email links")
                .env("ENCORE_FRONTEND_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_CSRF_SECRET)
                .long(ARG_CSRF_SECRET)
                .help("Server secret for CSRF token derivation (required outside local development)")
                .env("ENCORE_CSRF_SECRET"),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_SECONDS)
                .long(ARG_SESSION_IDLE_SECONDS)
                .help("Session idle window in seconds")
                .env("ENCORE_SESSION_IDLE_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_MFA_CHALLENGE_TTL_SECONDS)
                .long(ARG_MFA_CHALLENGE_TTL_SECONDS)
                .help("MFA challenge lifetime in seconds")
                .env("ENCORE_MFA_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_DEVICE_TTL_DAYS)
                .long(ARG_TRUSTED_DEVICE_TTL_DAYS)
                .help("Trusted device lifetime in days")
                .env("ENCORE_TRUSTED_DEVICE_TTL_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let command = with_args(Command::new("test"));
        let matches = command.get_matches_from(vec!["test"]);
        assert_eq!(
            matches.get_one::<String>(ARG_FRONTEND_URL).map(String::as_str),
            Some("http://localhost:5173")
        );
        assert_eq!(
            matches.get_one::<i64>(ARG_SESSION_IDLE_SECONDS).copied(),
            Some(1800)
        );
        assert_eq!(
            matches.get_one::<i64>(ARG_TRUSTED_DEVICE_TTL_DAYS).copied(),
            Some(30)
        );
        assert!(matches.get_one::<String>(ARG_CSRF_SECRET).is_none());
    }
}
