//! Auth configuration and shared state.

use super::csrf::CsrfGuard;

const DEFAULT_SESSION_IDLE_SECONDS: i64 = 30 * 60;
const DEFAULT_SESSION_REFRESH_THRESHOLD_SECONDS: i64 = 60;
const DEFAULT_MFA_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_TRUSTED_DEVICE_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_PASSWORD_ITERATIONS: u32 = 120_000;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_idle_seconds: i64,
    session_refresh_threshold_seconds: i64,
    mfa_challenge_ttl_seconds: i64,
    trusted_device_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    password_iterations: u32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: impl Into<String>) -> Self {
        Self {
            frontend_base_url: frontend_base_url.into(),
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            session_refresh_threshold_seconds: DEFAULT_SESSION_REFRESH_THRESHOLD_SECONDS,
            mfa_challenge_ttl_seconds: DEFAULT_MFA_CHALLENGE_TTL_SECONDS,
            trusted_device_ttl_seconds: DEFAULT_TRUSTED_DEVICE_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_session_idle_seconds(mut self, seconds: i64) -> Self {
        self.session_idle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_refresh_threshold_seconds(mut self, seconds: i64) -> Self {
        self.session_refresh_threshold_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.mfa_challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_trusted_device_ttl_seconds(mut self, seconds: i64) -> Self {
        self.trusted_device_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_iterations(mut self, iterations: u32) -> Self {
        self.password_iterations = iterations;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_idle_seconds(&self) -> i64 {
        self.session_idle_seconds
    }

    #[must_use]
    pub fn session_refresh_threshold_seconds(&self) -> i64 {
        self.session_refresh_threshold_seconds
    }

    #[must_use]
    pub fn mfa_challenge_ttl_seconds(&self) -> i64 {
        self.mfa_challenge_ttl_seconds
    }

    #[must_use]
    pub fn trusted_device_ttl_seconds(&self) -> i64 {
        self.trusted_device_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn password_iterations(&self) -> u32 {
        self.password_iterations
    }

    /// Cookies carry `Secure` only when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookies_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// `Strict` in production, relaxed to `Lax` for local development.
    #[must_use]
    pub fn same_site(&self) -> &'static str {
        if self.cookies_secure() { "Strict" } else { "Lax" }
    }
}

pub struct AuthState {
    config: AuthConfig,
    csrf: CsrfGuard,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, csrf: CsrfGuard) -> Self {
        Self { config, csrf }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://admin.encore.dev".to_string());

        assert_eq!(config.session_idle_seconds(), 30 * 60);
        assert_eq!(config.session_refresh_threshold_seconds(), 60);
        assert_eq!(config.mfa_challenge_ttl_seconds(), 5 * 60);
        assert_eq!(config.trusted_device_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.password_iterations(), 120_000);

        let config = config
            .with_session_idle_seconds(60)
            .with_session_refresh_threshold_seconds(5)
            .with_mfa_challenge_ttl_seconds(30)
            .with_trusted_device_ttl_seconds(3600)
            .with_reset_token_ttl_seconds(120)
            .with_password_iterations(1_000);

        assert_eq!(config.session_idle_seconds(), 60);
        assert_eq!(config.session_refresh_threshold_seconds(), 5);
        assert_eq!(config.mfa_challenge_ttl_seconds(), 30);
        assert_eq!(config.trusted_device_ttl_seconds(), 3600);
        assert_eq!(config.reset_token_ttl_seconds(), 120);
        assert_eq!(config.password_iterations(), 1_000);
    }

    #[test]
    fn cookie_flags_follow_frontend_scheme() {
        let production = AuthConfig::new("https://admin.encore.dev".to_string());
        assert!(production.cookies_secure());
        assert_eq!(production.same_site(), "Strict");

        let development = AuthConfig::new("http://localhost:5173".to_string());
        assert!(!development.cookies_secure());
        assert_eq!(development.same_site(), "Lax");
    }
}
