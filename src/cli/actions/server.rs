use crate::api;
use crate::api::handlers::auth::AuthConfig;
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            frontend_url,
            csrf_secret,
            session_idle_seconds,
            mfa_challenge_ttl_seconds,
            trusted_device_ttl_days,
        } => {
            let auth_config = AuthConfig::new(frontend_url)
                .with_session_idle_seconds(session_idle_seconds)
                .with_mfa_challenge_ttl_seconds(mfa_challenge_ttl_seconds)
                .with_trusted_device_ttl_seconds(trusted_device_ttl_days * 24 * 60 * 60);

            api::new(port, dsn, auth_config, csrf_secret).await?;
        }
    }

    Ok(())
}
