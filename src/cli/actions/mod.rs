pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        frontend_url: String,
        csrf_secret: Option<SecretString>,
        session_idle_seconds: i64,
        mfa_challenge_ttl_seconds: i64,
        trusted_device_ttl_days: i64,
    },
}
