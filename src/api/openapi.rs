use utoipa::OpenApi;

use crate::api::handlers::{auth, health};

/// `OpenAPI` document covering every routed endpoint.
///
/// Keep this list in sync with the router in `api::new`; a handler added
/// there without a `paths` entry ships undocumented.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::signup::signup,
        auth::login::login,
        auth::mfa::verify,
        auth::mfa::setup,
        auth::mfa::enable,
        auth::mfa::disable,
        auth::session::session,
        auth::session::logout,
        auth::password_reset::request,
        auth::password_reset::confirm,
        auth::trusted_device::list,
        auth::trusted_device::revoke_all,
        auth::audit::recent,
    ),
    components(schemas(
        health::Health,
        auth::types::SignupRequest,
        auth::types::SignupResponse,
        auth::types::LoginRequest,
        auth::types::LoginResponse,
        auth::types::MfaVerifyRequest,
        auth::types::MfaSetupResponse,
        auth::types::MfaEnableRequest,
        auth::types::MfaEnableResponse,
        auth::types::MfaDisableRequest,
        auth::types::SessionResponse,
        auth::types::PasswordResetRequest,
        auth::types::PasswordResetConfirm,
        auth::types::TrustedDeviceEntry,
        auth::types::TrustedDeviceList,
        auth::types::AuditEntry,
        auth::types::AuditLogList,
    )),
    tags(
        (name = "auth", description = "Authentication, MFA and session management"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_auth_paths() {
        let doc = openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/v1/auth/login"));
        assert!(paths.contains_key("/v1/auth/mfa/verify"));
        assert!(paths.contains_key("/v1/auth/devices"));
        assert!(paths.contains_key("/v1/auth/audit"));
    }
}
