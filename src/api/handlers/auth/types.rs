//! Request and response payloads for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    /// True when the caller must complete a TOTP challenge before a
    /// session exists.
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignupResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaVerifyRequest {
    pub mfa_token: String,
    /// Six-digit TOTP code or an `XXXX-XXXX` backup code.
    pub code: String,
    /// Persist the session cookie across browser restarts.
    #[serde(default)]
    pub remember: bool,
    /// Skip the TOTP step on this device for the next month.
    #[serde(default)]
    pub remember_device: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MfaSetupResponse {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// otpauth:// URL for QR provisioning.
    pub otpauth_url: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaEnableRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MfaEnableResponse {
    /// Shown exactly once; only hashes are stored.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MfaDisableRequest {
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrustedDeviceEntry {
    pub created_at: String,
    pub last_used_at: String,
    pub last_ip: Option<String>,
    /// True for the device making this request.
    pub current: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrustedDeviceList {
    pub devices: Vec<TrustedDeviceEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub ip: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogList {
    pub entries: Vec<AuditEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_remember_defaults_false() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.co","password":"pw"}"#).unwrap();
        assert!(!request.remember);
    }

    #[test]
    fn login_response_omits_token_when_absent() {
        let body = serde_json::to_string(&LoginResponse {
            mfa_required: false,
            mfa_token: None,
        })
        .unwrap();
        assert_eq!(body, r#"{"mfa_required":false}"#);
    }

    #[test]
    fn login_response_includes_token_when_present() {
        let body = serde_json::to_string(&LoginResponse {
            mfa_required: true,
            mfa_token: Some("mfa_abc".to_string()),
        })
        .unwrap();
        assert!(body.contains(r#""mfa_token":"mfa_abc""#));
    }

    #[test]
    fn mfa_verify_remember_device_defaults_false() {
        let request: MfaVerifyRequest =
            serde_json::from_str(r#"{"mfa_token":"mfa_x","code":"123456"}"#).unwrap();
        assert!(!request.remember_device);
    }
}
