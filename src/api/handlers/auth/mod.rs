//! Authentication core: password login, TOTP second factor, sliding
//! sessions, trusted devices, CSRF double-submit and DB-backed rate
//! limiting.
//!
//! Raw tokens live only in cookies and response bodies; the database sees
//! SHA-256 hashes. All single-use guarantees are conditional updates, so
//! they hold across many server instances with no shared memory.

pub mod audit;
pub mod crypto;
pub mod csrf;
pub mod error;
pub mod login;
pub mod mfa;
pub mod password_reset;
pub mod principal;
pub mod rate_limit;
pub mod session;
pub mod signup;
pub mod state;
pub mod storage;
pub mod trusted_device;
pub mod types;
pub mod utils;

pub use csrf::CsrfGuard;
pub use error::AuthError;
pub use principal::{Principal, Role};
pub use state::{AuthConfig, AuthState};
