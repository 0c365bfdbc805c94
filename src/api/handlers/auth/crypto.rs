//! Crypto primitives: password KDF, TOTP, backup codes, constant-time compares.
//!
//! Security boundaries:
//! - Password hashes are PBKDF2-HMAC-SHA256 with a random per-password salt,
//!   stored as `salt:derived_key` (both base64).
//! - All secret comparisons go through [`constant_time_eq`].
//! - Backup codes are normalized (hyphens/whitespace stripped, case-folded)
//!   before hashing so user transcription quirks do not lock anyone out.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pbkdf2::pbkdf2_hmac;
use rand::{Rng, RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

const SALT_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;
const TOTP_ISSUER: &str = "Encore";

pub(crate) const BACKUP_CODE_COUNT: usize = 10;
// No 0/O/1/I/L to keep hand-typed codes unambiguous.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTVWXYZ23456789";

/// Compare two byte strings in constant time.
///
/// Unequal lengths return false immediately; everything else is a full
/// fixed-time scan.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Hash a password with a fresh random salt.
///
/// # Errors
///
/// Returns an error if the system RNG fails.
pub(crate) fn hash_password(plain: &str, iterations: u32) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;

    let mut derived = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha256>(plain.as_bytes(), &salt, iterations, &mut derived);

    Ok(format!(
        "{}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(derived)
    ))
}

/// Well-formed hash of nothing useful. Verifying against it burns the same
/// KDF work as a real check, so unknown accounts are not faster to probe.
pub(crate) const DUMMY_HASH: &str =
    "AAAAAAAAAAAAAAAAAAAAAA==:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Verify a password against a stored `salt:derived_key` hash.
///
/// Malformed stored hashes verify as false rather than erroring; the caller
/// treats both the same way.
pub(crate) fn verify_password(plain: &str, stored: &str, iterations: u32) -> bool {
    let mut parts = stored.splitn(2, ':');
    let (Some(salt_b64), Some(key_b64)) = (parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt_b64), STANDARD.decode(key_b64)) else {
        return false;
    };
    if expected.len() != DERIVED_KEY_LEN {
        return false;
    }

    let mut derived = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha256>(plain.as_bytes(), &salt, iterations, &mut derived);
    constant_time_eq(&derived, &expected)
}

fn totp_for_secret(secret_base32: &str, account: &str) -> Result<TOTP> {
    let secret = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|err| anyhow!("invalid TOTP secret: {err:?}"))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some(TOTP_ISSUER.to_string()),
        account.to_string(),
    )
    .map_err(|err| anyhow!("TOTP init error: {err}"))
}

/// Generate a fresh TOTP secret for enrollment.
///
/// Returns the base32 secret and the otpauth:// provisioning URL.
///
/// # Errors
///
/// Returns an error if secret generation fails.
pub(crate) fn generate_totp_secret(account: &str) -> Result<(String, String)> {
    let secret = Secret::generate_secret()
        .to_bytes()
        .map_err(|err| anyhow!("TOTP secret generation error: {err:?}"))?;
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        Some(TOTP_ISSUER.to_string()),
        account.to_string(),
    )
    .map_err(|err| anyhow!("TOTP init error: {err}"))?;
    Ok((totp.get_secret_base32(), totp.get_url()))
}

/// Verify a 6-digit TOTP code at the given unix time, tolerating ±1 step
/// of clock skew.
pub(crate) fn verify_totp(secret_base32: &str, account: &str, code: &str, time: u64) -> bool {
    match totp_for_secret(secret_base32, account) {
        Ok(totp) => totp.check(code.trim(), time),
        Err(_) => false,
    }
}

/// Generate the TOTP code for a secret at a given unix time (enrollment
/// confirmation and tests).
pub(crate) fn generate_totp_code(
    secret_base32: &str,
    account: &str,
    time: u64,
) -> Result<String> {
    Ok(totp_for_secret(secret_base32, account)?.generate(time))
}

pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// Generate a batch of human-readable one-time backup codes (`XXXX-XXXX`).
pub(crate) fn generate_backup_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let chars: Vec<u8> = (0..8)
                .map(|_| {
                    let idx = rng.gen_range(0..BACKUP_CODE_ALPHABET.len());
                    BACKUP_CODE_ALPHABET[idx]
                })
                .collect();
            format!(
                "{}-{}",
                String::from_utf8_lossy(&chars[..4]),
                String::from_utf8_lossy(&chars[4..])
            )
        })
        .collect()
}

/// Strip hyphens/whitespace and uppercase before hashing or comparing.
pub(crate) fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Hex SHA-256 digest of a normalized backup code.
pub(crate) fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_backup_code(code).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Find the stored hash matching a submitted backup code, if any.
///
/// Every stored hash is compared in constant time; the scan does not stop
/// at the first match.
pub(crate) fn find_backup_code<'a>(code: &str, hashes: &'a [String]) -> Option<&'a str> {
    let candidate = hash_backup_code(code);
    let mut matched: Option<&str> = None;
    for hash in hashes {
        if constant_time_eq(candidate.as_bytes(), hash.as_bytes()) {
            matched = Some(hash.as_str());
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 1_000; // keep the KDF fast under test

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple", ITERATIONS).expect("hash");
        assert!(verify_password(
            "correct horse battery staple",
            &hash,
            ITERATIONS
        ));
        assert!(!verify_password("wrong password", &hash, ITERATIONS));
    }

    #[test]
    fn password_hashes_are_salted() {
        let first = hash_password("secret", ITERATIONS).expect("hash");
        let second = hash_password("secret", ITERATIONS).expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn verify_password_rejects_malformed_hashes() {
        assert!(!verify_password("secret", "no-colon-here", ITERATIONS));
        assert!(!verify_password("secret", "bad!:base64!", ITERATIONS));
        assert!(!verify_password("secret", "", ITERATIONS));
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn totp_accepts_adjacent_step_and_rejects_distant() {
        let (secret, url) = generate_totp_secret("admin@example.com").expect("secret");
        assert!(url.starts_with("otpauth://totp/"));

        let time = 1_700_000_000;
        let code = generate_totp_code(&secret, "admin@example.com", time).expect("code");

        assert!(verify_totp(&secret, "admin@example.com", &code, time));
        assert!(verify_totp(&secret, "admin@example.com", &code, time + 30));
        assert!(verify_totp(&secret, "admin@example.com", &code, time - 30));
        assert!(!verify_totp(&secret, "admin@example.com", &code, time + 90));
        assert!(!verify_totp(&secret, "admin@example.com", &code, time - 90));
    }

    #[test]
    fn totp_rejects_garbage_secret() {
        assert!(!verify_totp("!!not-base32!!", "a@b.co", "123456", 1_700_000_000));
    }

    #[test]
    fn backup_codes_have_expected_shape() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), BACKUP_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), 9);
            assert_eq!(code.chars().nth(4), Some('-'));
            assert!(!code.contains('0'));
            assert!(!code.contains('O'));
        }
    }

    #[test]
    fn backup_code_normalization_tolerates_formatting() {
        assert_eq!(normalize_backup_code(" ab2f-Kj9Q "), "AB2FKJ9Q");
        assert_eq!(
            hash_backup_code("AB2F-KJ9Q"),
            hash_backup_code("ab2f kj9q")
        );
    }

    #[test]
    fn find_backup_code_matches_normalized_form() {
        let codes = generate_backup_codes();
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();

        let sloppy = codes[3].to_lowercase().replace('-', " ");
        let matched = find_backup_code(&sloppy, &hashes);
        assert_eq!(matched, Some(hashes[3].as_str()));

        assert_eq!(find_backup_code("ZZZZ-ZZZZ", &hashes), None);
    }
}
