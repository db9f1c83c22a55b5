//! RFC 6238 time-based one-time codes (HMAC-SHA1, 30 s period, 6 digits).

use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

use crate::error::{LockerError, Result};

type HmacSha1 = Hmac<Sha1>;

pub const PERIOD_SECS: u64 = 30;
pub const DIGITS: u32 = 6;
pub const SECRET_BYTES: usize = 20; // 160 bits
/// Steps accepted on either side of the current one.
pub const SKEW_STEPS: i64 = 1;

pub const DEFAULT_ACCOUNT: &str = "FolderLocker";
pub const DEFAULT_ISSUER: &str = "Locker";

/// Fresh 160-bit secret, base32 encoded (32 characters, no padding).
pub fn generate_secret() -> String {
    let mut key = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(key.as_mut_slice());
    BASE32.encode(key.as_slice())
}

/// `otpauth://` URI for authenticator apps; QR rendering happens elsewhere.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&digits={DIGITS}&period={PERIOD_SECS}"
    )
}

/// Checks `code` against the current time, accepting one step of drift in
/// either direction.
pub fn verify(code: &str, secret: &str) -> bool {
    verify_at(code, secret, unix_now())
}

pub fn verify_at(code: &str, secret: &str, unix_secs: u64) -> bool {
    let Some(key) = decode_secret(secret) else {
        return false;
    };
    let code = code.trim().as_bytes();
    let step = time_step(unix_secs) as i64;

    // Every candidate is computed and compared; no early exit.
    let mut matched = Choice::from(0);
    for offset in -SKEW_STEPS..=SKEW_STEPS {
        let counter = step + offset;
        if counter < 0 {
            continue;
        }
        if let Some(expected) = hotp(&key, counter as u64) {
            matched |= expected.as_bytes().ct_eq(code);
        }
    }
    matched.into()
}

/// Code for the current step. Diagnostic only; unlocking goes through
/// [`verify`].
pub fn current_code(secret: &str) -> Result<String> {
    code_at(secret, unix_now())
}

pub fn code_at(secret: &str, unix_secs: u64) -> Result<String> {
    let key = decode_secret(secret).ok_or(LockerError::InvalidSecret)?;
    hotp(&key, time_step(unix_secs)).ok_or(LockerError::InvalidSecret)
}

/// Seconds left before the current code rolls over.
pub fn seconds_remaining() -> u64 {
    PERIOD_SECS - unix_now() % PERIOD_SECS
}

fn time_step(unix_secs: u64) -> u64 {
    unix_secs / PERIOD_SECS
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Accepts lowercase, embedded spaces and optional `=` padding.
fn decode_secret(secret: &str) -> Option<Zeroizing<Vec<u8>>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return None;
    }
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .ok()
        .map(Zeroizing::new)
}

// RFC 4226 dynamic truncation.
fn hotp(key: &[u8], counter: u64) -> Option<String> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Some(format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B SHA-1 seed "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc4226_hotp_vectors() {
        let key = b"12345678901234567890";
        let expected = ["755224", "287082", "359152", "969429", "338314", "254676"];
        for (counter, code) in expected.iter().enumerate() {
            assert_eq!(hotp(key, counter as u64).as_deref(), Some(*code));
        }
    }

    #[test]
    fn test_rfc6238_vectors() {
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_109).unwrap(), "081804");
        assert_eq!(code_at(RFC_SECRET, 1_111_111_111).unwrap(), "050471");
        assert_eq!(code_at(RFC_SECRET, 1_234_567_890).unwrap(), "005924");
        assert_eq!(code_at(RFC_SECRET, 2_000_000_000).unwrap(), "279037");
    }

    #[test]
    fn test_tolerance_window() {
        let t = 1_234_567_890;
        let code = code_at(RFC_SECRET, t).unwrap();
        assert!(verify_at(&code, RFC_SECRET, t));
        assert!(verify_at(&code, RFC_SECRET, t - PERIOD_SECS));
        assert!(verify_at(&code, RFC_SECRET, t + PERIOD_SECS));
        assert!(!verify_at(&code, RFC_SECRET, t - 2 * PERIOD_SECS));
        assert!(!verify_at(&code, RFC_SECRET, t + 2 * PERIOD_SECS));
    }

    #[test]
    fn test_rejects_malformed_codes() {
        let t = 59;
        assert!(!verify_at("", RFC_SECRET, t));
        assert!(!verify_at("28708", RFC_SECRET, t));
        assert!(!verify_at("2870822", RFC_SECRET, t));
        assert!(!verify_at("abcdef", RFC_SECRET, t));
        assert!(verify_at(" 287082 ", RFC_SECRET, t));
    }

    #[test]
    fn test_invalid_secret() {
        assert!(!verify_at("287082", "", 59));
        assert!(!verify_at("287082", "not base32!", 59));
        assert!(matches!(code_at("!!!", 59), Err(LockerError::InvalidSecret)));
    }

    #[test]
    fn test_secret_normalization() {
        let messy = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(code_at(messy, 59).unwrap(), "287082");
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(decode_secret(&a).unwrap().len(), SECRET_BYTES);
        assert!(verify(&current_code(&a).unwrap(), &a));
    }

    #[test]
    fn test_provisioning_uri() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "FolderLocker", "Locker");
        assert_eq!(
            uri,
            "otpauth://totp/Locker:FolderLocker?secret=JBSWY3DPEHPK3PXP&issuer=Locker&digits=6&period=30"
        );
    }

    #[test]
    fn test_seconds_remaining_in_range() {
        let remaining = seconds_remaining();
        assert!((1..=PERIOD_SECS).contains(&remaining));
    }
}
