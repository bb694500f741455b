//! Core types shared between the orchestrator and its services

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};

/// Length of a biometric key digest in hex characters (SHA-256)
pub const BIOMETRIC_KEY_HEX_LEN: usize = 64;

/// Mail-account credentials
///
/// Held only for the duration of a login or registration attempt. The secret
/// is wiped from memory on drop and never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    email: String,
    secret: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
        }
    }

    /// Build credentials from raw form input
    ///
    /// Both fields are trimmed; empty input is rejected so nothing is
    /// dispatched to the mail service for a blank form.
    pub fn from_form(email: &str, secret: &str) -> Result<Self> {
        let email = email.trim();
        let secret = secret.trim();

        if email.is_empty() {
            return Err(CoreError::InvalidCredentials("email is empty".to_string()));
        }
        if secret.is_empty() {
            return Err(CoreError::InvalidCredentials("secret is empty".to_string()));
        }

        Ok(Self::new(email, secret))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Deterministic digest of a fingerprint's characteristics
///
/// Lowercase SHA-256 hex. The same finger yields the same digest as long as
/// the sensor reports the same stored template for it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BiometricKey(String);

impl BiometricKey {
    /// Hash the canonical string form of a characteristics dump
    ///
    /// The canonical form is the decimal byte list in square brackets,
    /// comma-space separated: `[3, 1, 87]`.
    pub fn from_characteristics(characteristics: &[u8]) -> Self {
        let canonical = canonical_characteristics(characteristics);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse an existing hex digest
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != BIOMETRIC_KEY_HEX_LEN {
            return Err(CoreError::InvalidBiometricKey(format!(
                "expected {} hex characters, got {}",
                BIOMETRIC_KEY_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidBiometricKey(
                "digest contains non-hex characters".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for BiometricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BiometricKey(<redacted>)")
    }
}

fn canonical_characteristics(characteristics: &[u8]) -> String {
    let items: Vec<String> = characteristics.iter().map(|b| b.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Which form is shown while logged out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Form {
    #[default]
    Login,
    Registration,
}

/// Session phase owned by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    LoggedOut(Form),
    Enrolling,
    LoggedIn,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::LoggedOut(Form::Login)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::LoggedOut(Form::Login) => f.write_str("logged out (login)"),
            SessionPhase::LoggedOut(Form::Registration) => {
                f.write_str("logged out (registration)")
            }
            SessionPhase::Enrolling => f.write_str("enrolling"),
            SessionPhase::LoggedIn => f.write_str("logged in"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        assert_eq!(canonical_characteristics(&[]), "[]");
        assert_eq!(canonical_characteristics(&[3, 1, 87]), "[3, 1, 87]");
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = BiometricKey::from_characteristics(&[1, 2, 3, 4]);
        let b = BiometricKey::from_characteristics(&[1, 2, 3, 4]);
        let c = BiometricKey::from_characteristics(&[1, 2, 3, 5]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), BIOMETRIC_KEY_HEX_LEN);
    }

    #[test]
    fn test_key_matches_known_digest() {
        // sha256("[1, 2, 3]")
        let key = BiometricKey::from_characteristics(&[1, 2, 3]);
        let expected = hex::encode(Sha256::digest(b"[1, 2, 3]"));
        assert_eq!(key.as_str(), expected);
    }

    #[test]
    fn test_from_hex_validation() {
        assert!(BiometricKey::from_hex(&"ab".repeat(32)).is_ok());
        assert!(BiometricKey::from_hex("abc").is_err());
        assert!(BiometricKey::from_hex(&"zz".repeat(32)).is_err());

        let upper = BiometricKey::from_hex(&"AB".repeat(32)).unwrap();
        assert_eq!(upper.as_str(), "ab".repeat(32));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("a@x.com", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("a@x.com"));
        assert!(!rendered.contains("hunter2"));

        let key = BiometricKey::from_characteristics(&[9]);
        assert!(!format!("{:?}", key).contains(key.as_str()));
    }

    #[test]
    fn test_from_form_trims_and_rejects_empty() {
        let creds = Credentials::from_form("  a@x.com ", " secret1\n").unwrap();
        assert_eq!(creds.email(), "a@x.com");
        assert_eq!(creds.secret(), "secret1");

        assert!(Credentials::from_form("   ", "secret").is_err());
        assert!(Credentials::from_form("a@x.com", "").is_err());
    }

    #[test]
    fn test_default_phase() {
        assert_eq!(SessionPhase::default(), SessionPhase::LoggedOut(Form::Login));
    }
}
