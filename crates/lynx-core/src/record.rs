//! Encrypted credential record format

use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_field, encrypt_field, FieldKey};
use crate::error::{CoreError, Result};
use crate::types::Credentials;

/// Plaintext sentinel sealed into every record
///
/// A key is the right key for a record iff the `key` field decrypts to this
/// exact string. This value MUST NOT change or existing stores stop matching.
pub const PUBLIC_MARKER: &str = "lynx";

/// One persisted credential record
///
/// All three fields are independent ciphertext tokens under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Sealed [`PUBLIC_MARKER`]
    pub key: String,
    /// Sealed email identifier
    pub email: String,
    /// Sealed secret
    pub password: String,
}

impl EncryptedRecord {
    /// Seal credentials under the given key
    pub fn seal(credentials: &Credentials, key: &FieldKey) -> Result<Self> {
        Ok(Self {
            key: encrypt_field(key, PUBLIC_MARKER)?,
            email: encrypt_field(key, credentials.email())?,
            password: encrypt_field(key, credentials.secret())?,
        })
    }

    /// Check whether `key` opens this record
    ///
    /// Decryption failure is the normal "not this record" outcome and maps to
    /// `false`.
    pub fn matches(&self, key: &FieldKey) -> bool {
        match decrypt_field(key, &self.key) {
            Ok(marker) => marker == PUBLIC_MARKER,
            Err(_) => false,
        }
    }

    /// Open the credential fields
    pub fn open(&self, key: &FieldKey) -> Result<Credentials> {
        if !self.matches(key) {
            return Err(CoreError::DecryptionFailed);
        }
        let email = decrypt_field(key, &self.email)?;
        let secret = decrypt_field(key, &self.password)?;
        Ok(Credentials::new(email, secret))
    }
}
