//! Biometric key derivation and per-field authenticated encryption
//!
//! A record field is sealed with ChaCha20-Poly1305 under a key taken from
//! the biometric digest. Each token is self-contained:
//!
//! - 12-byte random nonce
//! - ciphertext
//! - 16-byte authentication tag (appended by ChaCha20-Poly1305)
//!
//! and the whole thing is base64 encoded so it can live in a JSON document.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, Result};
use crate::types::BiometricKey;

/// Number of digest bytes used as key material
///
/// Matches the 256-bit key size of the cipher. Changing it makes every
/// existing record unreadable.
pub const KEY_PREFIX_LEN: usize = 32;

/// Size of the nonce for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag
const TAG_SIZE: usize = 16;

/// Symmetric key derived from a biometric digest
///
/// The canonical encoding is the base64 form of the first `KEY_PREFIX_LEN`
/// bytes of the digest text.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey {
    encoded: String,
    key: [u8; KEY_PREFIX_LEN],
}

impl FieldKey {
    /// Derive the field key from a biometric digest
    pub fn derive(biometric: &BiometricKey) -> Self {
        let mut key = [0u8; KEY_PREFIX_LEN];
        key.copy_from_slice(&biometric.as_bytes()[..KEY_PREFIX_LEN]);
        Self {
            encoded: STANDARD.encode(key),
            key,
        }
    }

    /// Rebuild a key from its base64 encoding
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Crypto(format!("Invalid key encoding: {}", e)))?;

        if decoded.len() != KEY_PREFIX_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CoreError::Crypto(format!(
                "Key must be {} bytes, got {}",
                KEY_PREFIX_LEN, len
            )));
        }

        let mut key = [0u8; KEY_PREFIX_LEN];
        key.copy_from_slice(&decoded);
        decoded.zeroize();

        Ok(Self {
            encoded: encoded.to_string(),
            key,
        })
    }

    /// Base64 encoding of the key
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CoreError::Crypto(format!("Invalid key: {}", e)))
    }
}

/// Encrypt a single field into a self-contained token
pub fn encrypt_field(key: &FieldKey, plaintext: &str) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()?
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CoreError::Crypto(format!("Encryption failed: {}", e)))?;

    let mut token = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    token.extend_from_slice(&nonce_bytes);
    token.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(token))
}

/// Decrypt a token produced by [`encrypt_field`]
///
/// Every failure mode (bad encoding, truncation, wrong key, tampering)
/// collapses into `CoreError::DecryptionFailed`.
pub fn decrypt_field(key: &FieldKey, token: &str) -> Result<String> {
    let raw = STANDARD
        .decode(token)
        .map_err(|_| CoreError::DecryptionFailed)?;

    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CoreError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = key
        .cipher()?
        .decrypt(nonce, ciphertext)
        .map_err(|_| CoreError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CoreError::DecryptionFailed)
}
