//! Error types for the Lynx core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Wrong key, tampered ciphertext, or malformed token
    #[error("Decryption failed - wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Invalid biometric key: {0}")]
    InvalidBiometricKey(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
