//! Error types for the credential store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur in the credential store
#[derive(Debug, Error)]
pub enum VaultError {
    /// IO error reading or writing the store file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file exists but cannot be parsed, or a matched record is damaged
    #[error("Store is corrupt: {0}")]
    Corrupt(String),

    /// Record encryption failed
    #[error("Core error: {0}")]
    Core(#[from] lynx_core::CoreError),
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Corrupt(e.to_string())
    }
}
