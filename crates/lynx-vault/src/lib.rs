//! Lynx Vault - Encrypted credential store
//!
//! Persists [`EncryptedRecord`](lynx_core::EncryptedRecord)s as a single JSON
//! document and finds a user's record by trying their biometric key against
//! each record's sealed marker in turn.

pub mod error;
pub mod vault;

pub use error::{Result, VaultError};
pub use vault::CredentialVault;
