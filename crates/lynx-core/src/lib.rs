//! Lynx Core - Shared types and cryptographic primitives
//!
//! This crate provides the foundational types used by the Lynx services:
//! credentials, biometric keys, the encrypted record format, and the
//! session phase owned by the orchestrator.

pub mod crypto;
pub mod error;
pub mod record;
pub mod types;

pub use crypto::{decrypt_field, encrypt_field, FieldKey, KEY_PREFIX_LEN, NONCE_SIZE};
pub use error::{CoreError, Result};
pub use record::{EncryptedRecord, PUBLIC_MARKER};
pub use types::{BiometricKey, Credentials, Form, SessionPhase};
