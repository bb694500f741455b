//! Error types for the mail client

use thiserror::Error;

/// Result type alias for mail operations
pub type Result<T> = std::result::Result<T, MailError>;

/// Errors that can occur while talking to the mail server
#[derive(Debug, Error)]
pub enum MailError {
    /// Server unreachable or TLS handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server rejected the login
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Unexpected or malformed server response
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<imap::error::Error> for MailError {
    fn from(e: imap::error::Error) -> Self {
        match e {
            imap::error::Error::Io(io) => MailError::Io(io),
            imap::error::Error::ConnectionLost => {
                MailError::Connection("connection lost".to_string())
            }
            other => MailError::Protocol(other.to_string()),
        }
    }
}

impl From<native_tls::Error> for MailError {
    fn from(e: native_tls::Error) -> Self {
        MailError::Connection(e.to_string())
    }
}

impl From<mailparse::MailParseError> for MailError {
    fn from(e: mailparse::MailParseError) -> Self {
        MailError::Protocol(format!("malformed message: {}", e))
    }
}
