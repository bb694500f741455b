//! Error types for the sensor driver

use thiserror::Error;

/// Result type alias for sensor operations
pub type Result<T> = std::result::Result<T, SensorError>;

/// Errors that can occur while talking to the sensor
#[derive(Debug, Error)]
pub enum SensorError {
    /// Port could not be opened or the handshake was rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// No open link; `connect` has not succeeded yet
    #[error("Sensor not connected")]
    NotConnected,

    /// Malformed packet or unexpected response shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Sensor answered with a failure confirmation code
    #[error("Sensor rejected {instruction}: code 0x{code:02X}")]
    Device { instruction: &'static str, code: u8 },

    /// No finger captured within the configured bound
    #[error("Timed out waiting for a finger")]
    CaptureTimeout,

    /// Template library has no free slot
    #[error("Template library is full")]
    LibraryFull,

    /// IO error on the underlying link
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for SensorError {
    fn from(e: serialport::Error) -> Self {
        SensorError::Connection(e.to_string())
    }
}
