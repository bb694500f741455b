//! Error types for the Lynx daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sensor error outside a worker (maintenance commands)
    #[error("Sensor error: {0}")]
    Sensor(#[from] lynx_sensor::SensorError),

    /// Credential store error outside a worker
    #[error("Store error: {0}")]
    Vault(#[from] lynx_vault::VaultError),

    /// A worker's command channel is closed
    #[error("{0} worker has stopped")]
    WorkerStopped(&'static str),
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
