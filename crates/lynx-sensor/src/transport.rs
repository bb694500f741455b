//! Serial transport to the sensor

use std::io::{Read, Write};
use std::time::Duration;

use tracing::info;

use crate::error::{Result, SensorError};

/// Baud rate the module is configured for. Do not change.
pub const BAUD_RATE: u32 = 115_200;

/// Read timeout on the serial port
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A byte stream to the sensor
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

/// Opens fresh links; used for the initial connect and every reconnect
pub trait LinkOpener: Send {
    type Link: SerialLink;

    fn open(&self) -> Result<Self::Link>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Default port for the current platform
#[cfg(windows)]
pub fn default_port() -> Option<&'static str> {
    Some("COM3")
}

/// Default port for the current platform
#[cfg(unix)]
pub fn default_port() -> Option<&'static str> {
    Some("/dev/ttyUSB0")
}

/// Default port for the current platform
#[cfg(not(any(unix, windows)))]
pub fn default_port() -> Option<&'static str> {
    None
}

/// Opens the sensor's serial port
#[derive(Debug, Clone)]
pub struct SerialOpener {
    port: String,
}

impl SerialOpener {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    /// Use the platform default port
    pub fn platform_default() -> Result<Self> {
        default_port()
            .map(Self::new)
            .ok_or_else(|| SensorError::Connection("no default port for this platform".to_string()))
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl LinkOpener for SerialOpener {
    type Link = Box<dyn serialport::SerialPort>;

    fn open(&self) -> Result<Self::Link> {
        info!("Opening a serial connection to '{}'", self.port);
        let port = serialport::new(&self.port, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(port)
    }

    fn describe(&self) -> String {
        self.port.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_default_port() {
        #[cfg(unix)]
        assert_eq!(default_port(), Some("/dev/ttyUSB0"));
        #[cfg(windows)]
        assert_eq!(default_port(), Some("COM3"));
    }

    #[test]
    fn test_missing_port_is_connection_error() {
        let opener = SerialOpener::new("/definitely/not/a/port");
        assert!(matches!(opener.open(), Err(SensorError::Connection(_))));
    }
}
