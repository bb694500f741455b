//! Daemon configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use lynx_mail::{ImapConnector, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SEARCH_QUERY};
use lynx_sensor::{DriverConfig, SerialOpener, DEFAULT_MATCH_THRESHOLD};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DaemonError, Result};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "LYNX_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LynxConfig {
    /// Credential store document
    pub store_path: PathBuf,

    pub sensor: SensorConfig,

    pub mail: MailConfig,
}

/// Fingerprint sensor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial port; the platform default when unset
    pub port: Option<String>,

    /// Handshake password
    pub password: u32,

    /// Module address
    pub address: u32,

    /// Minimum accepted match score
    pub match_threshold: f64,

    /// Delay between capture attempts (milliseconds)
    pub capture_poll_ms: u64,

    /// Give up waiting for a finger after this many seconds
    pub capture_timeout_secs: Option<u64>,

    /// Pause between enrollment captures (milliseconds)
    pub enroll_pause_ms: u64,

    /// Wait before reconnecting after a device error (milliseconds)
    pub reconnect_delay_ms: u64,
}

/// Mail server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub host: String,

    pub port: u16,

    /// IMAP search used to list the inbox
    pub search_query: String,

    /// Connect and read timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for LynxConfig {
    fn default() -> Self {
        Self {
            store_path: Self::default_store_path(),
            sensor: SensorConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        let driver = DriverConfig::default();
        Self {
            port: None,
            password: driver.password,
            address: driver.address,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            capture_poll_ms: 100,
            capture_timeout_secs: None,
            enroll_pause_ms: 2000,
            reconnect_delay_ms: 1000,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            search_query: DEFAULT_SEARCH_QUERY.to_string(),
            timeout_secs: 30,
        }
    }
}

impl LynxConfig {
    fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lynx")
            .join("database.json")
    }

    /// Config file location: `$LYNX_CONFIG`, else `<config_dir>/lynx/config.json`
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("lynx")
                    .join("config.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.sensor.match_threshold.is_finite() || self.sensor.match_threshold < 0.0 {
            return Err(DaemonError::Config(format!(
                "match_threshold must be a non-negative number, got {}",
                self.sensor.match_threshold
            )));
        }
        if self.mail.host.trim().is_empty() {
            return Err(DaemonError::Config("mail host is empty".to_string()));
        }
        Ok(())
    }
}

impl SensorConfig {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            address: self.address,
            password: self.password,
            match_threshold: self.match_threshold,
            capture_poll: Duration::from_millis(self.capture_poll_ms),
            capture_timeout: self.capture_timeout_secs.map(Duration::from_secs),
            enroll_pause: Duration::from_millis(self.enroll_pause_ms),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Serial opener for the configured or platform default port
    pub fn opener(&self) -> Result<SerialOpener> {
        match &self.port {
            Some(port) => Ok(SerialOpener::new(port.clone())),
            None => Ok(SerialOpener::platform_default()?),
        }
    }
}

impl MailConfig {
    pub fn connector(&self) -> ImapConnector {
        ImapConnector::new(
            self.host.clone(),
            self.port,
            Duration::from_secs(self.timeout_secs),
        )
    }
}
