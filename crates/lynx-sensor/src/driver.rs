//! Scan and two-stage enrollment protocols
//!
//! The driver owns at most one open link. Both protocols block in a capture
//! loop until a finger is presented, the caller's [`CancelToken`] fires, or
//! the optional capture timeout elapses. Cancellation and "no match" are
//! reported the same way, as [`ScanOutcome::NoMatch`].

use std::thread;
use std::time::{Duration, Instant};

use lynx_core::BiometricKey;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::device::{CharBuffer, Sensor};
use crate::error::{Result, SensorError};
use crate::packet::DEFAULT_ADDRESS;
use crate::transport::LinkOpener;

/// Minimum search score accepted as a match, on the module's native scale
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.5;

/// Driver tuning
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub address: u32,
    pub password: u32,
    pub match_threshold: f64,
    /// Delay between failed capture attempts
    pub capture_poll: Duration,
    /// Give up waiting for a finger after this long
    pub capture_timeout: Option<Duration>,
    /// Pause between the two enrollment captures
    pub enroll_pause: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            password: 0,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            capture_poll: Duration::from_millis(100),
            capture_timeout: None,
            enroll_pause: Duration::from_secs(2),
        }
    }
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Disconnected,
    Connected,
    Scanning,
    EnrollingStage1,
    EnrollingStage2,
}

/// Result of a scan or enrollment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Matched(BiometricKey),
    /// No match, mismatched enrollment captures, or cancellation
    NoMatch,
}

impl ScanOutcome {
    pub fn matched(&self) -> bool {
        matches!(self, ScanOutcome::Matched(_))
    }

    pub fn key(&self) -> Option<&BiometricKey> {
        match self {
            ScanOutcome::Matched(key) => Some(key),
            ScanOutcome::NoMatch => None,
        }
    }

    pub fn into_key(self) -> Option<BiometricKey> {
        match self {
            ScanOutcome::Matched(key) => Some(key),
            ScanOutcome::NoMatch => None,
        }
    }
}

/// Fingerprint sensor driver
pub struct Driver<O: LinkOpener> {
    opener: O,
    config: DriverConfig,
    sensor: Option<Sensor<O::Link>>,
    state: DriverState,
}

impl<O: LinkOpener> Driver<O> {
    pub fn new(opener: O, config: DriverConfig) -> Self {
        Self {
            opener,
            config,
            sensor: None,
            state: DriverState::Disconnected,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Open a fresh link and verify the module
    ///
    /// Any previous link is closed first, so repeated reconnects never hold
    /// more than one handle.
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();

        let link = self.opener.open()?;
        let mut sensor = Sensor::new(link, self.config.address, self.config.password);

        match sensor.verify_password() {
            Ok(true) => {}
            Ok(false) => {
                return Err(SensorError::Connection(
                    "sensor rejected the handshake password".to_string(),
                ))
            }
            Err(e) => {
                return Err(SensorError::Connection(format!("handshake failed: {}", e)));
            }
        }

        self.sensor = Some(sensor);
        self.state = DriverState::Connected;
        info!("Successfully connected to the fingerprint sensor at {}", self.opener.describe());
        Ok(())
    }

    /// Drop the current link, if any
    pub fn disconnect(&mut self) {
        if self.sensor.take().is_some() {
            debug!("Closed sensor link");
        }
        self.state = DriverState::Disconnected;
    }

    /// Wait for a finger and look it up in the on-board library
    pub fn scan(&mut self, token: &CancelToken) -> Result<ScanOutcome> {
        self.state = self.require_connected()?;
        self.state = DriverState::Scanning;
        let result = self.scan_inner(token);
        self.settle();
        result
    }

    /// Enroll a new finger with two captures
    ///
    /// `on_stage_one` runs after the first capture is buffered, before the
    /// pause that lets the user lift and re-place the finger.
    pub fn enroll<F>(&mut self, token: &CancelToken, on_stage_one: F) -> Result<ScanOutcome>
    where
        F: FnOnce(),
    {
        self.state = self.require_connected()?;
        self.state = DriverState::EnrollingStage1;
        let result = self.enroll_inner(token, on_stage_one);
        self.settle();
        result
    }

    /// Delete every template stored on the module
    pub fn clear_database(&mut self) -> Result<()> {
        info!("Clearing fingerprint database");
        self.sensor_mut()?.clear_database()
    }

    /// Number of templates stored on the module
    pub fn template_count(&mut self) -> Result<u16> {
        self.sensor_mut()?.template_count()
    }

    fn scan_inner(&mut self, token: &CancelToken) -> Result<ScanOutcome> {
        if !self.capture(CharBuffer::One, token)? {
            debug!("Scan cancelled");
            return Ok(ScanOutcome::NoMatch);
        }

        let threshold = self.config.match_threshold;
        let sensor = self.sensor_mut()?;

        let (position, score) = match sensor.search_template(CharBuffer::One)? {
            Some(hit) => hit,
            None => {
                debug!("No matching template");
                return Ok(ScanOutcome::NoMatch);
            }
        };

        if f64::from(score) < threshold {
            debug!("Match at {} below threshold (score {})", position, score);
            return Ok(ScanOutcome::NoMatch);
        }

        debug!("Matched template at position {} (score {})", position, score);
        self.key_for_position(position).map(ScanOutcome::Matched)
    }

    fn enroll_inner<F>(&mut self, token: &CancelToken, on_stage_one: F) -> Result<ScanOutcome>
    where
        F: FnOnce(),
    {
        debug!("Enrolling new user");
        if !self.capture(CharBuffer::One, token)? {
            debug!("Enrollment cancelled during first scan");
            return Ok(ScanOutcome::NoMatch);
        }
        debug!("First scan complete");
        on_stage_one();

        thread::sleep(self.config.enroll_pause);

        self.state = DriverState::EnrollingStage2;
        if !self.capture(CharBuffer::Two, token)? {
            debug!("Enrollment cancelled during second scan");
            return Ok(ScanOutcome::NoMatch);
        }
        debug!("Second scan complete");

        let sensor = self.sensor_mut()?;
        if sensor.compare_characteristics()? == 0 {
            // Fingers do not match; nothing is written to the module
            debug!("Enrollment captures do not match");
            return Ok(ScanOutcome::NoMatch);
        }

        sensor.create_template()?;
        let position = sensor.store_template(None)?;

        // Derive the key exactly as a later scan will
        self.key_for_position(position).map(ScanOutcome::Matched)
    }

    fn key_for_position(&mut self, position: u16) -> Result<BiometricKey> {
        let sensor = self.sensor_mut()?;
        sensor.load_template(position, CharBuffer::One)?;
        let characteristics = sensor.download_characteristics(CharBuffer::One)?;
        Ok(BiometricKey::from_characteristics(&characteristics))
    }

    /// Poll until an image is captured into `buffer`
    ///
    /// Returns false if cancelled. The token is checked once per failed
    /// attempt.
    fn capture(&mut self, buffer: CharBuffer, token: &CancelToken) -> Result<bool> {
        let poll = self.config.capture_poll;
        let timeout = self.config.capture_timeout;
        let started = Instant::now();
        let sensor = self.sensor_mut()?;

        loop {
            if sensor.read_image()? {
                if sensor.convert_image(buffer)? {
                    return Ok(true);
                }
                warn!("Captured image was unusable, retrying");
            }

            if token.is_cancelled() {
                return Ok(false);
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(SensorError::CaptureTimeout);
                }
            }

            thread::sleep(poll);
        }
    }

    fn require_connected(&self) -> Result<DriverState> {
        match self.sensor {
            Some(_) => Ok(DriverState::Connected),
            None => Err(SensorError::NotConnected),
        }
    }

    fn settle(&mut self) {
        self.state = if self.sensor.is_some() {
            DriverState::Connected
        } else {
            DriverState::Disconnected
        };
    }

    fn sensor_mut(&mut self) -> Result<&mut Sensor<O::Link>> {
        self.sensor.as_mut().ok_or(SensorError::NotConnected)
    }
}
