//! Shared fixtures for the Lynx end-to-end tests

use std::time::Duration;

use lynx_sensor::{Driver, DriverConfig, SimOpener, SimulatedSensor};

/// Reconnect delay used by test sessions
pub const TEST_RECONNECT_DELAY: Duration = Duration::from_millis(5);

/// Driver against `sim` with millisecond polling and no enrollment pause
pub fn fast_driver(sim: &SimulatedSensor) -> Driver<SimOpener> {
    Driver::new(
        sim.opener(),
        DriverConfig {
            capture_poll: Duration::from_millis(1),
            enroll_pause: Duration::ZERO,
            ..DriverConfig::default()
        },
    )
}

/// Characteristics for a test finger
pub fn finger(seed: u8) -> Vec<u8> {
    (0..96u8).map(|i| i.wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Raw RFC 822 message with the given subject
pub fn raw_message(from: &str, subject: &str) -> Vec<u8> {
    format!("From: {}\r\nSubject: {}\r\n\r\nbody\r\n", from, subject).into_bytes()
}
