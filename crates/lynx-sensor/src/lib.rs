//! Lynx Sensor - Fingerprint sensor driver
//!
//! This crate talks to an R307-class optical fingerprint module over a serial
//! link using the module's binary packet protocol:
//! - Packet framing and checksum validation (`packet`)
//! - Typed instruction wrappers (`device`)
//! - Interruptible scan and two-stage enrollment (`driver`)
//! - Serial port transport (`transport`)
//! - An in-memory sensor speaking the same protocol (`sim`)

pub mod cancel;
pub mod device;
pub mod driver;
pub mod error;
pub mod packet;
pub mod sim;
pub mod transport;

pub use cancel::CancelToken;
pub use device::{CharBuffer, Sensor};
pub use driver::{Driver, DriverConfig, DriverState, ScanOutcome, DEFAULT_MATCH_THRESHOLD};
pub use error::{Result, SensorError};
pub use sim::{SimOpener, SimulatedSensor};
pub use transport::{default_port, LinkOpener, SerialLink, SerialOpener, BAUD_RATE};
