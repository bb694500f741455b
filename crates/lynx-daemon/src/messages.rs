//! Typed messages between the orchestrator, the workers and the front end
//!
//! Everything crosses a thread boundary by value. The only shared state is
//! the [`CancelToken`] carried by sensor commands.

use std::time::Duration;

use lynx_core::{BiometricKey, Credentials, SessionPhase};
use lynx_mail::Message;
use lynx_sensor::{CancelToken, ScanOutcome};

/// Commands for the mail worker
#[derive(Debug)]
pub enum MailCommand {
    CheckCredentials { ticket: u64, credentials: Credentials },
    FetchUnread { ticket: u64 },
    Reset,
}

/// Replies from the mail worker
#[derive(Debug, Clone)]
pub enum MailReply {
    Auth { ticket: u64, valid: bool },
    Message { ticket: u64, message: Message },
    FetchDone { ticket: u64, count: usize },
}

/// Commands for the sensor worker
///
/// Scan and enroll carry a generation number that is echoed in every reply,
/// so replies to superseded commands can be recognised and dropped.
#[derive(Debug)]
pub enum SensorCommand {
    /// (Re)open the device after waiting `delay`
    Connect { delay: Duration },
    Scan { generation: u64, token: CancelToken },
    Enroll { generation: u64, token: CancelToken },
    ClearDatabase,
}

/// Notifications from the sensor worker
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Connected,
    ConnectFailed { message: String },
    ScanResult { generation: u64, outcome: ScanOutcome },
    StageOneComplete { generation: u64 },
    EnrollResult { generation: u64, outcome: ScanOutcome },
    /// No finger within the capture timeout
    TimedOut { generation: u64 },
    /// Device or transport fault during an operation
    DeviceError { message: String },
    DatabaseCleared,
}

/// Commands for the store worker
#[derive(Debug)]
pub enum VaultCommand {
    Add {
        ticket: u64,
        credentials: Credentials,
        key: BiometricKey,
    },
    Get { generation: u64, key: BiometricKey },
}

/// Replies from the store worker
///
/// Each reply carries the ticket or generation of the command it answers.
#[derive(Debug, Clone)]
pub enum VaultReply {
    Added { ticket: u64 },
    AddFailed { ticket: u64, message: String },
    Lookup {
        generation: u64,
        credentials: Option<Credentials>,
    },
    LookupFailed { generation: u64, message: String },
}

/// Requests from the front end
#[derive(Debug)]
pub enum UiCommand {
    SubmitLogin(Credentials),
    OpenRegistration,
    OpenLogin,
    SubmitRegistration(Credentials),
    Logout,
    Shutdown,
}

/// Updates for the front end
#[derive(Debug, Clone)]
pub enum UiUpdate {
    PhaseChanged(SessionPhase),
    InvalidCredentials,
    /// First enrollment capture done; place the finger again
    ScanAgain,
    /// Enrollment captures did not match; starting over
    EnrollmentRetry,
    EnrollmentComplete,
    NewMail(Message),
    StorageFailure(String),
    DeviceFault(String),
}

/// Everything the orchestrator reacts to
#[derive(Debug)]
pub enum Event {
    Mail(MailReply),
    Sensor(SensorEvent),
    Vault(VaultReply),
    Ui(UiCommand),
}

/// Which flow issued the outstanding credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOrigin {
    ManualLogin,
    /// Credentials recovered from the store after a fingerprint match
    Biometric,
    Registration,
}
